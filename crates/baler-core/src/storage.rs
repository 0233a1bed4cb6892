//! Object-storage backend abstraction.
//!
//! This module defines the storage contract the pipeline consumes: paged
//! listing in key order, streaming reads, and streaming (multipart-style)
//! writes. The production S3 client lives outside this workspace; backends
//! here are the seam it plugs into, plus an in-memory implementation for
//! tests.
//!
//! Backends return [`Error::NotFound`] for missing objects rather than a
//! wrapped storage error, so callers can classify not-found conditions after
//! arbitrary propagation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};

/// A stream of body chunks flowing to or from the remote store.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Number of keys returned per listing page by the built-in backends.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// The owner of a remote object, when the store reports one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Canonical owner id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// The attributes of one remote object, as reported by a listing.
///
/// Also the record format of the newline-delimited JSON inventory stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Entity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Full object key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Owner, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    /// Object size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Storage class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in this page, in ascending key order.
    pub objects: Vec<RemoteObject>,
    /// True when more keys follow this page. The caller resumes by passing
    /// the last returned key as `start_after`.
    pub is_truncated: bool,
}

/// Storage backend trait for the remote object store.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Lists one page of objects under `prefix`, in ascending key order,
    /// starting strictly after `start_after` when given.
    async fn list(&self, bucket: &str, prefix: &str, start_after: Option<&str>)
        -> Result<ListPage>;

    /// Opens a streaming read of an object body.
    ///
    /// Returns [`Error::NotFound`] if the object doesn't exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream>;

    /// Uploads an object from a stream of chunks and returns the number of
    /// bytes written. The upload is whole-object: either every chunk is
    /// persisted or the object is not created.
    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> Result<u64>;
}

/// Adapts an [`AsyncRead`] into a [`ByteStream`].
pub fn reader_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::new(reader).map_err(Error::from).boxed()
}

/// Wraps already-buffered bytes as a single-chunk [`ByteStream`].
#[must_use]
pub fn bytes_stream(data: Bytes) -> ByteStream {
    futures::stream::iter([Ok(data)]).boxed()
}

/// Quoted hex MD5 of a payload, the etag convention of the remote store.
#[must_use]
pub fn payload_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`; keys are held in a `BTreeMap` so listings come
/// back in key order like the real store. Not suitable for production.
#[derive(Debug)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<(String, String), StoredObject>>>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Arc::default(),
            page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }

    /// Overrides the listing page size, to exercise pagination in tests.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stores an object directly, bypassing the streaming path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backing lock is poisoned.
    pub fn put_blocking(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        let etag = payload_etag(&data);
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    /// Reads an object's bytes directly, bypassing the streaming path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the object doesn't exist.
    pub fn get_blocking(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::storage("lock poisoned"))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {bucket}/{key}")))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
    ) -> Result<ListPage> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::storage("lock poisoned"))?;

        let mut page = ListPage::default();
        for ((b, key), obj) in objects.iter() {
            if b.as_str() != bucket || !key.starts_with(prefix) {
                continue;
            }
            if let Some(after) = start_after {
                if key.as_str() <= after {
                    continue;
                }
            }
            if page.objects.len() == self.page_size {
                page.is_truncated = true;
                break;
            }
            page.objects.push(RemoteObject {
                etag: Some(obj.etag.clone()),
                key: Some(key.clone()),
                last_modified: Some(obj.last_modified),
                owner: None,
                size: Some(obj.data.len() as i64),
                storage_class: Some("STANDARD".to_string()),
            });
        }
        Ok(page)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let data = self.get_blocking(bucket, key)?;
        Ok(bytes_stream(data))
    }

    async fn put(&self, bucket: &str, key: &str, mut body: ByteStream) -> Result<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        let written = buf.len() as u64;
        self.put_blocking(bucket, key, buf.freeze())?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_through_streams() {
        let backend = MemoryBackend::new();
        let written = backend
            .put("b", "k", bytes_stream(Bytes::from("hello world")))
            .await
            .expect("put should succeed");
        assert_eq!(written, 11);

        let body: Vec<Bytes> = backend
            .get("b", "k")
            .await
            .expect("get should succeed")
            .try_collect()
            .await
            .expect("stream should yield");
        assert_eq!(body.concat(), b"hello world");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = match backend.get("b", "nope").await {
            Err(err) => err,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_ordered_and_paginated() {
        let backend = MemoryBackend::new().with_page_size(2);
        for key in ["p/c", "p/a", "p/b", "q/z"] {
            backend.put_blocking("b", key, Bytes::from("x")).unwrap();
        }

        let first = backend.list("b", "p/", None).await.unwrap();
        assert!(first.is_truncated);
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.clone().unwrap()).collect();
        assert_eq!(keys, ["p/a", "p/b"]);

        let second = backend.list("b", "p/", Some("p/b")).await.unwrap();
        assert!(!second.is_truncated);
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.clone().unwrap()).collect();
        assert_eq!(keys, ["p/c"]);
    }

    #[tokio::test]
    async fn etag_tracks_content() {
        let backend = MemoryBackend::new();
        backend.put_blocking("b", "k", Bytes::from("v1")).unwrap();
        let first = backend.list("b", "k", None).await.unwrap().objects[0]
            .etag
            .clone();
        backend.put_blocking("b", "k", Bytes::from("v2")).unwrap();
        let second = backend.list("b", "k", None).await.unwrap().objects[0]
            .etag
            .clone();
        assert_ne!(first, second);
    }
}
