//! Local-filesystem storage backend.
//!
//! Lays objects out as `root/{bucket}/{key}` with the key's slashes mapped
//! to directories. Listings walk the bucket directory and come back in key
//! order with md5 etags, so change detection behaves like the remote store.
//! Useful for development and integration tests; not a production store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::storage::{
    payload_etag, reader_stream, ByteStream, ListPage, RemoteObject, StorageBackend,
    DEFAULT_LIST_PAGE_SIZE,
};

/// Storage backend over a local directory tree.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    page_size: usize,
}

impl FsBackend {
    /// Creates a backend rooted at `root`. The directory is created lazily
    /// on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }

    /// Overrides the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    async fn walk_keys(&self, bucket: &str) -> Result<Vec<(String, PathBuf)>> {
        let bucket_root = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![bucket_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = relative_key(&bucket_root, &path) {
                    keys.push((key, path));
                }
            }
        }

        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keys)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
    ) -> Result<ListPage> {
        let mut page = ListPage::default();
        for (key, path) in self.walk_keys(bucket).await? {
            if !key.starts_with(prefix) {
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

            let meta = fs::metadata(&path).await?;
            let data = fs::read(&path).await?;
            let last_modified = meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            page.objects.push(RemoteObject {
                etag: Some(payload_etag(&data)),
                key: Some(key),
                last_modified: Some(last_modified),
                owner: None,
                size: Some(meta.len() as i64),
                storage_class: Some("STANDARD".to_string()),
            });
        }
        Ok(page)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let path = self.object_path(bucket, key);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("object not found: {bucket}/{key}")));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(reader_stream(file))
    }

    async fn put(&self, bucket: &str, key: &str, mut body: ByteStream) -> Result<u64> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}
