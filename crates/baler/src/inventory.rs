//! Inventory transport between pipes and storage locations.
//!
//! Moves a byte stream between one end of a bounded in-memory pipe and a
//! `file://` path or `s3://` object, in either direction. Memory stays
//! O(pipe buffer) regardless of inventory size. A failure on either side of
//! the pipe surfaces through the join on the calling side, and dropping the
//! failed half unblocks the peer.

use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::info;

use baler_core::storage::{reader_stream, StorageBackend};
use baler_core::urls::Location;
use futures::TryStreamExt;

use crate::error::Result;

/// Capacity of the bounded pipes used by inventory and merge streaming.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Streams inventories between pipes and storage locations.
#[derive(Clone)]
pub struct InventoryManager {
    storage: Arc<dyn StorageBackend>,
}

impl InventoryManager {
    /// Creates a manager over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Streams all bytes from `reader` to the location named by
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unsupported URL, otherwise
    /// propagates I/O failures.
    pub async fn write_from<R>(&self, mut reader: R, destination: &str) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match Location::parse(destination)? {
            Location::File(path) => {
                info!(path = %path.display(), "writing inventory to file");
                let mut file = fs::File::create(&path).await?;
                tokio::io::copy(&mut reader, &mut file).await?;
                file.flush().await?;
                Ok(())
            }
            Location::Remote { bucket, key } => {
                info!(bucket = %bucket, key = %key, "uploading inventory");
                self.storage
                    .put(&bucket, &key, reader_stream(reader))
                    .await?;
                Ok(())
            }
        }
    }

    /// Streams all bytes from the location named by `source` into
    /// `writer`. The writer is dropped on return, which signals
    /// end-of-stream to a pipe peer.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unsupported URL, a not-found
    /// error for a missing source, otherwise propagates I/O failures.
    pub async fn read_to<W>(&self, mut writer: W, source: &str) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        match Location::parse(source)? {
            Location::File(path) => {
                info!(path = %path.display(), "reading inventory from file");
                let mut file = fs::File::open(&path).await?;
                tokio::io::copy(&mut file, &mut writer).await?;
            }
            Location::Remote { bucket, key } => {
                info!(bucket = %bucket, key = %key, "downloading inventory");
                let mut body = self.storage.get(&bucket, &key).await?;
                while let Some(chunk) = body.try_next().await? {
                    writer.write_all(&chunk).await?;
                }
            }
        }
        writer.flush().await?;
        Ok(())
    }
}
