//! Lazily-initialized dependencies for one request.
//!
//! The embedded database travels as a blob in the remote store. On first
//! use the container downloads it to a uuid-named temporary path and opens
//! it; a missing blob is the new-database fast path. Teardown always closes
//! the store, uploads the file whole, and removes the temporary, even when
//! the action failed, so committed work of earlier transactions is not
//! lost. A `file://` database URL skips the blob transport and operates on
//! the path in place.

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use baler_core::credentials::{AssumeRole, CredentialBroker};
use baler_core::storage::{reader_stream, StorageBackend};
use baler_core::urls::Location;
use baler_store::Store;
use futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::inventory::InventoryManager;

/// Holds a request's dependencies, created on first use.
pub struct Container {
    storage: Arc<dyn StorageBackend>,
    broker: Arc<dyn CredentialBroker>,
    assume_role: Option<AssumeRole>,
    action_storage: Option<Arc<dyn StorageBackend>>,
    db_url: String,
    db: Option<Store>,
    remote_db: Option<(String, String)>,
}

impl Container {
    /// Creates a container for one request.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        broker: Arc<dyn CredentialBroker>,
        db_url: String,
        assume_role: Option<AssumeRole>,
    ) -> Self {
        Self {
            storage,
            broker,
            assume_role,
            action_storage: None,
            db_url,
            db: None,
            remote_db: None,
        }
    }

    /// The storage backend actions read and write objects through. When the
    /// request carries assume-role parameters the broker resolves a
    /// delegated backend; the result is cached for the request.
    ///
    /// # Errors
    ///
    /// Propagates delegation failures.
    pub async fn action_storage(&mut self) -> Result<Arc<dyn StorageBackend>> {
        if let Some(storage) = &self.action_storage {
            return Ok(storage.clone());
        }
        let resolved = match &self.assume_role {
            Some(role) => self.broker.delegate(self.storage.clone(), role).await?,
            None => self.storage.clone(),
        };
        self.action_storage = Some(resolved.clone());
        Ok(resolved)
    }

    /// An inventory manager over the action storage.
    ///
    /// # Errors
    ///
    /// Propagates delegation failures.
    pub async fn inventory(&mut self) -> Result<InventoryManager> {
        Ok(InventoryManager::new(self.action_storage().await?))
    }

    /// The open row store, downloading and opening the database blob on
    /// first use.
    ///
    /// # Errors
    ///
    /// Propagates download and open failures; a missing blob opens a fresh
    /// database instead.
    pub async fn store(&mut self) -> Result<&Store> {
        if self.db.is_none() {
            let store = self.open_database().await?;
            self.db = Some(store);
        }
        self.db
            .as_ref()
            .ok_or_else(|| Error::Core(baler_core::Error::storage("database already closed")))
    }

    async fn open_database(&mut self) -> Result<Store> {
        match Location::parse(&self.db_url)? {
            Location::File(path) => {
                info!(path = %path.display(), "opening local database");
                Ok(Store::open(path)?)
            }
            Location::Remote { bucket, key } => {
                let path = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
                debug!(bucket = %bucket, key = %key, "downloading database");

                match self.storage.get(&bucket, &key).await {
                    Ok(mut body) => {
                        let download = async {
                            let mut file = fs::File::create(&path).await?;
                            while let Some(chunk) = body.try_next().await? {
                                file.write_all(&chunk).await?;
                            }
                            file.flush().await?;
                            Ok::<(), Error>(())
                        }
                        .await;
                        if let Err(err) = download {
                            let _ = fs::remove_file(&path).await;
                            return Err(err);
                        }
                    }
                    Err(err) if err.is_not_found() => {
                        info!("database blob not found, creating a new database");
                    }
                    Err(err) => return Err(err.into()),
                }

                self.remote_db = Some((bucket, key));
                Ok(Store::open(&path)?)
            }
        }
    }

    /// Tears the container down: closes the store and, for a blob-backed
    /// database, uploads the file and removes the temporary. Must run even
    /// when the action failed.
    ///
    /// # Errors
    ///
    /// Propagates upload failures; prior committed transactions stay in the
    /// uploaded file only if this succeeds.
    pub async fn close(&mut self) -> Result<()> {
        let Some(store) = self.db.take() else {
            return Ok(());
        };
        let path = store.close();

        let Some((bucket, key)) = self.remote_db.take() else {
            return Ok(());
        };

        info!(bucket = %bucket, key = %key, "uploading database");
        let result = self.upload_database(&path, &bucket, &key).await;
        if let Err(err) = fs::remove_file(&path).await {
            warn!(error = %err, path = %path.display(), "problem deleting database file");
        }
        result
    }

    async fn upload_database(&self, path: &Path, bucket: &str, key: &str) -> Result<()> {
        let file = fs::File::open(path).await?;
        self.storage.put(bucket, key, reader_stream(file)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baler_core::credentials::StaticBroker;
    use baler_core::storage::MemoryBackend;

    fn container(backend: Arc<MemoryBackend>, db_url: &str) -> Container {
        Container::new(
            backend,
            Arc::new(StaticBroker),
            db_url.to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn missing_blob_creates_a_fresh_database_and_uploads_on_close() {
        let backend = Arc::new(MemoryBackend::new());
        let mut cx = container(backend.clone(), "s3://state/db");

        cx.store().await.unwrap();
        cx.close().await.unwrap();

        assert!(!backend.get_blocking("state", "db").unwrap().is_empty());
    }

    #[tokio::test]
    async fn database_roundtrips_through_the_blob() {
        let backend = Arc::new(MemoryBackend::new());

        let mut cx = container(backend.clone(), "s3://state/db");
        let store = cx.store().await.unwrap();
        let path = store.path().to_path_buf();
        cx.close().await.unwrap();
        assert!(!path.exists());

        let mut cx = container(backend, "s3://state/db");
        cx.store().await.unwrap();
        cx.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_without_open_is_a_no_op() {
        let backend = Arc::new(MemoryBackend::new());
        let mut cx = container(backend, "s3://state/db");
        cx.close().await.unwrap();
    }

    #[tokio::test]
    async fn bad_db_url_is_invalid_input() {
        let backend = Arc::new(MemoryBackend::new());
        let mut cx = container(backend, "ftp://state/db");
        assert!(cx.store().await.is_err());
    }
}
