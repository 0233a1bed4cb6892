//! Loads an inventory stream into the row store, detecting changes.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use baler_core::storage::RemoteObject;
use baler_store::Store;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::inventory::PIPE_CAPACITY;
use crate::model::{ObjectSet, ObjectState, SourceObject};

/// Number of inventory records buffered per flush transaction.
const FLUSH_CAPACITY: usize = 2048;

/// Reads an inventory of source objects from a `file://` or `s3://` URL
/// and reconciles it against previously seen state: unseen keys are
/// appended in state NEW, changed etags flag the row DIRTY, unchanged rows
/// are skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadInventory {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
    /// URL the inventory is read from.
    #[serde(default)]
    pub source: Option<String>,
}

impl LoadInventory {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when `source` is absent (loading
    /// straight from a remote listing is not implemented) or a record is
    /// malformed; each flush commits or rolls back as a whole.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        let source = self.source.as_ref().ok_or_else(|| {
            Error::invalid_input("load via remote listing not implemented, source is required")
        })?;

        let inventory = cx.inventory().await?;
        let store = cx.store().await?;
        let set = ObjectSet::new(&self.bucket, &self.prefix);

        info!(table = set.table_name(), source = %source, "loading inventory");

        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let producer = inventory.read_to(writer, source);

        let consumer = async {
            let mut lines = BufReader::new(reader).lines();
            let mut buffer: Vec<RemoteObject> = Vec::with_capacity(FLUSH_CAPACITY);
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let record: RemoteObject = serde_json::from_str(&line).map_err(|err| {
                    Error::invalid_input(format!("malformed inventory record: {err}"))
                })?;
                buffer.push(record);
                if buffer.len() == FLUSH_CAPACITY {
                    flush_buffer(store, &set, &mut buffer)?;
                }
            }
            flush_buffer(store, &set, &mut buffer)?;
            Ok::<(), Error>(())
        };

        tokio::try_join!(producer, consumer)?;
        Ok(())
    }
}

/// Reconciles one buffer of inventory records inside a single write
/// transaction. On failure the whole flush rolls back, so the caller can
/// retry the batch without partial index updates.
fn flush_buffer(store: &Store, set: &ObjectSet, buffer: &mut Vec<RemoteObject>) -> Result<()> {
    let flushed = buffer.len();
    let txn = store.begin_write()?;
    {
        let table = txn.table(set.table_name());
        for record in buffer.drain(..) {
            let mut candidate = SourceObject::new(set.clone());
            candidate.object.remote = record;

            match table.lookup_id(&candidate)? {
                Some(id) => {
                    let mut current = SourceObject::new(set.clone());
                    table.lookup_row(id, &mut current)?;
                    if !candidate.object.mark_dirty_against(&current.object) {
                        continue;
                    }
                    table.update_row(id, &candidate, Some(&current))?;
                }
                None => {
                    candidate.object.state = ObjectState::New;
                    table.append_row(&candidate)?;
                }
            }
        }
    }
    txn.commit()?;
    debug!(records = flushed, "flushed inventory buffer");
    Ok(())
}
