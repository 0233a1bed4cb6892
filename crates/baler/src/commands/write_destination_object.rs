//! Materializes a planned destination block in the remote store.

use serde::Deserialize;
use tracing::info;

use baler_store::make_index;

use crate::commands::PAGE_SIZE;
use crate::container::Container;
use crate::error::Result;
use crate::ids::decode_row_id;
use crate::merge::merge_objects;
use crate::model::{DestinationObject, ObjectSet, SourceObject};
use crate::schema::IDX_DESTINATION;

/// Collects the source objects assigned to one destination block and
/// streams their concatenation into the remote store.
///
/// No state transitions happen here: materialization is deliberately
/// separated from bookkeeping so a failed upload can be retried with no row
/// changes required.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteDestinationObject {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
    /// Base64 row id of the destination block.
    pub id: String,
}

impl WriteDestinationObject {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an undecodable id; propagates
    /// store and remote failures.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        let storage = cx.action_storage().await?;
        let store = cx.store().await?;

        let id = decode_row_id(&self.id)?;
        let mut set = ObjectSet::new(&self.bucket, &self.prefix);
        let table_name = set.table_name().to_string();

        let (destination, sources) = {
            let txn = store.begin_read()?;
            let table = txn.table(&table_name);
            table.read_config(&mut set)?;

            let mut destination = DestinationObject::new(set.clone());
            table.lookup_row(id, &mut destination)?;

            let mut sources = Vec::new();
            let mut exclusive_start: Option<Vec<u8>> = None;
            loop {
                let ids = table.prefix_query(
                    IDX_DESTINATION,
                    id.as_slice(),
                    PAGE_SIZE,
                    exclusive_start.as_deref(),
                )?;
                for source_id in &ids {
                    let mut source = SourceObject::new(set.clone());
                    table.lookup_row(*source_id, &mut source)?;
                    sources.push(source);
                }
                if ids.len() < PAGE_SIZE {
                    break;
                }
                if let Some(last) = ids.last() {
                    exclusive_start = Some(make_index(id.as_slice(), *last));
                }
            }
            (destination, sources)
        };

        let written = merge_objects(storage.as_ref(), &destination, &sources).await?;
        info!(
            key = destination.object.remote.key.as_deref().unwrap_or(""),
            sources = sources.len(),
            bytes = written,
            "wrote destination object"
        );
        Ok(())
    }
}
