//! Plans NEW source objects into destination blocks by size.

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use baler_store::{RowId, TableWrite};

use crate::commands::PAGE_SIZE;
use crate::container::Container;
use crate::error::Result;
use crate::model::{DestinationObject, ObjectSet, ObjectState, SourceObject};
use crate::schema::IDX_SOURCE_STATE;

/// Queries for NEW source objects and bin-packs them into new destination
/// blocks, updating only row state; materialization happens separately.
///
/// Sources transition NEW → IN_SYNC simultaneously with the write of their
/// destination reference. A block is finalized once its running size
/// (bodies plus one delimiter per source) reaches the set's block size; the
/// final block of a pass may be smaller. A source larger than the block
/// size lands alone in its own oversized block.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanNewObjects {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
}

/// A destination block accepting sources, with its running size.
struct OpenBlock {
    id: RowId,
    row: DestinationObject,
    size: i64,
}

impl PlanNewObjects {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Propagates store failures; each page's transitions commit or roll
    /// back as a whole.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        let store = cx.store().await?;

        let mut set = ObjectSet::new(&self.bucket, &self.prefix);
        let table_name = set.table_name().to_string();
        {
            let txn = store.begin_read()?;
            txn.table(&table_name).read_config(&mut set)?;
        }

        let state_prefix = ObjectState::New.to_le_bytes();
        let mut open_block: Option<OpenBlock> = None;
        let mut planned = 0usize;

        loop {
            let ids = {
                let txn = store.begin_read()?;
                txn.table(&table_name)
                    .prefix_query(IDX_SOURCE_STATE, &state_prefix, PAGE_SIZE, None)?
            };

            let txn = store.begin_write()?;
            {
                let table = txn.table(&table_name);
                for id in &ids {
                    let mut source = SourceObject::new(set.clone());
                    table.lookup_row(*id, &mut source)?;

                    let mut block = match open_block.take() {
                        Some(block) => block,
                        None => open_new_block(&table, &set)?,
                    };

                    let prior = source.copy()?;
                    source.destination_object_id = Some(block.id);
                    source.object.state = ObjectState::InSync;
                    table.update_row(*id, &source, Some(&prior))?;
                    planned += 1;

                    block.size +=
                        source.object.remote.size.unwrap_or(0) + set.delimiter.len() as i64;
                    if block.size >= set.block_size {
                        finalize_block(&table, &block)?;
                    } else {
                        open_block = Some(block);
                    }
                }

                if ids.len() < PAGE_SIZE {
                    if let Some(block) = open_block.take() {
                        finalize_block(&table, &block)?;
                    }
                }
            }
            txn.commit()?;

            if ids.len() < PAGE_SIZE {
                info!(table = %table_name, sources = planned, "planning complete");
                return Ok(());
            }
        }
    }
}

fn open_new_block(table: &TableWrite<'_>, set: &ObjectSet) -> Result<OpenBlock> {
    let mut block = DestinationObject::new(set.clone());
    block.object.remote.key = Some(set.destination_key(&Uuid::new_v4().to_string()));
    block.object.state = ObjectState::New;

    let id = table.append_row(&block)?;
    debug!(
        key = block.object.remote.key.as_deref().unwrap_or(""),
        "opened new block"
    );
    Ok(OpenBlock {
        id,
        row: block,
        size: 0,
    })
}

/// Records the block's final size.
fn finalize_block(table: &TableWrite<'_>, block: &OpenBlock) -> Result<()> {
    let mut updated = block.row.copy()?;
    updated.object.remote.size = Some(block.size);
    table.update_row(block.id, &updated, Some(&block.row))?;
    Ok(())
}
