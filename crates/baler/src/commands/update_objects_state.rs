//! Applies operator-driven state transitions to rows by id.

use serde::Deserialize;
use tracing::info;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::ids::decode_row_id;
use crate::model::{DestinationObject, ObjectSet, ObjectState, SourceObject};

/// Sets the given state on a list of rows, by type. Rows already in the
/// target state are skipped; everything else updates inside one write
/// transaction, so the batch applies entirely or not at all.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateObjectsState {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
    /// Row type: `source` or `destination`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64 row ids to update.
    pub ids: Vec<String>,
    /// Target state string.
    pub state: String,
}

impl UpdateObjectsState {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown state string, type, or
    /// undecodable id, before any row is touched in the failing case;
    /// otherwise propagates store failures.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        let state = ObjectState::parse(&self.state.to_uppercase());
        if state == ObjectState::Unknown {
            return Err(Error::invalid_input(format!(
                "invalid state: {}",
                self.state
            )));
        }

        let store = cx.store().await?;
        let mut set = ObjectSet::new(&self.bucket, &self.prefix);
        let table_name = set.table_name().to_string();

        let mut updated = 0usize;
        let txn = store.begin_write()?;
        {
            let table = txn.table(&table_name);
            table.read_config(&mut set)?;

            for encoded in &self.ids {
                let id = decode_row_id(encoded)?;
                match self.kind.as_str() {
                    "source" => {
                        let mut current = SourceObject::new(set.clone());
                        table.lookup_row(id, &mut current)?;
                        if current.object.state == state {
                            continue;
                        }
                        let mut row = current.copy()?;
                        row.object.state = state;
                        table.update_row(id, &row, Some(&current))?;
                    }
                    "destination" => {
                        let mut current = DestinationObject::new(set.clone());
                        table.lookup_row(id, &mut current)?;
                        if current.object.state == state {
                            continue;
                        }
                        let mut row = current.copy()?;
                        row.object.state = state;
                        table.update_row(id, &row, Some(&current))?;
                    }
                    other => {
                        return Err(Error::invalid_input(format!("invalid type: {other}")));
                    }
                }
                updated += 1;
            }
        }
        txn.commit()?;

        info!(table = %table_name, state = %state, rows = updated, "updated object state");
        Ok(())
    }
}
