//! Aggregate statistics over a set's source objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use baler_store::StoreError;

use crate::container::Container;
use crate::error::Result;
use crate::model::{ObjectSet, ObjectState};
use crate::schema::{decode_i64, decode_u16};

/// Full scan of a set's source rows: row count, total size, and a count
/// per state string. Intended for small-to-medium sets; not paginated.
#[derive(Debug, Clone, Deserialize)]
pub struct GetSourceStats {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
}

/// The query response.
#[derive(Debug, Clone, Serialize)]
pub struct GetSourceStatsOutput {
    /// Number of source rows.
    pub count: i64,
    /// Total size, formatted in gigabytes.
    pub size: String,
    /// Total size in bytes.
    pub size_bytes: i64,
    /// Row count per state string.
    pub states: BTreeMap<String, i64>,
}

impl GetSourceStats {
    /// Runs the query.
    ///
    /// # Errors
    ///
    /// A source row without a `state` cell is a schema violation;
    /// otherwise propagates store failures.
    pub async fn run(&self, cx: &mut Container) -> Result<GetSourceStatsOutput> {
        let store = cx.store().await?;
        let set = ObjectSet::new(&self.bucket, &self.prefix);

        let txn = store.begin_read()?;
        let table = txn.table(set.table_name());

        let mut count = 0i64;
        let mut size_bytes = 0i64;
        let mut states: BTreeMap<String, i64> = BTreeMap::new();

        for id in table.column_ids("is_source_object")? {
            let state_cell = table.cell("state", id)?.ok_or_else(|| {
                StoreError::SchemaViolation(format!("source row {id:?} has no state cell"))
            })?;
            let state = ObjectState::from_u16(decode_u16(&state_cell)?);
            *states.entry(state.to_string()).or_insert(0) += 1;

            if let Some(size_cell) = table.cell("size", id)? {
                size_bytes += decode_i64(&size_cell)?;
            }
            count += 1;
        }

        Ok(GetSourceStatsOutput {
            count,
            size: format!("{:.3} GB", size_bytes as f64 / f64::from(1024 * 1024 * 1024)),
            size_bytes,
            states,
        })
    }
}
