//! Paginated listing of rows by lifecycle state.

use serde::{Deserialize, Serialize};

use baler_store::make_index;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::ids::{decode_row_id, encode_row_id};
use crate::model::{DestinationObject, ObjectSet, ObjectState, SourceObject};
use crate::schema::{IDX_DESTINATION_STATE, IDX_SOURCE_STATE};

/// Returns a page of row ids filtered by type (`source` or `destination`)
/// and state, with a stateless continuation cursor.
#[derive(Debug, Clone, Deserialize)]
pub struct ListObjectsByState {
    /// Source bucket of the set.
    pub bucket: String,
    /// Source key prefix of the set.
    pub prefix: String,
    /// Row type: `source` or `destination`.
    #[serde(rename = "type")]
    pub kind: String,
    /// State string to filter by.
    pub state: String,
    /// Maximum number of items returned.
    pub limit: usize,
    /// Base64 row id of the last item of the previous page.
    #[serde(default)]
    pub exclusive_start: Option<String>,
}

/// One listed row.
#[derive(Debug, Clone, Serialize)]
pub struct ListObjectsByStateItem {
    /// Base64 row id.
    pub id: String,
    /// The row's state string.
    pub state: String,
    /// The row's size in bytes.
    pub size: i64,
}

/// The query response.
#[derive(Debug, Clone, Serialize)]
pub struct ListObjectsByStateOutput {
    /// Row type that was listed.
    #[serde(rename = "type")]
    pub kind: String,
    /// The page of rows.
    pub items: Vec<ListObjectsByStateItem>,
    /// Number of items in this page.
    pub length: usize,
    /// Cursor for the next page; null when no entries follow.
    pub next_page: Option<String>,
}

impl ListObjectsByState {
    /// Runs the query.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown type, a zero limit, or
    /// an undecodable cursor; otherwise propagates store failures.
    pub async fn run(&self, cx: &mut Container) -> Result<ListObjectsByStateOutput> {
        let kind = self.kind.to_lowercase();
        let index = match kind.as_str() {
            "source" => IDX_SOURCE_STATE,
            "destination" => IDX_DESTINATION_STATE,
            other => return Err(Error::invalid_input(format!("invalid type: {other}"))),
        };
        if self.limit == 0 {
            return Err(Error::invalid_input("limit must be positive"));
        }

        let state = ObjectState::parse(&self.state.to_uppercase());
        let state_prefix = state.to_le_bytes();

        let store = cx.store().await?;
        let mut set = ObjectSet::new(&self.bucket, &self.prefix);
        let table_name = set.table_name().to_string();

        let txn = store.begin_read()?;
        let table = txn.table(&table_name);
        table.read_config(&mut set)?;

        let exclusive_start = match &self.exclusive_start {
            Some(encoded) => Some(make_index(&state_prefix, decode_row_id(encoded)?)),
            None => None,
        };

        // One extra id of lookahead decides whether a further page exists,
        // so an exactly-full final page still ends the pagination.
        let mut ids = table.prefix_query(
            index,
            &state_prefix,
            self.limit + 1,
            exclusive_start.as_deref(),
        )?;
        let has_more = ids.len() > self.limit;
        ids.truncate(self.limit);

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            let (state, size) = match kind.as_str() {
                "source" => {
                    let mut row = SourceObject::new(set.clone());
                    table.lookup_row(*id, &mut row)?;
                    (row.object.state, row.object.remote.size.unwrap_or(0))
                }
                _ => {
                    let mut row = DestinationObject::new(set.clone());
                    table.lookup_row(*id, &mut row)?;
                    (row.object.state, row.object.remote.size.unwrap_or(0))
                }
            };
            items.push(ListObjectsByStateItem {
                id: encode_row_id(*id),
                state: state.to_string(),
                size,
            });
        }

        let next_page = if has_more {
            ids.last().map(|id| encode_row_id(*id))
        } else {
            None
        };

        Ok(ListObjectsByStateOutput {
            kind,
            length: items.len(),
            items,
            next_page,
        })
    }
}
