//! Creates or updates an object set and its table.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::info;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::model::ObjectSet;

/// Ensures an object set exists, creating its table keyspaces and
/// overwriting its destination configuration.
///
/// The delimiter arrives either as a literal string or base64-encoded for
/// non-printable bytes; exactly one of the two is required.
#[derive(Debug, Clone, Deserialize)]
pub struct PutObjectSet {
    /// Source bucket.
    pub bucket: String,
    /// Source key prefix.
    pub prefix: String,
    /// Bucket merged blocks are written to.
    pub destination_bucket: String,
    /// Key prefix of merged blocks.
    pub destination_path: String,
    /// Target block size in bytes.
    pub block_size: i64,
    /// Delimiter as a literal string.
    #[serde(default)]
    pub delimiter: Option<String>,
    /// Delimiter as standard base64, for arbitrary bytes.
    #[serde(default)]
    pub delimiter_b64: Option<String>,
}

impl PutObjectSet {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when both delimiter fields are absent
    /// or the base64 is undecodable; otherwise propagates store failures.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        let mut set = ObjectSet::new(&self.bucket, &self.prefix);
        set.block_size = self.block_size;
        set.destination_bucket = self.destination_bucket.clone();
        set.destination_path = format!("{}/", self.destination_path.trim_matches('/'));
        set.delimiter = match (&self.delimiter, &self.delimiter_b64) {
            (Some(delimiter), _) => delimiter.clone().into_bytes(),
            (None, Some(encoded)) => BASE64_STANDARD.decode(encoded).map_err(|err| {
                Error::invalid_input(format!("undecodable delimiter_b64: {err}"))
            })?,
            (None, None) => {
                return Err(Error::invalid_input(
                    "missing required parameters, delimiter or delimiter_b64",
                ))
            }
        };

        let store = cx.store().await?;
        store.ensure_table(&set)?;

        let txn = store.begin_write()?;
        txn.table(set.table_name()).put_config(&set)?;
        txn.commit()?;

        info!(table = set.table_name(), "object set stored");
        Ok(())
    }
}
