//! Captures a listing of the remote source prefix as an inventory stream.

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::inventory::PIPE_CAPACITY;

/// Lists the remote source prefix page by page and persists each object as
/// one JSON document per line, streamed to either another remote object or
/// a local file.
#[derive(Debug, Clone, Deserialize)]
pub struct TakeInventory {
    /// Source bucket to list.
    pub bucket: String,
    /// Source key prefix to list.
    pub prefix: String,
    /// `file://` or `s3://` URL the inventory is written to.
    pub destination: String,
}

impl TakeInventory {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Propagates listing and upload failures; a failure on either side of
    /// the pipe aborts the other.
    pub async fn run(&self, cx: &mut Container) -> Result<()> {
        info!(
            bucket = %self.bucket,
            prefix = %self.prefix,
            destination = %self.destination,
            "starting inventory capture"
        );

        let storage = cx.action_storage().await?;
        let inventory = cx.inventory().await?;

        let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

        let lister = async {
            let mut start_after: Option<String> = None;
            loop {
                let page = storage
                    .list(&self.bucket, &self.prefix, start_after.as_deref())
                    .await?;
                for object in &page.objects {
                    let mut line = serde_json::to_vec(object)
                        .map_err(|err| Error::invalid_input(format!("unencodable object: {err}")))?;
                    line.push(b'\n');
                    writer.write_all(&line).await?;
                }
                if !page.is_truncated {
                    break;
                }
                start_after = page.objects.last().and_then(|o| o.key.clone());
                if start_after.is_none() {
                    break;
                }
            }
            writer.shutdown().await?;
            Ok::<(), Error>(())
        };

        let uploader = inventory.write_from(reader, &self.destination);

        tokio::try_join!(lister, uploader)?;
        Ok(())
    }
}
