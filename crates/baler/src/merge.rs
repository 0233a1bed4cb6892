//! Streaming concatenation of source objects into one destination block.

use tokio::io::AsyncWriteExt;
use tracing::debug;

use baler_core::storage::{reader_stream, StorageBackend};
use futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::inventory::PIPE_CAPACITY;
use crate::model::{DestinationObject, SourceObject};

/// Concatenates the bodies of `sources`, in order, into the destination
/// object's key, with the set's delimiter appended after every source,
/// including the last. The producer streams bodies through a bounded pipe
/// while the consumer uploads it, so memory stays O(pipe buffer).
///
/// Returns the number of bytes written (bodies plus delimiters).
///
/// # Errors
///
/// A failure on either side of the pipe aborts the other and propagates.
pub async fn merge_objects(
    storage: &dyn StorageBackend,
    destination: &DestinationObject,
    sources: &[SourceObject],
) -> Result<u64> {
    let set = &destination.object.parent;
    let destination_key = destination
        .object
        .remote
        .key
        .clone()
        .ok_or_else(|| Error::invalid_input("destination object has no key"))?;

    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    let producer = async move {
        let mut written = 0u64;
        for source in sources {
            let source_key = source
                .object
                .remote
                .key
                .as_deref()
                .ok_or_else(|| Error::invalid_input("source object has no key"))?;
            debug!(key = source_key, "copying source into block");

            let mut body = storage.get(&set.bucket, source_key).await?;
            while let Some(chunk) = body.try_next().await? {
                writer.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            writer.write_all(&set.delimiter).await?;
            written += set.delimiter.len() as u64;
        }
        writer.shutdown().await?;
        Ok::<u64, Error>(written)
    };

    let consumer = async {
        storage
            .put(&set.destination_bucket, &destination_key, reader_stream(reader))
            .await
            .map_err(Error::from)
    };

    let (written, _uploaded) = tokio::try_join!(producer, consumer)?;
    Ok(written)
}
