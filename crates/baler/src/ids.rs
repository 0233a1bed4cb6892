//! Row-id codec for the wire interface.
//!
//! Row ids cross the request boundary as unpadded URL-safe base64.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use baler_store::RowId;

use crate::error::{Error, Result};

/// Encodes a row id for a response.
#[must_use]
pub fn encode_row_id(id: RowId) -> String {
    URL_SAFE_NO_PAD.encode(id.as_slice())
}

/// Decodes a row id from a request.
///
/// # Errors
///
/// Returns an invalid-input error when the string is not base64 or does not
/// decode to exactly one id.
pub fn decode_row_id(encoded: &str) -> Result<RowId> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|err| Error::invalid_input(format!("undecodable id {encoded:?}: {err}")))?;
    RowId::from_slice(&bytes)
        .map_err(|_| Error::invalid_input(format!("id {encoded:?} has the wrong length")))
}
