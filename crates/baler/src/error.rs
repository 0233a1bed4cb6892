//! Error type for pipeline operations.
//!
//! Wraps the shared core error and the row-store error so command code can
//! use `?` across both layers.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a pipeline action.
#[derive(Debug, Error)]
pub enum Error {
    /// A shared-layer failure: bad input, missing object, remote I/O,
    /// cancellation.
    #[error(transparent)]
    Core(#[from] baler_core::Error),

    /// A row-store failure: engine error, rejected commit, schema
    /// violation, wrong row kind.
    #[error(transparent)]
    Store(#[from] baler_store::StoreError),
}

impl Error {
    /// Shorthand for an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Core(baler_core::Error::InvalidInput(message.into()))
    }

    /// Returns true if this error means a remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_not_found())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Core(err.into())
    }
}
