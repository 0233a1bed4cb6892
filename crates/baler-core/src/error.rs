//! Error types and result aliases shared across baler components.

/// The result type used throughout baler.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in baler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided (malformed request, bad URL, unknown
    /// state string, undecodable id).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested object or blob does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A remote storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation was canceled before it completed.
    #[error("canceled: {0}")]
    Canceled(String),
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this error means the remote object does not exist.
    ///
    /// Backends return [`Error::NotFound`] directly rather than wrapping it,
    /// so classification survives propagation through the call stack.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(err.to_string());
        }
        Self::storage_with_source("i/o failure", err)
    }
}
