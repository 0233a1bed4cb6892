//! Error types for row-store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors that can occur during row-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage engine failed.
    #[error("storage engine error: {0}")]
    Engine(#[from] redb::Error),

    /// The engine rejected a commit; the whole transaction rolled back and
    /// the caller may retry the entire batch.
    #[error("transaction commit failed: {0}")]
    TransactionFailed(String),

    /// The referenced table has never been created.
    #[error("table not found: {0}")]
    TableMissing(String),

    /// A row marshaled a column not declared in its schema, or a declared
    /// column or index keyspace is missing. A programming or data error.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A row's type marker does not match the expected kind.
    #[error("row is not a {expected}")]
    WrongKind {
        /// The kind the caller asked for.
        expected: &'static str,
    },

    /// A row identifier had the wrong shape.
    #[error("invalid row id: {0}")]
    InvalidId(String),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::TransactionFailed(err.to_string())
    }
}
