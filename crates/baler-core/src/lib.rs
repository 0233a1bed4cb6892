//! # baler-core
//!
//! Shared primitives for the baler object-concatenation pipeline:
//!
//! - **Error Types**: the error enum and result alias used across all
//!   components
//! - **Storage Backends**: the object-storage abstraction the pipeline
//!   reads from and writes to, with in-memory and local-filesystem
//!   implementations
//! - **Locators**: `file://` / `s3://` URL parsing
//! - **Credentials**: the delegation seam consulted when a request carries
//!   assume-role parameters
//! - **Observability**: structured-logging initialization

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod credentials;
pub mod error;
pub mod fs_backend;
pub mod observability;
pub mod storage;
pub mod urls;

pub use credentials::{AssumeRole, CredentialBroker, StaticBroker};
pub use error::{Error, Result};
pub use fs_backend::FsBackend;
pub use observability::{init_logging, LogFormat};
pub use storage::{ByteStream, ListPage, MemoryBackend, Owner, RemoteObject, StorageBackend};
pub use urls::Location;
