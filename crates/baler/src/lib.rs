//! # baler
//!
//! Concatenates many small objects stored in a remote object store into a
//! smaller number of large block objects, tracking per-source lifecycle
//! state in a local embedded row store.
//!
//! The pipeline is driven by single-action requests dispatched through
//! [`Handler`]: six commands mutate state (put-set, take-inventory,
//! load-inventory, plan-new, write-destination, update-state) and two
//! queries read it (list-by-state, source-stats). See the individual
//! modules under [`commands`] and [`queries`].

#![deny(rust_2018_idioms)]

pub mod commands;
pub mod container;
pub mod error;
pub mod handler;
pub mod ids;
pub mod inventory;
pub mod merge;
pub mod model;
pub mod queries;
pub mod schema;

pub use container::Container;
pub use error::{Error, Result};
pub use handler::{Handler, Request, Response};
