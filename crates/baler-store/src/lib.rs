//! # baler-store
//!
//! A columnar, index-maintaining row store built on top of the `redb`
//! embedded ordered key-value engine.
//!
//! The engine exposes a flat namespace of ordered byte-keyed tables; this
//! crate imposes a model of *tables* with named columns, per-row 8-byte
//! autogenerated identifiers, secondary indexes maintained transactionally
//! on insert and update, and prefix-range queries with stateless cursor
//! pagination.
//!
//! Row kinds plug in through the [`Row`] capability trait (schema,
//! marshal/unmarshal, optional indexes) plus [`Keyed`] for primary-key
//! lookup; the store functions never see a concrete kind.

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod columnar;
pub mod error;

pub use columnar::{
    make_index, Keyed, PrimaryKey, ReadTxn, Row, RowId, Store, TableRead, TableSpec, TableWrite,
    Values, WriteTxn, ID_SIZE,
};
pub use error::{Result, StoreError};
