//! Convenience adapters that let a `Session` store and load already-encrypted
//! `DataRowRecord`s through an arbitrary backing store, by implementing the
//! crate root's `Loader`/`Storer` traits from a plain closure.
//!
//! The in-memory key metastore itself lives in `crate::metastore`; this module
//! is only the `Session::store`/`Session::load` glue, not another metastore.

mod functions;

pub use functions::{LoaderFn, StorerFn};
