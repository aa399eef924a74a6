//! `db` is the `RocksDB` backend of the record store.
//!
//! Each entry is saved under `<record_type>:<id>`. The ids of a record type are listed in an
//! index bucket saved under `merge_index:<record_type>`, updated through an associative merge
//! operator so adding an id never reads the bucket first.
mod types;
pub use types::{DbError, Instruction, OutputOpts};

mod bucket;
pub use bucket::{Bucket, IndexOp};

mod runner;
pub use runner::Runner;

mod builder;
pub use builder::Builder;

mod engine;
pub use engine::RocksEngine;
