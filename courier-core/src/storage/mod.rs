//! `storage` is the generic record store shared by every stateful protocol.
//!
//! A [`Record`] is any serde type with an id, a set of query tags and a version. The [`Store`]
//! serializes records into [`types::StorageEntry`] values and delegates persistence to a
//! [`types::StorageEngine`]. Updates are compare-and-swap on the version, two concurrent
//! writers of the same record can never both win.
pub mod types;
pub use types::Record;

mod store;
pub use store::Store;

mod memory;
pub use memory::MemoryEngine;
