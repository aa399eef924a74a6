//! `prople-courier-agent` turns the `prople-courier-core` agent into a deployable service.
//!
//! It provides the pieces the core keeps abstract:
//!
//! - `config`, the TOML configuration of the agent, its inbound listener and its database
//! - `db`, a `RocksDB` [`prople_courier_core::storage::types::StorageEngine`]
//! - `transport`, the `HTTP` outbound transport (reqwest) and the inbound router (axum)
//!
//! [`CourierAgent`] wires everything from a configuration file.
pub mod common;

mod config;
pub use config::{App, Config, Parser as ConfigManager};

mod db;
pub use db::{
    Bucket as DbBucket, Builder as DbBuilder, DbError, Instruction as DbInstruction,
    OutputOpts as DbOutput, RocksEngine, Runner as DbRunner,
};

mod transport;
pub use transport::{inbound_router, HttpTransport, DIDCOMM_CONTENT_TYPE};

mod courier;
pub use courier::CourierAgent;
