mod app;
pub use app::App;

mod agent;
pub use agent::Agent;

mod database;
pub use database::{Database, Records, StorageLocation, StorageTuning};

mod config;
pub use config::Config;

mod parser;
pub use parser::Parser;
