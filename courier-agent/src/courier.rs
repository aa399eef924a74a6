use std::sync::Arc;

use rst_common::with_logging::log::info;

use prople_courier_core::agent::Agent;
use prople_courier_core::didcomm::transport::TransportRegistry;
use prople_courier_core::routing::mediator::InMemoryQueue;
use prople_courier_core::storage::Store;
use prople_courier_core::wallet::LocalWallet;

use crate::common::types::CommonError;
use crate::config::{App, Config, Parser};
use crate::db::{Builder as DbBuilder, RocksEngine};
use crate::transport::HttpTransport;

/// `CourierAgent` builds a ready to start [`Agent`] from a configuration file
///
/// The agent gets a `RocksDB` record store, the `HTTP` outbound transport, an in-memory
/// mediator queue and a fresh local wallet.
pub struct CourierAgent {
    config: Config,
}

impl CourierAgent {
    pub fn new(conf_file: String) -> Result<Self, CommonError> {
        let config = Parser::new(conf_file).parse_validated()?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn build_app_config(&self) -> App {
        self.config.app().to_owned()
    }

    pub fn build_store(&self) -> Result<Store, CommonError> {
        let runner = DbBuilder::new(self.config.db().records.clone()).build()?;
        info!("record store opened on column family: {}", runner.cf_name());

        Ok(Store::new(Arc::new(RocksEngine::new(runner))))
    }

    pub fn build_transports(&self) -> TransportRegistry {
        TransportRegistry::new().with_outbound(Arc::new(HttpTransport::default()))
    }

    pub fn build(&self) -> Result<Agent<LocalWallet>, CommonError> {
        let store = self.build_store()?;
        self.build_with_store(store)
    }

    pub fn build_with_store(&self, store: Store) -> Result<Agent<LocalWallet>, CommonError> {
        let agent_config = self.config.agent().to_agent_config()?;
        let label = agent_config.label.clone();

        let agent = Agent::new(
            LocalWallet::new(),
            store,
            self.build_transports(),
            Arc::new(InMemoryQueue::new()),
            agent_config,
        )
        .map_err(|err| CommonError::AgentError(err.to_string()))?;

        info!("courier agent built: {}", label);
        Ok(agent)
    }
}
