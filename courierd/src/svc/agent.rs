use std::sync::Arc;
use std::time::Duration;

use rst_common::with_http_tokio::axum::{self, Router};
use rst_common::with_http_tokio::tower_http::timeout::TimeoutLayer;
use rst_common::with_http_tokio::tower_http::trace::TraceLayer;
use rst_common::with_logging::log::{info, warn};
use rst_common::with_tokio::tokio::{self, net::TcpListener};
use rst_common::with_tracing::tracing_subscriber::{
    self, layer::SubscriberExt, util::SubscriberInitExt,
};

use prople_courier_agent::{inbound_router, App, CourierAgent};
use prople_courier_core::agent::Agent;
use prople_courier_core::wallet::LocalWallet;

use crate::errors::CourierError;

pub struct AgentServer {
    config: String,
}

impl AgentServer {
    pub fn new(config: String) -> AgentServer {
        Self { config }
    }

    pub fn svc(&self) -> Result<AgentSvc, CourierError> {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                    format!(
                        "{}=debug,prople_courier_core=debug,tower_http=debug,axum=trace",
                        env!("CARGO_CRATE_NAME")
                    )
                    .into()
                }),
            )
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();

        let courier = CourierAgent::new(self.config.to_owned())
            .map_err(|err| CourierError::AgentError(err.to_string()))?;

        let agent = courier
            .build()
            .map_err(|err| CourierError::AgentError(err.to_string()))?;

        Ok(AgentSvc::new(courier.build_app_config(), Arc::new(agent)))
    }
}

/// `AgentSvc` serves the inbound endpoint of a started agent until `ctrl-c`
pub struct AgentSvc {
    app: App,
    agent: Arc<Agent<LocalWallet>>,
}

impl AgentSvc {
    pub fn new(app: App, agent: Arc<Agent<LocalWallet>>) -> Self {
        Self { app, agent }
    }

    fn router(&self) -> Router {
        inbound_router(self.agent.clone()).layer((
            TraceLayer::new_for_http(),
            TimeoutLayer::new(Duration::from_secs(10)),
        ))
    }

    pub async fn serve(&self) -> Result<(), CourierError> {
        // bound before start, the mediator replies to our endpoint during bootstrap
        let listener = TcpListener::bind(self.app.address())
            .await
            .map_err(|err| CourierError::ServerError(err.to_string()))?;

        info!("courier agent listening on {}", self.app.address());

        let router = self.router();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
        });

        match self.agent.start().await {
            Ok(Some(mediation)) => info!("picking up messages from mediation {}", mediation.id),
            Ok(None) => info!("courier agent started without mediator"),
            Err(err) => {
                server.abort();
                return Err(CourierError::AgentError(err.to_string()));
            }
        }

        let served = server
            .await
            .map_err(|err| CourierError::ServerError(err.to_string()))?;

        self.agent.shutdown().await;
        served.map_err(|err| CourierError::ServerError(err.to_string()))
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("unable to listen for shutdown signal: {}", err);
    }
}
