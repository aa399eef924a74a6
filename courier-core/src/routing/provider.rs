use rst_common::with_logging::log::debug;

use crate::didcomm::transport::types::QUEUE_ENDPOINT;
use crate::wallet::types::Wallet;

use super::mediation::types::{
    KeylistAction, MediationError, MediationRecipientAPI, MediationRole, MediationState,
    KEYLIST_UPDATE_TIMEOUT,
};
use super::mediation::{MediationRecipientUsecase, MediationRecord};

/// `Routing` is what a peer needs to reach one of our keys
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    pub verkey: String,
    pub endpoints: Vec<String>,
    pub routing_keys: Vec<String>,
    pub mediator_id: Option<String>,
}

/// `RoutingService` creates a fresh key for every invitation and connection and publishes it
/// either behind a mediator or on the agent own endpoints
#[derive(Clone)]
pub struct RoutingService<TWallet>
where
    TWallet: Wallet,
{
    wallet: TWallet,
    endpoints: Vec<String>,
    mediation: MediationRecipientUsecase<TWallet>,
}

impl<TWallet> RoutingService<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(
        wallet: TWallet,
        endpoints: Vec<String>,
        mediation: MediationRecipientUsecase<TWallet>,
    ) -> Self {
        Self {
            wallet,
            endpoints,
            mediation,
        }
    }

    /// `own_endpoints` falls back to the queue endpoint for agents without inbound transport
    pub fn own_endpoints(&self) -> Vec<String> {
        if self.endpoints.is_empty() {
            return vec![QUEUE_ENDPOINT.to_string()];
        }

        self.endpoints.clone()
    }

    async fn select_mediator(
        &self,
        mediator_id: Option<&str>,
        use_default_mediator: bool,
    ) -> Result<Option<MediationRecord>, MediationError> {
        if let Some(id) = mediator_id {
            let record = self.mediation.get_by_id(id).await?;
            record.assert_role(MediationRole::Recipient)?;
            record.assert_state(MediationState::Granted)?;
            return Ok(Some(record));
        }

        if use_default_mediator {
            return self.mediation.find_default_mediator().await;
        }

        Ok(None)
    }

    /// `get_routing` registers the new key with the mediator and waits for its confirmation
    /// before returning, a peer may use the routing as soon as it is published
    pub async fn get_routing(
        &self,
        mediator_id: Option<&str>,
        use_default_mediator: bool,
    ) -> Result<Routing, MediationError> {
        let verkey = self
            .wallet
            .create_key()
            .await
            .map_err(|err| MediationError::WalletError(err.to_string()))?;

        let mediator = self
            .select_mediator(mediator_id, use_default_mediator)
            .await?;

        match mediator {
            Some(mediator) => {
                let endpoint = mediator.endpoint.clone().ok_or(MediationError::InvalidState(
                    format!("mediation {} has no endpoint", mediator.id),
                ))?;

                self.mediation
                    .keylist_update_and_wait(
                        &mediator.id,
                        &verkey,
                        KeylistAction::Add,
                        KEYLIST_UPDATE_TIMEOUT,
                    )
                    .await?;

                debug!("routing through mediator {}: {}", mediator.id, verkey);
                Ok(Routing {
                    verkey,
                    endpoints: vec![endpoint],
                    routing_keys: mediator.routing_keys,
                    mediator_id: Some(mediator.id),
                })
            }
            None => Ok(Routing {
                verkey,
                endpoints: self.own_endpoints(),
                routing_keys: Vec::new(),
                mediator_id: None,
            }),
        }
    }
}
