use rst_common::with_logging::log::{info, warn};

use crate::didcomm::message::AgentMessage;
use crate::identity::connection::types::{AcceptConfig, ConnectionAPI};
use crate::identity::oob::messages::OutOfBandInvitation;
use crate::identity::oob::types::{OobRole, OobState, OutOfBandAPI};
use crate::routing::mediation::types::MediationRecipientAPI;
use crate::routing::mediation::MediationRecord;
use crate::storage::types::Query;
use crate::wallet::types::Wallet;

use super::agent::Agent;
use super::types::AgentError;

fn connection_error(err: impl ToString) -> AgentError {
    AgentError::ConnectionError(err.to_string())
}

fn out_of_band_error(err: impl ToString) -> AgentError {
    AgentError::OutOfBandError(err.to_string())
}

fn mediation_error(err: impl ToString) -> AgentError {
    AgentError::MediationError(err.to_string())
}

/// `initialize_mediator` picks the mediator of this agent and starts the pickup from it
///
/// The mediator invitation from the configuration wins over a default mediator stored earlier.
/// Nothing happens when neither is available.
pub(super) async fn initialize_mediator<TWallet>(
    agent: &Agent<TWallet>,
) -> Result<Option<MediationRecord>, AgentError>
where
    TWallet: Wallet + 'static,
{
    let mediation = match agent.config().mediator_invitation_url.clone() {
        Some(url) => Some(connect_mediator(agent, &url).await?),
        None => agent
            .mediation()
            .find_default_mediator()
            .await
            .map_err(mediation_error)?,
    };

    let mediation = match mediation {
        Some(mediation) if mediation.is_granted() => mediation,
        Some(mediation) => {
            warn!("default mediation {} is not granted", mediation.id);
            return Ok(None);
        }
        None => return Ok(None),
    };

    agent
        .pickup()
        .start(&mediation)
        .await
        .map_err(|err| AgentError::PickupError(err.to_string()))?;

    Ok(Some(mediation))
}

/// `connect_mediator` connects to the mediator behind an invitation url and makes it the
/// default one, a restarted agent reuses the connection made from the same invitation
async fn connect_mediator<TWallet>(
    agent: &Agent<TWallet>,
    url: &str,
) -> Result<MediationRecord, AgentError>
where
    TWallet: Wallet + 'static,
{
    let invitation = OutOfBandInvitation::from_url(url).map_err(out_of_band_error)?;
    let out_of_band = agent
        .out_of_band()
        .find_by_invitation_id(&invitation.id())
        .await
        .map_err(out_of_band_error)?
        .filter(|record| record.role == OobRole::Receiver);

    if let Some(record) = out_of_band.as_ref() {
        let query = Query::new().with_tag("out_of_band_id", &record.id);
        let connections = agent
            .connections()
            .find_by_query(&query)
            .await
            .map_err(connection_error)?;

        if let Some(connection) = connections.iter().find(|connection| connection.is_ready()) {
            info!("reusing mediator connection {}", connection.id);
            return reuse_mediation(agent, &connection.id).await;
        }

        if record.state != OobState::PrepareResponse {
            return Err(AgentError::ConfigError(format!(
                "mediator invitation {} was accepted without a usable connection",
                record.invitation_id()
            )));
        }
    }

    let record = match out_of_band {
        Some(record) => record,
        None => agent
            .out_of_band()
            .receive_invitation(invitation)
            .await
            .map_err(out_of_band_error)?,
    };

    let connection = agent
        .out_of_band()
        .accept_invitation(&record.id, AcceptConfig::default())
        .await
        .map_err(out_of_band_error)?;

    let connection = agent
        .connections()
        .return_when_is_connected(&connection.id, None)
        .await
        .map_err(connection_error)?;

    info!("connected to mediator through connection {}", connection.id);
    request_default_mediation(agent, &connection.id).await
}

async fn reuse_mediation<TWallet>(
    agent: &Agent<TWallet>,
    connection_id: &str,
) -> Result<MediationRecord, AgentError>
where
    TWallet: Wallet + 'static,
{
    let mediation = agent
        .mediation()
        .find_by_connection_id(connection_id)
        .await
        .map_err(mediation_error)?;

    match mediation {
        Some(mediation) if mediation.is_granted() && mediation.default => Ok(mediation),
        Some(mediation) if mediation.is_granted() => agent
            .mediation()
            .set_default_mediator(&mediation.id)
            .await
            .map_err(mediation_error),
        _ => request_default_mediation(agent, connection_id).await,
    }
}

async fn request_default_mediation<TWallet>(
    agent: &Agent<TWallet>,
    connection_id: &str,
) -> Result<MediationRecord, AgentError>
where
    TWallet: Wallet + 'static,
{
    let mediation = agent
        .mediation()
        .request_and_await_grant(connection_id, None)
        .await
        .map_err(mediation_error)?;

    let mediation = agent
        .mediation()
        .set_default_mediator(&mediation.id)
        .await
        .map_err(mediation_error)?;

    info!("mediation {} granted and set as default", mediation.id);
    Ok(mediation)
}
