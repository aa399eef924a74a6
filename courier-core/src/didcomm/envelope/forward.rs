use rst_common::standard::serde_json;

use crate::didcomm::message::{AgentMessage, ForwardMessage};
use crate::wallet::types::Wallet;

use super::packer::EnvelopePacker;
use super::types::{Envelope, EnvelopeError, ForwardHop};

/// `ForwardWrapper` nests an envelope once per routing key so each mediator only learns the
/// next hop
#[derive(Clone)]
pub struct ForwardWrapper<TWallet>
where
    TWallet: Wallet,
{
    packer: EnvelopePacker<TWallet>,
}

impl<TWallet> ForwardWrapper<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(wallet: TWallet) -> Self {
        Self {
            packer: EnvelopePacker::new(wallet),
        }
    }

    /// `wrap` walks `routing_keys` from the innermost mediator (closest to the recipient) to the
    /// outermost one. Each layer is an anonymous envelope containing a forward message whose
    /// `to` is the previous layer's recipient.
    pub async fn wrap(
        &self,
        envelope: Envelope,
        routing_keys: &[String],
    ) -> Result<Envelope, EnvelopeError> {
        if routing_keys.is_empty() {
            return Ok(envelope);
        }

        let mut to = envelope
            .recipient_keys()?
            .into_iter()
            .next()
            .ok_or(EnvelopeError::ForwardError(
                "envelope has no recipients".to_string(),
            ))?;

        let mut current = envelope;
        for routing_key in routing_keys {
            let forward = ForwardMessage::new(to, current);
            let plaintext = serde_json::to_vec(&forward)
                .map_err(|err| EnvelopeError::ForwardError(err.to_string()))?;

            current = self
                .packer
                .pack(&plaintext, &[routing_key.clone()], None)
                .await?;

            to = routing_key.clone();
        }

        Ok(current)
    }

    /// `unwrap_one_hop` is used by a mediator to open one forward layer
    pub async fn unwrap_one_hop(&self, envelope: &Envelope) -> Result<ForwardHop, EnvelopeError> {
        let unpacked = self.packer.unpack(envelope).await?;

        let value = serde_json::from_slice(&unpacked.plaintext)
            .map_err(|err| EnvelopeError::ForwardError(err.to_string()))?;

        let forward = ForwardMessage::from_value(&value)
            .map_err(|err| EnvelopeError::ForwardError(err.to_string()))?;

        Ok(ForwardHop {
            next_hop: forward.to,
            inner: forward.msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::with_tokio::tokio;

    use crate::wallet::LocalWallet;

    #[tokio::test]
    async fn test_wrap_without_routing_keys_is_identity() {
        let wallet = LocalWallet::new();
        let recipient = wallet.create_key().await.unwrap();
        let packer = EnvelopePacker::new(wallet.clone());

        let envelope = packer.pack(b"hello", &[recipient], None).await.unwrap();
        let wrapped = ForwardWrapper::new(wallet)
            .wrap(envelope.clone(), &[])
            .await
            .unwrap();

        assert_eq!(wrapped, envelope)
    }

    #[tokio::test]
    async fn test_wrap_and_unwrap_every_hop() {
        let sender_wallet = LocalWallet::new();
        let sender_key = sender_wallet.create_key().await.unwrap();

        let recipient_wallet = LocalWallet::new();
        let recipient_key = recipient_wallet.create_key().await.unwrap();

        // routing keys ordered from the mediator closest to the recipient outward
        let mediator_wallets = vec![LocalWallet::new(), LocalWallet::new(), LocalWallet::new()];
        let mut routing_keys = Vec::new();
        for wallet in mediator_wallets.iter() {
            routing_keys.push(wallet.create_key().await.unwrap());
        }

        let packer = EnvelopePacker::new(sender_wallet.clone());
        let inner = packer
            .pack(b"payload", &[recipient_key.clone()], Some(&sender_key))
            .await
            .unwrap();

        let mut current = ForwardWrapper::new(sender_wallet)
            .wrap(inner.clone(), &routing_keys)
            .await
            .unwrap();

        let mut expected_hops: Vec<String> = vec![recipient_key.clone()];
        expected_hops.extend(routing_keys.iter().take(routing_keys.len() - 1).cloned());

        for (idx, wallet) in mediator_wallets.into_iter().enumerate().rev() {
            assert_eq!(current.recipient_keys().unwrap(), vec![routing_keys[idx].clone()]);

            let hop = ForwardWrapper::new(wallet)
                .unwrap_one_hop(&current)
                .await
                .unwrap();

            assert_eq!(hop.next_hop, expected_hops[idx]);
            current = hop.inner;
        }

        assert_eq!(current, inner);
        let unpacked = EnvelopePacker::new(recipient_wallet)
            .unpack(&current)
            .await
            .unwrap();

        assert_eq!(unpacked.plaintext, b"payload".to_vec());
        assert_eq!(unpacked.sender_key, Some(sender_key))
    }

    #[tokio::test]
    async fn test_unwrap_non_forward_message() {
        let wallet = LocalWallet::new();
        let key = wallet.create_key().await.unwrap();

        let envelope = EnvelopePacker::new(wallet.clone())
            .pack(b"{\"@id\":\"1\",\"@type\":\"https://didcomm.org/trust_ping/1.0/ping\"}", &[key], None)
            .await
            .unwrap();

        let result = ForwardWrapper::new(wallet).unwrap_one_hop(&envelope).await;
        assert!(matches!(result.unwrap_err(), EnvelopeError::ForwardError(_)))
    }
}
