//! Channel and handler seams

use crate::{message::Envelope, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle incoming message
    async fn handle(&self, message: Envelope) -> Result<()>;
}

/// Best-effort cluster broadcast
///
/// `publish` never blocks on the network: drivers hand the envelope to a
/// background task and return. An `Ok` only means the envelope was accepted
/// locally; peers may still never see it.
pub trait BroadcastChannel: Send + Sync {
    /// Identity of this node, stamped on every published envelope
    fn node_id(&self) -> Uuid;

    /// Publish an envelope to every peer
    fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Deliver peer envelopes to `handler` until the channel closes
    ///
    /// Envelopes published by this node are filtered out before dispatch.
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<JoinHandle<()>>;
}

/// Channel used when messaging is disabled (single process)
#[derive(Debug, Clone)]
pub struct NoopChannel {
    node_id: Uuid,
}

impl NoopChannel {
    /// Create disabled channel
    pub fn new() -> Self {
        Self {
            node_id: Uuid::new_v4(),
        }
    }
}

impl Default for NoopChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannel for NoopChannel {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        tracing::trace!(message_id = %envelope.id, "Messaging disabled, dropping envelope");
        Ok(())
    }

    fn subscribe(&self, _handler: Arc<dyn MessageHandler>) -> Result<JoinHandle<()>> {
        Ok(tokio::spawn(async {}))
    }
}

/// Run one envelope through a handler, filtering echoes and logging failures
pub(crate) async fn dispatch(node_id: Uuid, handler: &dyn MessageHandler, envelope: Envelope) {
    if envelope.is_echo_for(node_id) {
        tracing::trace!(message_id = %envelope.id, "Skipping own message");
        return;
    }

    let label = envelope.message_type.label();
    let message_id = envelope.id;
    crate::metrics::MESSAGE_RECEIVE_TOTAL
        .with_label_values(&[label, "received"])
        .inc();

    if let Err(e) = handler.handle(envelope).await {
        tracing::error!(message_id = %message_id, "Error handling message: {}", e);
        crate::metrics::MESSAGE_RECEIVE_TOTAL
            .with_label_values(&[label, "handler_error"])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_channel_accepts_everything() {
        let channel = NoopChannel::new();
        let envelope = Envelope::new(channel.node_id(), MessageType::BalanceUpdate, json!({}));
        assert!(channel.publish(envelope).is_ok());
    }
}
