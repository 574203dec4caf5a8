//! NATS core pub/sub driver
//!
//! Core NATS (no JetStream): the cluster channel is deliberately
//! fire-and-forget. Publishing enqueues onto an unbounded mpsc drained by a
//! writer task, so callers on the game thread never wait on the network.

use crate::{
    channel::{dispatch, BroadcastChannel, MessageHandler},
    message::Envelope,
    metrics::{MESSAGE_PUBLISH_TOTAL, MESSAGE_RECEIVE_TOTAL, NATS_CONNECTION_STATUS},
    types::sanitize_subject,
    Error, Result,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Subject prefix shared by the cluster
    pub subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject: "coins.updates".to_string(),
        }
    }
}

/// Broadcast channel over core NATS
pub struct NatsChannel {
    node_id: Uuid,
    subject: String,
    client: async_nats::Client,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl NatsChannel {
    /// Connect and start the writer task
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(config.url.as_str()).await.map_err(|e| {
            NATS_CONNECTION_STATUS.with_label_values(&["disconnected"]).inc();
            Error::Connection(e.to_string())
        })?;
        NATS_CONNECTION_STATUS.with_label_values(&["connected"]).inc();

        let subject = sanitize_subject(&config.subject);
        let (outbound, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_writer(client.clone(), subject.clone(), receiver));

        info!(subject = %subject, "✅ Connected to NATS");

        Ok(Self {
            node_id: Uuid::new_v4(),
            subject,
            client,
            outbound,
        })
    }

    /// Drain queued envelopes onto the wire
    async fn run_writer(
        client: async_nats::Client,
        prefix: String,
        mut receiver: mpsc::UnboundedReceiver<Envelope>,
    ) {
        while let Some(envelope) = receiver.recv().await {
            let label = envelope.message_type.label();
            let subject = envelope.subject(&prefix);

            let status = match envelope.to_bytes() {
                Ok(payload) => match client.publish(subject, bytes::Bytes::from(payload)).await {
                    Ok(()) => "success",
                    Err(e) => {
                        // Best effort: the envelope is lost, the local write stands
                        warn!(message_id = %envelope.id, "NATS publish failed: {}", e);
                        "error"
                    }
                },
                Err(e) => {
                    error!(message_id = %envelope.id, "Failed to encode envelope: {}", e);
                    "encode_error"
                }
            };

            MESSAGE_PUBLISH_TOTAL.with_label_values(&[label, status]).inc();
        }

        info!("NATS writer stopped");
    }
}

impl BroadcastChannel for NatsChannel {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| Error::Closed("NATS writer task stopped".to_string()))
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<JoinHandle<()>> {
        let client = self.client.clone();
        let filter = format!("{}.>", self.subject);
        let node_id = self.node_id;

        Ok(tokio::spawn(async move {
            info!("Subscribing to core NATS subject: {}", filter);

            let mut subscriber = match client.subscribe(filter.clone()).await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", filter, e);
                    return;
                }
            };

            info!("✅ Subscribed to {}", filter);

            while let Some(msg) = subscriber.next().await {
                match Envelope::from_bytes(&msg.payload) {
                    Ok(envelope) => dispatch(node_id, handler.as_ref(), envelope).await,
                    Err(e) => {
                        error!("Failed to parse message: {}", e);
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&["unknown", "parse_error"])
                            .inc();
                    }
                }
            }

            warn!("NATS subscription to {} ended", filter);
        }))
    }
}
