//! In-process cluster hub
//!
//! Several ledger nodes sharing one process (tests, single-host setups) talk
//! through a [`LocalHub`]. Delivery goes through a bounded tokio broadcast
//! channel: a subscriber that falls behind loses the oldest envelopes, the
//! same failure mode a real best-effort fabric has.

use crate::{
    channel::{dispatch, BroadcastChannel, MessageHandler},
    message::Envelope,
    metrics::MESSAGE_PUBLISH_TOTAL,
    Result,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default number of in-flight envelopes per subscriber
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Shared fabric for in-process nodes
#[derive(Debug, Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Envelope>,
}

impl LocalHub {
    /// Create hub with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    /// Create hub with bounded per-subscriber capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Attach a new node to the hub
    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            node_id: Uuid::new_v4(),
            sender: self.sender.clone(),
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's endpoint on a [`LocalHub`]
#[derive(Debug, Clone)]
pub struct LocalChannel {
    node_id: Uuid,
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastChannel for LocalChannel {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        let label = envelope.message_type.label();

        // No receivers just means no peer is listening yet
        match self.sender.send(envelope) {
            Ok(receivers) => debug!(receivers, "Envelope published on local hub"),
            Err(_) => debug!("Envelope published on local hub with no subscribers"),
        }

        MESSAGE_PUBLISH_TOTAL.with_label_values(&[label, "success"]).inc();
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<JoinHandle<()>> {
        let mut receiver = self.sender.subscribe();
        let node_id = self.node_id;

        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => dispatch(node_id, handler.as_ref(), envelope).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(node = %node_id, skipped, "Local subscriber lagged, envelopes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: Envelope) -> Result<()> {
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_peer_receives_envelope() {
        let hub = LocalHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let recorder = Arc::new(Recorder::default());
        b.subscribe(recorder.clone()).unwrap();

        let envelope = Envelope::new(a.node_id(), MessageType::BalanceUpdate, json!({"n": 1}));
        a.publish(envelope.clone()).unwrap();
        settle().await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], envelope);
    }

    #[tokio::test]
    async fn test_own_echo_is_filtered() {
        let hub = LocalHub::new();
        let a = hub.channel();

        let recorder = Arc::new(Recorder::default());
        a.subscribe(recorder.clone()).unwrap();

        a.publish(Envelope::new(a.node_id(), MessageType::BalanceUpdate, json!({})))
            .unwrap();
        settle().await;

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let hub = LocalHub::new();
        let a = hub.channel();
        let result = a.publish(Envelope::new(a.node_id(), MessageType::MultiplierRequest, json!({})));
        assert!(result.is_ok());
    }
}
