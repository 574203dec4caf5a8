//! Fire-and-forget publishing of ledger changes
//!
//! A failed publish never rolls back the local write that caused it; the
//! failure is logged and counted, and peers converge later through cache
//! misses and the poller.

use crate::{
    metrics::Metrics,
    protocol::{BalanceUpdate, MultiplierDisable, MultiplierRequest, MultiplierUpdate},
    types::{Multiplier, PlayerId},
};
use coins_messaging::{BroadcastChannel, Envelope, MessageType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Typed publisher over a broadcast channel
#[derive(Clone)]
pub struct Broadcaster {
    channel: Arc<dyn BroadcastChannel>,
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    /// Wrap a channel
    pub fn new(channel: Arc<dyn BroadcastChannel>, metrics: Arc<Metrics>) -> Self {
        Self { channel, metrics }
    }

    /// Node identity stamped on outgoing envelopes
    pub fn node_id(&self) -> Uuid {
        self.channel.node_id()
    }

    /// Underlying channel
    pub fn channel(&self) -> &Arc<dyn BroadcastChannel> {
        &self.channel
    }

    /// Announce a balance write
    pub fn balance(&self, player: PlayerId, balance: Decimal, previous: Option<Decimal>) {
        self.send(
            MessageType::BalanceUpdate,
            &BalanceUpdate {
                player,
                balance,
                previous,
            },
        );
    }

    /// Announce a created, edited, or activated multiplier
    pub fn multiplier_update(&self, multiplier: &Multiplier, enabled: bool) {
        self.send(
            MessageType::MultiplierUpdate,
            &MultiplierUpdate {
                multiplier: multiplier.clone(),
                enabled,
            },
        );
    }

    /// Announce a disabled multiplier
    pub fn multiplier_disable(&self, multiplier: &Multiplier) {
        self.send(
            MessageType::MultiplierDisable,
            &MultiplierDisable {
                multiplier: multiplier.clone(),
            },
        );
    }

    /// Ask peers to replay their multipliers
    pub fn multiplier_request(&self) {
        self.send(MessageType::MultiplierRequest, &MultiplierRequest::default());
    }

    fn send<T: Serialize>(&self, message_type: MessageType, payload: &T) {
        let result = Envelope::encode(self.channel.node_id(), message_type, payload)
            .and_then(|envelope| self.channel.publish(envelope));

        if let Err(e) = result {
            self.metrics.publish_failures.inc();
            tracing::warn!(message_type = %message_type, "Failed to broadcast: {}", e);
        }
    }
}
