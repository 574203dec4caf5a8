//! Applies peer sync messages to the local node

use crate::{
    ledger::Ledger,
    protocol::{BalanceUpdate, MultiplierDisable, MultiplierUpdate},
};
use async_trait::async_trait;
use coins_messaging::{Envelope, MessageHandler, MessageType};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Message handler keeping the near-cache in step with peers
pub struct SyncDispatcher {
    ledger: Arc<Ledger>,
}

impl SyncDispatcher {
    /// Create dispatcher for a ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Subscribe a dispatcher for `ledger` to its own broadcast channel
    pub fn attach(ledger: Arc<Ledger>) -> coins_messaging::Result<JoinHandle<()>> {
        let channel = ledger.context().broadcaster.channel().clone();
        channel.subscribe(Arc::new(Self::new(ledger)))
    }
}

#[async_trait]
impl MessageHandler for SyncDispatcher {
    async fn handle(&self, message: Envelope) -> coins_messaging::Result<()> {
        match message.message_type {
            MessageType::BalanceUpdate => {
                let update: BalanceUpdate = message.decode()?;
                tracing::debug!(player = %update.player, balance = %update.balance, "Peer balance update");
                self.ledger.apply_remote_balance(update);
            }
            MessageType::MultiplierUpdate => {
                let update: MultiplierUpdate = message.decode()?;
                tracing::debug!(
                    multiplier_id = update.multiplier.id(),
                    enabled = update.enabled,
                    "Peer multiplier update"
                );
                self.ledger.multipliers().apply_update(update.multiplier);
            }
            MessageType::MultiplierDisable => {
                let disable: MultiplierDisable = message.decode()?;
                tracing::debug!(multiplier_id = disable.multiplier.id(), "Peer multiplier disable");
                self.ledger.multipliers().apply_disable(&disable.multiplier);
            }
            MessageType::MultiplierRequest => {
                self.ledger.multipliers().replay();
            }
            MessageType::ExecutorRequest | MessageType::ExecutorSend => {
                tracing::trace!(message_type = %message.message_type, "Catalog message, not handled here");
                return Ok(());
            }
        }

        self.ledger.context().metrics.messages_applied.inc();
        Ok(())
    }
}
