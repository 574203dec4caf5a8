//! Type definitions for the broadcast channel

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type tag carried by every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Account balance changed (player, new balance, optional previous balance)
    BalanceUpdate,
    /// Multiplier created, edited, queued on a peer, or just enabled
    MultiplierUpdate,
    /// Multiplier disabled and removed
    MultiplierDisable,
    /// Ask peers to replay every multiplier they hold
    MultiplierRequest,
    /// Reward catalog request
    ExecutorRequest,
    /// Reward catalog entry
    ExecutorSend,
}

impl MessageType {
    /// Subject segment appended to the channel subject for this type
    pub fn subject_segment(&self) -> &'static str {
        match self {
            MessageType::BalanceUpdate => "balance.update",
            MessageType::MultiplierUpdate => "multiplier.update",
            MessageType::MultiplierDisable => "multiplier.disable",
            MessageType::MultiplierRequest => "multiplier.request",
            MessageType::ExecutorRequest => "executor.request",
            MessageType::ExecutorSend => "executor.send",
        }
    }

    /// Whether this type belongs to the balance/multiplier core
    ///
    /// Catalog traffic rides the same channel but is routed past the core.
    pub fn is_core(&self) -> bool {
        !matches!(self, MessageType::ExecutorRequest | MessageType::ExecutorSend)
    }

    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            MessageType::BalanceUpdate => "balance_update",
            MessageType::MultiplierUpdate => "multiplier_update",
            MessageType::MultiplierDisable => "multiplier_disable",
            MessageType::MultiplierRequest => "multiplier_request",
            MessageType::ExecutorRequest => "executor_request",
            MessageType::ExecutorSend => "executor_send",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Sanitize a string for use as a NATS subject token
pub(crate) fn sanitize_subject(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
