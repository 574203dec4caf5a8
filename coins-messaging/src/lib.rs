//! Coins cluster broadcast channel
//!
//! Best-effort pub/sub fabric shared by every game-server process:
//! - Self-describing envelopes (type tag + JSON payload)
//! - Fire and forget publishing, no ordering or delivery guarantee
//! - Self-echo filtered by origin node id
//! - NATS core pub/sub, in-process hub, and a disabled channel
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod error;
pub mod local;
pub mod message;
pub mod metrics;
pub mod nats;
pub mod types;

pub use channel::{BroadcastChannel, MessageHandler, NoopChannel};
pub use error::{Error, Result};
pub use local::{LocalChannel, LocalHub};
pub use message::Envelope;
pub use nats::{NatsChannel, NatsConfig};
pub use types::MessageType;
