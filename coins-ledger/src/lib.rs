//! Coins Ledger Core
//!
//! Shared virtual-currency ledger for a cluster of game-server processes.
//!
//! # Architecture
//!
//! - **Near-Cache**: In-process mirror of balances and multipliers
//! - **Ledger Store**: Durable source of truth (PostgreSQL shared by the
//!   cluster, node-local RocksDB, or in-memory)
//! - **Broadcast Channel**: Best-effort peer sync over `coins-messaging`
//! - **Multipliers**: Activation, queueing and lazy expiry of credit bonuses
//! - **Poller**: Periodic cache/store reconciliation and queue promotion
//!
//! # Invariants
//!
//! - The system account never holds a nonzero balance
//! - Per realm, at most one enabled server multiplier, one enabled global
//!   multiplier, and one enabled personal multiplier per owner (per node,
//!   best effort across the cluster)
//! - Multiplier state is derived from timestamps only

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod broadcast;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod multiplier;
pub mod poller;
pub mod presence;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports
pub use cache::{LocalCache, NearCache, RealmMultipliers};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::LedgerContext;
pub use database::PgStore;
pub use dispatch::SyncDispatcher;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use memory::MemoryStore;
pub use multiplier::Multipliers;
pub use poller::{PollReport, Poller, PollerHandle};
pub use presence::{
    Capabilities, NoCapabilities, PermissionCapabilities, Presence, StaticPresence,
};
pub use storage::RocksStore;
pub use store::{LedgerStore, MultiplierFilter};
pub use types::{
    Account, BalanceChange, Multiplier, MultiplierData, MultiplierKind, MultiplierState, PlayerId,
};
