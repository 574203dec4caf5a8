//! Error types for the ledger
//!
//! Every variant is an expected runtime failure and doubles as the structured
//! result handed back to callers: [`Error::message_key`] names the localized
//! message and [`Error::target`] fills its `%target%` placeholder. Call-site
//! bugs (enabling an unpersisted multiplier) are not represented here; they
//! panic.

use crate::types::PlayerId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is NaN, infinite, or outside the representable range
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Operation targets the reserved multiplier account
    #[error("Reserved account: {0}")]
    ReservedAccount(String),

    /// Account not registered and player not online
    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    /// Multiplier id not found in cache or storage
    #[error("Unknown multiplier: #{0}")]
    UnknownMultiplier(i64),

    /// Multiplier already enabled, edit rejected
    #[error("Multiplier #{0} is active")]
    MultiplierActive(i64),

    /// Payer balance below the requested amount
    #[error("Insufficient funds: required {required}, available {available}")]
    NoFunds {
        /// Requested amount
        required: String,
        /// Balance at check time
        available: String,
    },

    /// Invalid multiplier data
    #[error("Invalid multiplier: {0}")]
    InvalidMultiplier(String),

    /// Storage error (RocksDB, PostgreSQL, or other backend)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Unknown player helper
    pub fn unknown_player(id: PlayerId) -> Self {
        Error::UnknownPlayer(id.to_string())
    }

    /// Localized message key for this failure
    pub fn message_key(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "Errors.Max value exceeded",
            Error::ReservedAccount(_) => "Errors.Reserved account",
            Error::UnknownPlayer(_) => "Errors.Unknown player",
            Error::UnknownMultiplier(_) => "Errors.Unknown multiplier",
            Error::MultiplierActive(_) => "Errors.Multiplier active",
            Error::NoFunds { .. } => "Errors.No Coins",
            Error::InvalidMultiplier(_) => "Errors.Invalid multiplier",
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => "Errors.Database",
            Error::Config(_) => "Errors.Config",
        }
    }

    /// Value for the `%target%` placeholder, when the message has one
    pub fn target(&self) -> Option<String> {
        match self {
            Error::UnknownPlayer(target) => Some(target.clone()),
            Error::UnknownMultiplier(id) | Error::MultiplierActive(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Whether the failure came from the storage tier
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Serialization(_) | Error::Io(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
