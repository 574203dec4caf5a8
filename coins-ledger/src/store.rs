//! Ledger Store seam
//!
//! The durable, authoritative record of balances and multiplier rows. Every
//! implementation must make single-row writes atomic; nothing above this
//! layer assumes cross-row transactions.

use crate::{
    types::{Account, Multiplier, MultiplierKind, PlayerId},
    Result,
};
use rust_decimal::Decimal;

/// Selection applied by [`LedgerStore::list_multipliers`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiplierFilter {
    /// Only rows declared by this realm
    pub realm: Option<String>,

    /// Only rows owned by this player
    pub owner: Option<PlayerId>,

    /// Only rows of this scope
    pub kind: Option<MultiplierKind>,

    /// Only rows with (`true`) or without (`false`) an activation timestamp
    pub enabled: Option<bool>,
}

impl MultiplierFilter {
    /// Rows owned by `owner`
    pub fn owner(owner: PlayerId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    /// Rows declared by `realm`
    pub fn realm(realm: impl Into<String>) -> Self {
        Self {
            realm: Some(realm.into().to_lowercase()),
            ..Self::default()
        }
    }

    /// Whether `multiplier` passes the filter
    pub fn matches(&self, multiplier: &Multiplier) -> bool {
        self.realm
            .as_deref()
            .map_or(true, |realm| multiplier.realm().eq_ignore_ascii_case(realm))
            && self.owner.map_or(true, |owner| multiplier.data().owner() == owner)
            && self.kind.map_or(true, |kind| multiplier.data().kind() == kind)
            && self
                .enabled
                .map_or(true, |enabled| multiplier.has_started() == enabled)
    }
}

/// Durable ledger backend
pub trait LedgerStore: Send + Sync {
    /// Insert an account; an existing id or name is left as is
    fn create_account(&self, id: PlayerId, name: &str, balance: Decimal) -> Result<()>;

    /// Balance of an account, `None` when unknown
    fn read_balance(&self, id: PlayerId) -> Result<Option<Decimal>>;

    /// Overwrite the balance of an existing account
    fn write_balance(&self, id: PlayerId, balance: Decimal) -> Result<()>;

    /// Whether the account exists
    fn account_exists(&self, id: PlayerId) -> Result<bool>;

    /// Whether an account with this (case-insensitive) name exists
    fn account_exists_by_name(&self, name: &str) -> Result<bool>;

    /// Account by (case-insensitive) name
    fn account_by_name(&self, name: &str) -> Result<Option<Account>>;

    /// Top `n` accounts by descending balance
    fn top_n(&self, n: usize) -> Result<Vec<Account>>;

    /// Persist a new multiplier and return its durable id
    fn create_multiplier(&self, multiplier: &Multiplier) -> Result<i64>;

    /// Multiplier row by id
    fn read_multiplier(&self, id: i64) -> Result<Option<Multiplier>>;

    /// Multiplier rows passing `filter` (all rows when `None`)
    fn list_multipliers(&self, filter: Option<&MultiplierFilter>) -> Result<Vec<Multiplier>>;

    /// Delete a multiplier row; deleting a missing row is not an error
    fn delete_multiplier(&self, id: i64) -> Result<()>;

    /// Overwrite the mutable fields (data, timestamps) of a multiplier row
    fn update_multiplier(&self, multiplier: &Multiplier) -> Result<()>;

    /// Whether every process in the cluster writes to this same store
    fn is_shared(&self) -> bool;
}
