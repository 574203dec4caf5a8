//! Main ledger orchestration layer
//!
//! Balance reads go cache first, then store; every committed write is
//! persisted, broadcast to peers, mirrored in the cache and emitted as a local
//! [`BalanceChange`].
//!
//! # Example
//!
//! ```no_run
//! use coins_ledger::{Config, Ledger, LedgerContext, MemoryStore, PlayerId};
//! use coins_messaging::NoopChannel;
//! use std::sync::Arc;
//!
//! # fn main() -> coins_ledger::Result<()> {
//! let ctx = LedgerContext::new(
//!     Config::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoopChannel::new()),
//! );
//! let ledger = Ledger::new(ctx);
//! ledger.bootstrap()?;
//!
//! let steve = PlayerId::new_v4();
//! ledger.create_account(steve, "steve", 100.0)?;
//! ledger.add_balance(steve, 25.0, true)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    context::LedgerContext,
    multiplier::Multipliers,
    protocol::BalanceUpdate,
    types::{Account, BalanceChange, PlayerId, SYSTEM_NAME},
    Error, Result,
};
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

struct TopSnapshot {
    fetched_at: i64,
    accounts: Vec<Account>,
}

/// Main ledger interface
pub struct Ledger {
    ctx: LedgerContext,
    multipliers: Arc<Multipliers>,
    changes: broadcast::Sender<BalanceChange>,
    top: Mutex<Option<TopSnapshot>>,
}

/// Convert a game-facing amount
fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| Error::InvalidAmount(value.to_string()))
}

fn overflow(value: impl std::fmt::Display) -> Error {
    Error::InvalidAmount(format!("{} exceeds the representable range", value))
}

impl Ledger {
    /// Create ledger over a context
    pub fn new(ctx: LedgerContext) -> Self {
        let (changes, _) = broadcast::channel(ctx.config.change_channel_capacity.max(1));
        Self {
            multipliers: Arc::new(Multipliers::new(ctx.clone())),
            ctx,
            changes,
            top: Mutex::new(None),
        }
    }

    /// Shared collaborators
    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }

    /// Multiplier service
    pub fn multipliers(&self) -> &Arc<Multipliers> {
        &self.multipliers
    }

    /// Create the system account and force its balance to zero
    pub fn bootstrap(&self) -> Result<()> {
        let system = PlayerId::system();
        self.ctx
            .store
            .create_account(system, SYSTEM_NAME, Decimal::ZERO)
            .and_then(|_| self.ctx.store.write_balance(system, Decimal::ZERO))
            .map_err(|e| self.ctx.metrics.storage_error(e))?;
        self.ctx.cache.set_balance(system, Decimal::ZERO);

        tracing::info!(realm = %self.ctx.realm(), "Ledger bootstrapped");
        Ok(())
    }

    /// Local balance change notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<BalanceChange> {
        self.changes.subscribe()
    }

    /// Ask peers to replay their multipliers
    pub fn request_multipliers(&self) {
        self.ctx.broadcaster.multiplier_request();
    }

    /// Insert an account
    pub fn create_account(&self, id: PlayerId, name: &str, balance: f64) -> Result<()> {
        let balance = to_decimal(balance)?;
        if id.is_system() && !balance.is_zero() {
            return Err(Error::ReservedAccount(SYSTEM_NAME.to_string()));
        }
        self.ctx
            .store
            .create_account(id, name, balance)
            .map_err(|e| self.ctx.metrics.storage_error(e))
    }

    /// Whether an account exists, registering online players on first sight
    pub fn account_exists(&self, id: PlayerId) -> Result<bool> {
        if self.ctx.cache.balance(id).is_some() {
            return Ok(true);
        }
        self.ensure_registered(id)
    }

    /// Whether an account exists under this name, registering online players on
    /// first sight
    pub fn account_exists_by_name(&self, name: &str) -> Result<bool> {
        if self
            .ctx
            .store
            .account_exists_by_name(name)
            .map_err(|e| self.ctx.metrics.storage_error(e))?
        {
            return Ok(true);
        }

        match self.ctx.presence.id_of(name) {
            Some(id) if self.ctx.presence.is_online_by_name(name) => self.ensure_registered(id),
            _ => Ok(false),
        }
    }

    /// Balance of an account
    pub fn balance(&self, id: PlayerId) -> Result<Decimal> {
        if let Some(balance) = self.ctx.cache.balance(id) {
            self.ctx.metrics.cache_hits.inc();
            return Ok(balance);
        }
        self.ctx.metrics.cache_misses.inc();

        let stored = match self.read_stored(id)? {
            Some(balance) => balance,
            None => {
                if !self.ensure_registered(id)? {
                    return Err(Error::unknown_player(id));
                }
                self.read_stored(id)?.ok_or_else(|| Error::unknown_player(id))?
            }
        };

        self.ctx.cache.set_balance(id, stored);
        self.ctx.broadcaster.balance(id, stored, None);
        tracing::debug!(player = %id, balance = %stored, "Balance cache warmed");

        Ok(self.ctx.cache.balance(id).unwrap_or(stored))
    }

    /// Balance of an account by (case-insensitive) name
    pub fn balance_by_name(&self, name: &str) -> Result<Decimal> {
        let account = self
            .ctx
            .store
            .account_by_name(name)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;

        match account {
            Some(account) => self.balance(account.id),
            None => match self.ctx.presence.id_of(name) {
                Some(id) if self.ctx.presence.is_online(id) => self.balance(id),
                _ => Err(Error::UnknownPlayer(name.to_string())),
            },
        }
    }

    /// Overwrite a balance
    pub fn set_balance(&self, id: PlayerId, value: f64) -> Result<Decimal> {
        self.write(id, to_decimal(value)?)
    }

    /// Credit an account, optionally scaled by usable multipliers
    ///
    /// The factor is the sum of the amounts of every multiplier the player can
    /// use (at least 1), times the player's flat multiplier grant, if any.
    pub fn add_balance(&self, id: PlayerId, amount: f64, apply_multipliers: bool) -> Result<Decimal> {
        let amount = to_decimal(amount)?;
        let factor = if apply_multipliers {
            self.factor_for(id)?
        } else {
            Decimal::ONE
        };

        let credit = amount.checked_mul(factor).ok_or_else(|| overflow(amount))?;
        self.credit(id, credit)
    }

    /// Debit an account; the result may go negative
    pub fn take_balance(&self, id: PlayerId, amount: f64) -> Result<Decimal> {
        let amount = to_decimal(amount)?;
        let current = self.balance(id)?;
        let next = current.checked_sub(amount).ok_or_else(|| overflow(amount))?;
        self.write(id, next)
    }

    /// Set a balance back to the configured starting balance
    pub fn reset_balance(&self, id: PlayerId) -> Result<Decimal> {
        self.write(id, self.ctx.config.starting_balance)
    }

    /// Move funds between two player accounts
    ///
    /// Debit and credit are separate writes. When the credit fails, the payer
    /// is refunded on a best-effort basis and the credit's error is returned.
    pub fn pay(&self, from: PlayerId, to: PlayerId, amount: f64) -> Result<()> {
        if from.is_system() || to.is_system() {
            return Err(Error::ReservedAccount(SYSTEM_NAME.to_string()));
        }

        let amount = to_decimal(amount)?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount.to_string()));
        }

        let available = self.balance(from)?;
        self.balance(to)?;
        if available < amount {
            return Err(Error::NoFunds {
                required: amount.to_string(),
                available: available.to_string(),
            });
        }

        self.write(from, available - amount)?;

        if let Err(e) = self.credit(to, amount) {
            tracing::error!(from = %from, to = %to, amount = %amount, "Payment credit failed: {}", e);
            match self.credit(from, amount) {
                Ok(_) => tracing::warn!(player = %from, amount = %amount, "Payment debit refunded"),
                Err(refund) => tracing::error!(
                    player = %from,
                    amount = %amount,
                    "Payment refund failed, funds lost: {}",
                    refund
                ),
            }
            return Err(e);
        }

        tracing::debug!(from = %from, to = %to, amount = %amount, "Payment completed");
        Ok(())
    }

    /// Richest `n` player accounts
    ///
    /// Served from a snapshot while it is younger than the configured TTL and
    /// holds at least `n` entries.
    pub fn top_players(&self, n: usize) -> Result<Vec<Account>> {
        let now = self.ctx.now();
        let mut top = self.top.lock();

        if let Some(snapshot) = top.as_ref() {
            let fresh = now - snapshot.fetched_at < self.ctx.config.top_cache_ttl_millis();
            if fresh && snapshot.accounts.len() >= n {
                return Ok(snapshot.accounts[..n].to_vec());
            }
        }

        let mut accounts = self
            .ctx
            .store
            .top_n(n.saturating_add(1))
            .map_err(|e| self.ctx.metrics.storage_error(e))?;
        accounts.retain(|account| !account.id.is_system());
        accounts.truncate(n);

        *top = Some(TopSnapshot {
            fetched_at: now,
            accounts: accounts.clone(),
        });
        Ok(accounts)
    }

    /// Apply a peer's balance write to the cache
    pub(crate) fn apply_remote_balance(&self, update: BalanceUpdate) {
        self.ctx.cache.set_balance(update.player, update.balance);
        if update.previous.is_some() {
            let _ = self.changes.send(BalanceChange {
                player: update.player,
                previous: update.previous,
                balance: update.balance,
            });
        }
    }

    fn factor_for(&self, id: PlayerId) -> Result<Decimal> {
        let sum: i64 = self
            .multipliers
            .usable_by(id)
            .iter()
            .map(|m| i64::from(m.data().amount()))
            .sum();
        let factor = Decimal::from(sum.max(1));

        match self.ctx.capabilities.flat_multiplier(id) {
            Some(flat) => factor
                .checked_mul(Decimal::from(flat))
                .ok_or_else(|| overflow(flat)),
            None => Ok(factor),
        }
    }

    fn credit(&self, id: PlayerId, amount: Decimal) -> Result<Decimal> {
        let current = self.balance(id)?;
        let next = current.checked_add(amount).ok_or_else(|| overflow(amount))?;
        self.write(id, next)
    }

    fn write(&self, id: PlayerId, balance: Decimal) -> Result<Decimal> {
        if id.is_system() && !balance.is_zero() {
            return Err(Error::ReservedAccount(SYSTEM_NAME.to_string()));
        }

        let previous = self.balance(id)?;
        self.ctx
            .store
            .write_balance(id, balance)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;

        self.ctx.broadcaster.balance(id, balance, Some(previous));
        self.ctx.cache.set_balance(id, balance);
        self.ctx.metrics.balance_writes.inc();

        let _ = self.changes.send(BalanceChange {
            player: id,
            previous: Some(previous),
            balance,
        });

        tracing::debug!(player = %id, previous = %previous, balance = %balance, "Balance written");
        Ok(balance)
    }

    fn read_stored(&self, id: PlayerId) -> Result<Option<Decimal>> {
        self.ctx
            .store
            .read_balance(id)
            .map_err(|e| self.ctx.metrics.storage_error(e))
    }

    fn ensure_registered(&self, id: PlayerId) -> Result<bool> {
        let exists = self
            .ctx
            .store
            .account_exists(id)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;
        if exists {
            return Ok(true);
        }
        if !self.ctx.presence.is_online(id) {
            return Ok(false);
        }

        let name = self
            .ctx
            .presence
            .name_of(id)
            .unwrap_or_else(|| id.to_string());
        self.ctx
            .store
            .create_account(id, &name, self.ctx.config.starting_balance)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;

        tracing::info!(player = %id, name = %name, "Registered account for online player");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PermissionCapabilities;
    use crate::test_support::{capture_logs, faulty_node, node, TestNode};
    use crate::types::MultiplierKind;
    use crate::LedgerStore;
    use coins_messaging::MessageType;

    fn ledger(node: &TestNode) -> Ledger {
        let ledger = Ledger::new(node.ctx.clone());
        ledger.bootstrap().unwrap();
        ledger
    }

    fn account(ledger: &Ledger, name: &str, balance: f64) -> PlayerId {
        let id = PlayerId::new_v4();
        ledger.create_account(id, name, balance).unwrap();
        id
    }

    #[test]
    fn test_cache_miss_warms_cache() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let id = PlayerId::new_v4();
        node.store
            .create_account(id, "steve", Decimal::from(25))
            .unwrap();

        assert_eq!(node.ctx.cache.balance(id), None);
        assert_eq!(ledger.balance(id).unwrap(), Decimal::from(25));
        assert_eq!(node.ctx.cache.balance(id), Some(Decimal::from(25)));
        assert_eq!(node.channel.sent(MessageType::BalanceUpdate).len(), 1);

        ledger.balance(id).unwrap();
        assert_eq!(node.ctx.metrics.cache_hits.get(), 1);
        assert_eq!(node.ctx.metrics.cache_misses.get(), 1);
    }

    #[test]
    fn test_unknown_player() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let ghost = PlayerId::new_v4();

        assert!(matches!(ledger.balance(ghost), Err(Error::UnknownPlayer(_))));
        assert!(matches!(ledger.set_balance(ghost, 5.0), Err(Error::UnknownPlayer(_))));
        assert!(!ledger.account_exists(ghost).unwrap());
    }

    #[test]
    fn test_online_player_registered_with_starting_balance() {
        let mut node = node("lobby");
        let mut config = (*node.ctx.config).clone();
        config.starting_balance = Decimal::from(50);
        node.ctx.config = Arc::new(config);
        let ledger = ledger(&node);

        let id = PlayerId::new_v4();
        node.presence.join(id, "Newcomer");

        assert!(ledger.account_exists_by_name("newcomer").unwrap());
        assert_eq!(ledger.balance(id).unwrap(), Decimal::from(50));
        assert_eq!(ledger.balance_by_name("NEWCOMER").unwrap(), Decimal::from(50));
    }

    #[test]
    fn test_set_balance_rejects_non_finite() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let id = account(&ledger, "steve", 10.0);

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, f64::MAX] {
            let err = ledger.set_balance(id, value).unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)), "{} accepted", value);
            assert_eq!(err.message_key(), "Errors.Max value exceeded");
        }
        assert_eq!(ledger.balance(id).unwrap(), Decimal::from(10));
    }

    #[test]
    fn test_system_account_guard() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let system = PlayerId::system();
        let steve = account(&ledger, "steve", 10.0);

        assert_eq!(ledger.balance(system).unwrap(), Decimal::ZERO);
        assert!(matches!(
            ledger.set_balance(system, 1.0),
            Err(Error::ReservedAccount(_))
        ));
        assert!(matches!(
            ledger.add_balance(system, 1.0, false),
            Err(Error::ReservedAccount(_))
        ));
        assert!(matches!(ledger.pay(steve, system, 1.0), Err(Error::ReservedAccount(_))));
        assert!(matches!(ledger.pay(system, steve, 1.0), Err(Error::ReservedAccount(_))));
        assert_eq!(ledger.set_balance(system, 0.0).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_bootstrap_forces_zero() {
        let node = node("lobby");
        node.store
            .create_account(PlayerId::system(), SYSTEM_NAME, Decimal::from(7))
            .unwrap();

        let ledger = ledger(&node);
        assert_eq!(
            node.store.read_balance(PlayerId::system()).unwrap(),
            Some(Decimal::ZERO)
        );
        assert_eq!(ledger.balance(PlayerId::system()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_pay() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 100.0);
        let b = account(&ledger, "b", 0.0);

        ledger.pay(a, b, 40.0).unwrap();
        assert_eq!(ledger.balance(a).unwrap(), Decimal::from(60));
        assert_eq!(ledger.balance(b).unwrap(), Decimal::from(40));

        let err = ledger.pay(a, b, 1_000.0).unwrap_err();
        assert!(matches!(err, Error::NoFunds { .. }));
        assert_eq!(ledger.balance(a).unwrap(), Decimal::from(60));
        assert_eq!(ledger.balance(b).unwrap(), Decimal::from(40));

        assert!(matches!(ledger.pay(a, b, 0.0), Err(Error::InvalidAmount(_))));
        assert!(matches!(ledger.pay(a, b, -5.0), Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_pay_unknown_payee_leaves_payer() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 100.0);

        assert!(matches!(
            ledger.pay(a, PlayerId::new_v4(), 10.0),
            Err(Error::UnknownPlayer(_))
        ));
        assert_eq!(ledger.balance(a).unwrap(), Decimal::from(100));
    }

    #[test]
    fn test_pay_refunds_payer_when_credit_fails() {
        let node = faulty_node("lobby");
        let ledger = Ledger::new(node.ctx.clone());
        ledger.bootstrap().unwrap();
        let a = account(&ledger, "a", 100.0);
        let b = account(&ledger, "b", 5.0);
        node.store.fail_balance_writes_after(b, 0);

        let err = ledger.pay(a, b, 40.0).unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains(&b.to_string()));

        assert_eq!(ledger.balance(a).unwrap(), Decimal::from(100));
        assert_eq!(ledger.balance(b).unwrap(), Decimal::from(5));
        assert_eq!(node.store.read_balance(a).unwrap(), Some(Decimal::from(100)));
        // debit and refund both reached peers; the failed credit did not
        let writes = node
            .channel
            .sent(MessageType::BalanceUpdate)
            .into_iter()
            .filter(|e| e.payload.get("previous").is_some())
            .count();
        assert_eq!(writes, 2);
    }

    #[test]
    fn test_pay_failed_refund_leaves_payer_debited() {
        let node = faulty_node("lobby");
        let ledger = Ledger::new(node.ctx.clone());
        ledger.bootstrap().unwrap();
        let a = account(&ledger, "a", 100.0);
        let b = account(&ledger, "b", 5.0);
        node.store.fail_balance_writes_after(a, 1);
        node.store.fail_balance_writes_after(b, 0);

        let (result, logs) = capture_logs(|| ledger.pay(a, b, 40.0));
        assert!(result.unwrap_err().to_string().contains(&b.to_string()));

        assert_eq!(ledger.balance(a).unwrap(), Decimal::from(60));
        assert_eq!(node.store.read_balance(a).unwrap(), Some(Decimal::from(60)));
        assert_eq!(ledger.balance(b).unwrap(), Decimal::from(5));
        assert_eq!(node.ctx.metrics.storage_errors.get(), 2);
        assert!(logs.contains("Payment refund failed"), "logs: {}", logs);
    }

    #[test]
    fn test_storage_failure_leaves_balance() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 100.0);
        ledger.balance(a).unwrap();

        node.store.set_failing(true);
        let err = ledger.set_balance(a, 5.0).unwrap_err();
        assert_eq!(err.message_key(), "Errors.Database");
        assert_eq!(node.ctx.cache.balance(a), Some(Decimal::from(100)));
    }

    #[test]
    fn test_take_may_go_negative() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 10.0);

        assert_eq!(ledger.take_balance(a, 25.0).unwrap(), Decimal::from(-15));
        assert_eq!(ledger.reset_balance(a).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_add_balance_applies_multipliers() {
        let node = node("lobby");
        let caps = Arc::new(PermissionCapabilities::new());
        let mut node = node;
        node.ctx = node.ctx.clone().with_capabilities(caps.clone());
        let ledger = ledger(&node);

        let a = account(&ledger, "a", 0.0);
        assert_eq!(ledger.add_balance(a, 10.0, true).unwrap(), Decimal::from(10));

        let server = ledger
            .multipliers()
            .create(None, 3, 10, Some("lobby"), MultiplierKind::Server)
            .unwrap();
        let personal = ledger
            .multipliers()
            .create(Some(a), 2, 10, Some("lobby"), MultiplierKind::Personal)
            .unwrap();
        ledger.multipliers().enable(server.id()).unwrap();
        ledger.multipliers().enable(personal.id()).unwrap();

        // 3 + 2
        assert_eq!(ledger.add_balance(a, 10.0, true).unwrap(), Decimal::from(60));
        assert_eq!(ledger.add_balance(a, 10.0, false).unwrap(), Decimal::from(70));

        caps.set_grants(a, vec!["coins.multiplier.x2".into()]);
        assert_eq!(ledger.add_balance(a, 1.0, true).unwrap(), Decimal::from(80));
    }

    #[test]
    fn test_top_players_snapshot_ttl() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 5.0);
        account(&ledger, "b", 50.0);
        account(&ledger, "c", 20.0);

        let names = |accounts: Vec<Account>| -> Vec<String> {
            accounts.into_iter().map(|a| a.name).collect()
        };

        assert_eq!(names(ledger.top_players(2).unwrap()), vec!["b", "c"]);

        node.store.write_balance(a, Decimal::from(500)).unwrap();
        node.clock.advance(29_000);
        assert_eq!(names(ledger.top_players(2).unwrap()), vec!["b", "c"]);

        node.clock.advance(1_000);
        assert_eq!(names(ledger.top_players(2).unwrap()), vec!["a", "b"]);
        assert!(ledger
            .top_players(10)
            .unwrap()
            .iter()
            .all(|account| !account.id.is_system()));
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let node = node("lobby");
        let ledger = ledger(&node);
        let a = account(&ledger, "a", 10.0);
        let mut changes = ledger.subscribe_changes();

        ledger.add_balance(a, 5.0, false).unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.player, a);
        assert_eq!(change.delta(), Some(Decimal::from(5)));
    }
}
