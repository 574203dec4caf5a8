//! In-memory Ledger Store
//!
//! Shared by every node holding a clone, so several in-process nodes can
//! stand in for a cluster pointed at one database.

use crate::{
    store::{LedgerStore, MultiplierFilter},
    types::{Account, Multiplier, PlayerId},
    Error, Result,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    accounts: HashMap<PlayerId, Account>,
    names: HashMap<String, PlayerId>,
    multipliers: BTreeMap<i64, Multiplier>,
    next_multiplier_id: i64,
}

/// Memory-backed store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn create_account(&self, id: PlayerId, name: &str, balance: Decimal) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.write();
        let name = name.to_lowercase();

        if tables.accounts.contains_key(&id) || tables.names.contains_key(&name) {
            return Ok(());
        }

        tables.names.insert(name.clone(), id);
        tables.accounts.insert(id, Account::new(id, name, balance));
        Ok(())
    }

    fn read_balance(&self, id: PlayerId) -> Result<Option<Decimal>> {
        self.check()?;
        Ok(self.tables.read().accounts.get(&id).map(|a| a.balance))
    }

    fn write_balance(&self, id: PlayerId, balance: Decimal) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.write();
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_player(id))?;
        account.balance = balance;
        Ok(())
    }

    fn account_exists(&self, id: PlayerId) -> Result<bool> {
        self.check()?;
        Ok(self.tables.read().accounts.contains_key(&id))
    }

    fn account_exists_by_name(&self, name: &str) -> Result<bool> {
        self.check()?;
        Ok(self.tables.read().names.contains_key(&name.to_lowercase()))
    }

    fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        self.check()?;
        let tables = self.tables.read();
        Ok(tables
            .names
            .get(&name.to_lowercase())
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn top_n(&self, n: usize) -> Result<Vec<Account>> {
        self.check()?;
        let mut accounts: Vec<Account> = self.tables.read().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.name.cmp(&b.name)));
        accounts.truncate(n);
        Ok(accounts)
    }

    fn create_multiplier(&self, multiplier: &Multiplier) -> Result<i64> {
        self.check()?;
        let mut tables = self.tables.write();
        let id = tables.next_multiplier_id;
        tables.next_multiplier_id += 1;

        let mut row = multiplier.clone();
        row.assign_id(id);
        tables.multipliers.insert(id, row);
        Ok(id)
    }

    fn read_multiplier(&self, id: i64) -> Result<Option<Multiplier>> {
        self.check()?;
        Ok(self.tables.read().multipliers.get(&id).cloned())
    }

    fn list_multipliers(&self, filter: Option<&MultiplierFilter>) -> Result<Vec<Multiplier>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .multipliers
            .values()
            .filter(|m| filter.map_or(true, |f| f.matches(m)))
            .cloned()
            .collect())
    }

    fn delete_multiplier(&self, id: i64) -> Result<()> {
        self.check()?;
        self.tables.write().multipliers.remove(&id);
        Ok(())
    }

    fn update_multiplier(&self, multiplier: &Multiplier) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.write();
        match tables.multipliers.get_mut(&multiplier.id()) {
            Some(row) => {
                *row = multiplier.clone();
                Ok(())
            }
            None => Err(Error::UnknownMultiplier(multiplier.id())),
        }
    }

    fn is_shared(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MultiplierData, MultiplierKind};

    fn server_multiplier(realm: &str) -> Multiplier {
        Multiplier::new(
            Some(realm),
            MultiplierData::system(2, 30, MultiplierKind::Server).unwrap(),
        )
    }

    #[test]
    fn test_create_account_is_idempotent() {
        let store = MemoryStore::new();
        let id = PlayerId::new_v4();

        store.create_account(id, "Steve", Decimal::from(10)).unwrap();
        store.create_account(id, "steve", Decimal::from(99)).unwrap();

        assert_eq!(store.read_balance(id).unwrap(), Some(Decimal::from(10)));
        assert!(store.account_exists_by_name("STEVE").unwrap());
        assert_eq!(store.account_by_name("steve").unwrap().unwrap().id, id);
    }

    #[test]
    fn test_write_balance_unknown_account() {
        let store = MemoryStore::new();
        let err = store.write_balance(PlayerId::new_v4(), Decimal::ONE).unwrap_err();
        assert!(matches!(err, Error::UnknownPlayer(_)));
    }

    #[test]
    fn test_top_n_orders_by_balance() {
        let store = MemoryStore::new();
        for (name, balance) in [("a", 5), ("b", 50), ("c", 20)] {
            store
                .create_account(PlayerId::new_v4(), name, Decimal::from(balance))
                .unwrap();
        }

        let top = store.top_n(2).unwrap();
        let names: Vec<_> = top.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_multiplier_ids_are_sequential() {
        let store = MemoryStore::new();
        let first = store.create_multiplier(&server_multiplier("lobby")).unwrap();
        let second = store.create_multiplier(&server_multiplier("survival")).unwrap();
        assert_eq!(second, first + 1);

        let lobby = store
            .list_multipliers(Some(&MultiplierFilter::realm("LOBBY")))
            .unwrap();
        assert_eq!(lobby.len(), 1);
        assert_eq!(lobby[0].id(), first);

        store.delete_multiplier(first).unwrap();
        store.delete_multiplier(first).unwrap();
        assert!(store.read_multiplier(first).unwrap().is_none());
    }

    #[test]
    fn test_failing_store() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let err = store.account_exists(PlayerId::new_v4()).unwrap_err();
        assert!(err.is_storage());
    }
}
