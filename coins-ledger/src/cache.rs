//! Near-Cache
//!
//! In-process mirror of balances and multipliers. May be stale or incomplete;
//! an absent balance means "unknown", never zero.

use crate::types::{Multiplier, PlayerId};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Result of a realm read with promote-on-read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmMultipliers {
    /// Enabled multipliers visible in the realm
    pub active: Vec<Multiplier>,

    /// Id of the queued multiplier activated by this read, if any
    pub promoted: Option<i64>,
}

/// In-process mirror of the ledger
pub trait NearCache: Send + Sync {
    /// Cached balance, `None` when unknown
    fn balance(&self, id: PlayerId) -> Option<Decimal>;

    /// Overwrite a cached balance
    fn set_balance(&self, id: PlayerId, balance: Decimal);

    /// Drop a cached balance
    fn evict(&self, id: PlayerId);

    /// Players with a cached balance
    fn players(&self) -> Vec<PlayerId>;

    /// Cached multiplier
    fn multiplier(&self, id: i64) -> Option<Multiplier>;

    /// Insert or overwrite a multiplier
    fn put_multiplier(&self, multiplier: Multiplier);

    /// Remove a multiplier, returning it when present
    fn remove_multiplier(&self, id: i64) -> Option<Multiplier>;

    /// Every cached multiplier, ordered by id
    fn multipliers(&self) -> Vec<Multiplier>;

    /// Enabled multipliers visible in `realm` (no side effects)
    fn enabled_in_realm(&self, realm: &str, now: i64) -> Vec<Multiplier>;

    /// Enabled multipliers visible in `realm`, promoting the earliest queued
    /// one when none is enabled
    fn multipliers_for_realm(&self, realm: &str, now: i64) -> RealmMultipliers;
}

/// DashMap backed near-cache
#[derive(Default)]
pub struct LocalCache {
    balances: DashMap<PlayerId, Decimal>,
    multipliers: RwLock<BTreeMap<i64, Multiplier>>,
}

impl LocalCache {
    /// Create empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

fn enabled_visible<'a>(
    multipliers: impl Iterator<Item = &'a Multiplier>,
    realm: &'a str,
    now: i64,
) -> impl Iterator<Item = &'a Multiplier> {
    multipliers.filter(move |m| m.visible_in(realm) && m.is_enabled(now))
}

impl NearCache for LocalCache {
    fn balance(&self, id: PlayerId) -> Option<Decimal> {
        self.balances.get(&id).map(|entry| *entry.value())
    }

    fn set_balance(&self, id: PlayerId, balance: Decimal) {
        self.balances.insert(id, balance);
    }

    fn evict(&self, id: PlayerId) {
        self.balances.remove(&id);
    }

    fn players(&self) -> Vec<PlayerId> {
        self.balances.iter().map(|entry| *entry.key()).collect()
    }

    fn multiplier(&self, id: i64) -> Option<Multiplier> {
        self.multipliers.read().get(&id).cloned()
    }

    fn put_multiplier(&self, multiplier: Multiplier) {
        self.multipliers.write().insert(multiplier.id(), multiplier);
    }

    fn remove_multiplier(&self, id: i64) -> Option<Multiplier> {
        self.multipliers.write().remove(&id)
    }

    fn multipliers(&self) -> Vec<Multiplier> {
        self.multipliers.read().values().cloned().collect()
    }

    fn enabled_in_realm(&self, realm: &str, now: i64) -> Vec<Multiplier> {
        let multipliers = self.multipliers.read();
        enabled_visible(multipliers.values(), realm, now)
            .cloned()
            .collect()
    }

    fn multipliers_for_realm(&self, realm: &str, now: i64) -> RealmMultipliers {
        let mut multipliers = self.multipliers.write();

        let active: Vec<Multiplier> = enabled_visible(multipliers.values(), realm, now)
            .cloned()
            .collect();
        if !active.is_empty() {
            return RealmMultipliers {
                active,
                promoted: None,
            };
        }

        // BTreeMap iterates by id, so min_by_key keeps the lowest id on ties
        let candidate = multipliers
            .values()
            .filter(|m| m.visible_in(realm) && m.is_queued(now))
            .min_by_key(|m| m.queue_millis())
            .map(Multiplier::id);

        match candidate.and_then(|id| multipliers.get_mut(&id)) {
            Some(next) => {
                next.activate(now);
                tracing::debug!(multiplier_id = next.id(), realm, "Promoted queued multiplier");
                RealmMultipliers {
                    active: vec![next.clone()],
                    promoted: Some(next.id()),
                }
            }
            None => RealmMultipliers::default(),
        }
    }
}
