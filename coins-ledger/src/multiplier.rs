//! Multiplier state machine
//!
//! ```text
//! Unpersisted ──create──▶ Ready ──enable──▶ Enabled ──expiry/disable──▶ (removed)
//!                           │                  ▲
//!                           └──enable, blocked─┴──▶ Queued ──promote──┘
//! ```
//!
//! Activation and deactivation run under one activation lock per node. The
//! lock covers the exclusivity check and the cache write; persistence and
//! broadcast happen after it is released. Exclusivity across nodes is best
//! effort: two nodes may both activate before either hears of the other.

use crate::{
    context::LedgerContext,
    types::{validate_minutes, Multiplier, MultiplierData, MultiplierKind, PlayerId},
    Error, Result,
};
use parking_lot::Mutex;
use std::collections::HashSet;

enum Activation {
    AlreadyEnabled,
    Activated {
        previous: Multiplier,
        current: Multiplier,
    },
    Queued {
        newly: bool,
        current: Multiplier,
    },
    Expired,
}

/// Multiplier lifecycle service for one node
pub struct Multipliers {
    ctx: LedgerContext,
    activation: Mutex<()>,
}

impl Multipliers {
    /// Create service over a context
    pub fn new(ctx: LedgerContext) -> Self {
        Self {
            ctx,
            activation: Mutex::new(()),
        }
    }

    /// Persist and cache a new multiplier
    ///
    /// `owner = None` creates a system-owned multiplier. `realm = None` declares
    /// no realm, which turns a `Server` multiplier into a `Global` one.
    pub fn create(
        &self,
        owner: Option<PlayerId>,
        amount: i32,
        minutes: i32,
        realm: Option<&str>,
        kind: MultiplierKind,
    ) -> Result<Multiplier> {
        let data = match owner {
            Some(owner) if !owner.is_system() => {
                let name = self
                    .ctx
                    .presence
                    .name_of(owner)
                    .unwrap_or_else(|| owner.to_string());
                MultiplierData::new(owner, name, amount, minutes, kind)?
            }
            _ => MultiplierData::system(amount, minutes, kind)?,
        };

        let mut multiplier = Multiplier::new(realm, data);
        let id = self
            .ctx
            .store
            .create_multiplier(&multiplier)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;
        multiplier.assign_id(id);

        self.ctx.cache.put_multiplier(multiplier.clone());
        self.ctx.broadcaster.multiplier_update(&multiplier, false);

        tracing::info!(
            multiplier_id = id,
            owner = %multiplier.data().owner_name(),
            kind = %multiplier.data().kind(),
            "Multiplier created"
        );
        Ok(multiplier)
    }

    /// Activate a multiplier, or queue it when its class is taken
    ///
    /// Returns whether the multiplier is enabled afterwards.
    ///
    /// # Panics
    ///
    /// When `id` is negative: only persisted multipliers can be enabled.
    pub fn enable(&self, id: i64) -> Result<bool> {
        assert!(id >= 0, "cannot enable unpersisted multiplier #{}", id);

        let now = self.ctx.now();
        let outcome = {
            let _guard = self.activation.lock();
            let multiplier = self.lookup(id)?.ok_or(Error::UnknownMultiplier(id))?;

            if multiplier.is_enabled(now) {
                Activation::AlreadyEnabled
            } else if multiplier.has_started() {
                // Cache it so the disable below finds the row
                self.ctx.cache.put_multiplier(multiplier);
                Activation::Expired
            } else {
                let blocked = self
                    .ctx
                    .cache
                    .enabled_in_realm(multiplier.realm(), now)
                    .iter()
                    .any(|active| active.blocks(&multiplier, now));

                let mut current = multiplier.clone();
                if blocked {
                    current.enqueue(now);
                    self.ctx.cache.put_multiplier(current.clone());
                    Activation::Queued {
                        newly: multiplier.queue_millis() == 0,
                        current,
                    }
                } else {
                    current.activate(now);
                    self.ctx.cache.put_multiplier(current.clone());
                    Activation::Activated {
                        previous: multiplier,
                        current,
                    }
                }
            }
        };

        match outcome {
            Activation::AlreadyEnabled => Ok(true),
            Activation::Expired => {
                self.disable(id);
                Ok(false)
            }
            Activation::Activated { previous, current } => {
                if let Err(e) = self.ctx.store.update_multiplier(&current) {
                    tracing::error!(multiplier_id = id, "Failed to persist activation: {}", e);
                    let _guard = self.activation.lock();
                    self.ctx.cache.put_multiplier(previous);
                    return Err(self.ctx.metrics.storage_error(e));
                }
                self.announce_enabled(&current);
                Ok(true)
            }
            Activation::Queued { newly, current } => {
                if newly {
                    // Reconciliation compares the cache against this row
                    if let Err(e) = self.ctx.store.update_multiplier(&current) {
                        self.ctx.metrics.storage_error(e);
                        tracing::warn!(multiplier_id = id, "Failed to persist queue entry");
                    }
                }
                self.ctx.metrics.multipliers_queued.inc();
                tracing::info!(multiplier_id = id, "Multiplier queued");
                Ok(false)
            }
        }
    }

    /// Disable and remove an activated multiplier
    ///
    /// No-op unless the cached entry has been activated. Never fails; store
    /// errors are logged.
    pub fn disable(&self, id: i64) {
        let removed = {
            let _guard = self.activation.lock();
            match self.ctx.cache.multiplier(id) {
                Some(multiplier) if multiplier.has_started() => {
                    self.ctx.cache.remove_multiplier(id)
                }
                _ => None,
            }
        };

        let multiplier = match removed {
            Some(multiplier) => multiplier,
            None => return,
        };

        if let Err(e) = self.ctx.store.delete_multiplier(id) {
            tracing::error!(multiplier_id = id, "Failed to delete multiplier row: {}", e);
            self.ctx.metrics.storage_error(e);
        }
        self.ctx.broadcaster.multiplier_disable(&multiplier);
        self.ctx.metrics.multipliers_disabled.inc();

        tracing::info!(multiplier_id = id, "Multiplier disabled");
    }

    /// Disable every cached multiplier whose window has elapsed
    pub fn sweep_expired(&self) -> usize {
        let now = self.ctx.now();
        let expired: Vec<i64> = self
            .ctx
            .cache
            .multipliers()
            .iter()
            .filter(|m| m.is_expired(now))
            .map(Multiplier::id)
            .collect();

        for id in &expired {
            self.disable(*id);
        }
        expired.len()
    }

    /// Enabled multipliers visible in `realm`
    ///
    /// When none is enabled, the earliest queued one is promoted, persisted
    /// and announced.
    pub fn active_in_realm(&self, realm: &str) -> Vec<Multiplier> {
        self.sweep_expired();

        let now = self.ctx.now();
        let read = {
            let _guard = self.activation.lock();
            self.ctx.cache.multipliers_for_realm(realm, now)
        };

        if let (Some(id), Some(promoted)) = (read.promoted, read.active.first()) {
            if let Err(e) = self.ctx.store.update_multiplier(promoted) {
                tracing::error!(multiplier_id = id, "Failed to persist promotion: {}", e);
                self.ctx.metrics.storage_error(e);
            }
            self.announce_enabled(promoted);
        }

        read.active
    }

    /// Enabled multipliers in the local realm that `player` earns with
    pub fn usable_by(&self, player: PlayerId) -> Vec<Multiplier> {
        let now = self.ctx.now();
        self.active_in_realm(self.ctx.realm())
            .into_iter()
            .filter(|m| m.can_use_player(player, now))
            .collect()
    }

    /// Edit amount and/or duration of a multiplier not yet activated
    pub fn edit(&self, id: i64, amount: Option<i32>, minutes: Option<i32>) -> Result<Multiplier> {
        if let Some(minutes) = minutes {
            validate_minutes(minutes)?;
        }

        let (previous, current) = {
            let _guard = self.activation.lock();
            let previous = self.lookup(id)?.ok_or(Error::UnknownMultiplier(id))?;
            if previous.has_started() {
                return Err(Error::MultiplierActive(id));
            }

            let mut current = previous.clone();
            current.edit(amount, minutes);
            self.ctx.cache.put_multiplier(current.clone());
            (previous, current)
        };

        if let Err(e) = self.ctx.store.update_multiplier(&current) {
            tracing::error!(multiplier_id = id, "Failed to persist edit: {}", e);
            let _guard = self.activation.lock();
            self.ctx.cache.put_multiplier(previous);
            return Err(self.ctx.metrics.storage_error(e));
        }

        self.ctx.broadcaster.multiplier_update(&current, false);
        tracing::info!(multiplier_id = id, "Multiplier edited");
        Ok(current)
    }

    /// Multiplier by id, from the cache or the store
    ///
    /// An expired multiplier is disabled and reported as absent.
    pub fn multiplier(&self, id: i64) -> Result<Option<Multiplier>> {
        let multiplier = match self.lookup(id)? {
            Some(multiplier) => multiplier,
            None => return Ok(None),
        };

        if multiplier.is_expired(self.ctx.now()) {
            self.ctx.cache.put_multiplier(multiplier);
            self.disable(id);
            return Ok(None);
        }
        Ok(Some(multiplier))
    }

    /// Cached multipliers owned by `owner`, optionally restricted to a realm
    pub fn multipliers_for_owner(&self, owner: PlayerId, realm: Option<&str>) -> Vec<Multiplier> {
        self.ctx
            .cache
            .multipliers()
            .into_iter()
            .filter(|m| m.data().owner() == owner)
            .filter(|m| realm.map_or(true, |realm| m.visible_in(realm)))
            .collect()
    }

    /// Cached multipliers visible in `realm`
    pub fn in_realm(&self, realm: &str) -> Vec<Multiplier> {
        self.ctx
            .cache
            .multipliers()
            .into_iter()
            .filter(|m| m.visible_in(realm))
            .collect()
    }

    /// Re-announce every cached multiplier
    pub fn replay(&self) -> usize {
        let now = self.ctx.now();
        let multipliers = self.ctx.cache.multipliers();
        for multiplier in &multipliers {
            self.ctx
                .broadcaster
                .multiplier_update(multiplier, multiplier.is_enabled(now));
        }
        tracing::debug!(count = multipliers.len(), "Replayed multipliers");
        multipliers.len()
    }

    /// Apply a peer's multiplier row to the cache
    pub(crate) fn apply_update(&self, multiplier: Multiplier) {
        if !multiplier.is_persisted() {
            tracing::warn!(%multiplier, "Ignoring unpersisted multiplier from peer");
            return;
        }
        let _guard = self.activation.lock();
        self.ctx.cache.put_multiplier(multiplier);
    }

    /// Apply a peer's disable to the cache (and a node-local store)
    pub(crate) fn apply_disable(&self, multiplier: &Multiplier) {
        let id = multiplier.id();
        {
            let _guard = self.activation.lock();
            self.ctx.cache.remove_multiplier(id);
        }

        if !self.ctx.store.is_shared() {
            if let Err(e) = self.ctx.store.delete_multiplier(id) {
                tracing::error!(multiplier_id = id, "Failed to delete multiplier row: {}", e);
                self.ctx.metrics.storage_error(e);
            }
        }
    }

    /// Reconcile one store row with the cache; returns whether the cache changed
    pub(crate) fn reconcile(&self, row: Multiplier) -> bool {
        let _guard = self.activation.lock();
        match self.ctx.cache.multiplier(row.id()) {
            None => {
                self.ctx.cache.put_multiplier(row);
                true
            }
            Some(cached) if cached != row => {
                tracing::warn!(
                    multiplier_id = row.id(),
                    cached = %cached,
                    stored = %row,
                    "Cached multiplier diverged from store, overwriting"
                );
                self.ctx.cache.put_multiplier(row);
                true
            }
            Some(_) => false,
        }
    }

    /// Drop cached activated multipliers whose store row is gone
    ///
    /// Only meaningful over a shared store, where a missing row means a peer
    /// disabled the multiplier and a late update resurrected it here.
    pub(crate) fn forget_orphans(&self, stored: &HashSet<i64>) -> usize {
        if !self.ctx.store.is_shared() {
            return 0;
        }

        let _guard = self.activation.lock();
        let orphans: Vec<i64> = self
            .ctx
            .cache
            .multipliers()
            .iter()
            .filter(|m| m.has_started() && !stored.contains(&m.id()))
            .map(Multiplier::id)
            .collect();

        for id in &orphans {
            self.ctx.cache.remove_multiplier(*id);
            tracing::warn!(multiplier_id = *id, "Dropped cached multiplier with no store row");
        }
        orphans.len()
    }

    fn lookup(&self, id: i64) -> Result<Option<Multiplier>> {
        if let Some(multiplier) = self.ctx.cache.multiplier(id) {
            return Ok(Some(multiplier));
        }
        self.ctx
            .store
            .read_multiplier(id)
            .map_err(|e| self.ctx.metrics.storage_error(e))
    }

    fn announce_enabled(&self, multiplier: &Multiplier) {
        self.ctx.broadcaster.multiplier_update(multiplier, true);
        self.ctx.metrics.multipliers_enabled.inc();
        tracing::info!(
            multiplier_id = multiplier.id(),
            owner = %multiplier.data().owner_name(),
            amount = multiplier.data().amount(),
            "Multiplier enabled"
        );
    }
}
