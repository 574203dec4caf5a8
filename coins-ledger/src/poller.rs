//! Reconciliation poller
//!
//! Periodically repairs divergence between the near-cache and the store and
//! promotes queued multipliers in realms left without an active one. Covers
//! lost broadcasts and missed expiries.

use crate::{
    context::LedgerContext,
    multiplier::Multipliers,
    types::Multiplier,
    Result,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Rows loaded into or overwritten in the cache
    pub reconciled: usize,

    /// Activated multipliers dropped because their store row is gone
    pub orphaned: usize,

    /// Expired multipliers disabled
    pub expired: usize,

    /// Queued multipliers activated
    pub promoted: usize,
}

/// Reconciliation poller
pub struct Poller {
    ctx: LedgerContext,
    multipliers: Arc<Multipliers>,
}

/// Running poller task
pub struct PollerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Poller task failed: {}", e);
        }
    }
}

impl Poller {
    /// Create poller
    pub fn new(ctx: LedgerContext, multipliers: Arc<Multipliers>) -> Self {
        Self { ctx, multipliers }
    }

    /// Run one reconciliation pass
    pub fn run_once(&self) -> Result<PollReport> {
        let mut report = PollReport::default();

        let online: HashSet<_> = self.ctx.presence.online_players().into_iter().collect();
        let rows = self
            .ctx
            .store
            .list_multipliers(None)
            .map_err(|e| self.ctx.metrics.storage_error(e))?;

        let stored: HashSet<i64> = rows.iter().map(Multiplier::id).collect();
        for row in rows {
            let owner = row.data().owner();
            if !owner.is_system() && !online.contains(&owner) {
                continue;
            }
            if self.multipliers.reconcile(row) {
                report.reconciled += 1;
            }
        }

        report.orphaned = self.multipliers.forget_orphans(&stored);
        report.expired = self.multipliers.sweep_expired();

        let now = self.ctx.now();
        let realms: BTreeSet<String> = self
            .ctx
            .cache
            .multipliers()
            .iter()
            .map(|m| m.realm().to_string())
            .chain(std::iter::once(self.ctx.realm().to_string()))
            .collect();

        for realm in &realms {
            if !self.ctx.cache.enabled_in_realm(realm, now).is_empty() {
                continue;
            }

            let mut queued: Vec<Multiplier> = self
                .ctx
                .cache
                .multipliers()
                .into_iter()
                .filter(|m| m.visible_in(realm) && m.is_queued(now))
                .collect();
            queued.sort_by_key(|m| (m.queue_millis(), m.id()));

            for candidate in queued {
                match self.multipliers.enable(candidate.id()) {
                    Ok(true) => {
                        report.promoted += 1;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(multiplier_id = candidate.id(), "Promotion failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!(
            reconciled = report.reconciled,
            orphaned = report.orphaned,
            expired = report.expired,
            promoted = report.promoted,
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Drive `run_once` every `period` until the handle is shut down
    pub fn spawn(self, period: Duration) -> PollerHandle {
        let (shutdown, mut stop) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once() {
                            tracing::error!("Reconciliation pass failed: {}", e);
                        }
                    }
                    _ = &mut stop => break,
                }
            }

            tracing::info!("Poller stopped");
        });

        PollerHandle { shutdown, task }
    }
}
