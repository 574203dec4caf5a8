//! Metrics collection for observability
//!
//! Prometheus counters for one ledger node, on a registry owned by the node.
//!
//! # Metrics
//!
//! - `coins_cache_hits_total` / `coins_cache_misses_total` - Balance reads
//! - `coins_balance_writes_total` - Committed balance writes
//! - `coins_storage_errors_total` - Failed store calls
//! - `coins_multipliers_enabled_total` - Activations (direct and promoted)
//! - `coins_multipliers_queued_total` - Activations deferred to the queue
//! - `coins_multipliers_disabled_total` - Disables
//! - `coins_messages_applied_total` - Peer messages applied to the cache
//! - `coins_publish_failures_total` - Broadcasts that failed locally

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Balance reads served by the cache
    pub cache_hits: IntCounter,

    /// Balance reads that went to the store
    pub cache_misses: IntCounter,

    /// Committed balance writes
    pub balance_writes: IntCounter,

    /// Failed store calls
    pub storage_errors: IntCounter,

    /// Multiplier activations
    pub multipliers_enabled: IntCounter,

    /// Multiplier activations deferred to the queue
    pub multipliers_queued: IntCounter,

    /// Multiplier disables
    pub multipliers_disabled: IntCounter,

    /// Peer messages applied
    pub messages_applied: IntCounter,

    /// Local publish failures
    pub publish_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            cache_hits: counter("coins_cache_hits_total", "Balance reads served by the cache")?,
            cache_misses: counter("coins_cache_misses_total", "Balance reads that hit the store")?,
            balance_writes: counter("coins_balance_writes_total", "Committed balance writes")?,
            storage_errors: counter("coins_storage_errors_total", "Failed store calls")?,
            multipliers_enabled: counter(
                "coins_multipliers_enabled_total",
                "Multiplier activations",
            )?,
            multipliers_queued: counter(
                "coins_multipliers_queued_total",
                "Multiplier activations deferred to the queue",
            )?,
            multipliers_disabled: counter(
                "coins_multipliers_disabled_total",
                "Multiplier disables",
            )?,
            messages_applied: counter("coins_messages_applied_total", "Peer messages applied")?,
            publish_failures: counter(
                "coins_publish_failures_total",
                "Broadcasts that failed locally",
            )?,
            registry: registry.clone(),
        })
    }

    /// Count a store failure and pass the error through
    pub fn storage_error(&self, err: crate::Error) -> crate::Error {
        if err.is_storage() {
            self.storage_errors.inc();
        }
        err
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.cache_hits.get(), 0);
        assert_eq!(metrics.multipliers_enabled.get(), 0);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.balance_writes.inc();
        assert_eq!(first.balance_writes.get(), 1);
        assert_eq!(second.balance_writes.get(), 0);
        assert_eq!(first.registry().gather().len(), 9);
    }

    #[test]
    fn test_storage_error_counts_only_storage() {
        let metrics = Metrics::new().unwrap();
        let _ = metrics.storage_error(crate::Error::Storage("down".into()));
        let _ = metrics.storage_error(crate::Error::MultiplierActive(1));
        assert_eq!(metrics.storage_errors.get(), 1);
    }
}
