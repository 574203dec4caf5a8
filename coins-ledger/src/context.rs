//! Shared collaborators of one ledger node

use crate::{
    broadcast::Broadcaster,
    cache::{LocalCache, NearCache},
    clock::{Clock, SystemClock},
    metrics::Metrics,
    presence::{Capabilities, NoCapabilities, Presence, StaticPresence},
    store::LedgerStore,
    Config,
};
use coins_messaging::BroadcastChannel;
use std::sync::Arc;

/// Everything a ledger component needs, cheap to clone
#[derive(Clone)]
pub struct LedgerContext {
    /// Durable store
    pub store: Arc<dyn LedgerStore>,

    /// In-process mirror
    pub cache: Arc<dyn NearCache>,

    /// Outgoing sync messages
    pub broadcaster: Broadcaster,

    /// Online players
    pub presence: Arc<dyn Presence>,

    /// Flat multiplier grants
    pub capabilities: Arc<dyn Capabilities>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Node configuration
    pub config: Arc<Config>,

    /// Node metrics
    pub metrics: Arc<Metrics>,
}

impl LedgerContext {
    /// Context with a fresh cache, system clock, empty presence and no grants
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        channel: Arc<dyn BroadcastChannel>,
    ) -> Self {
        let metrics = Arc::new(Metrics::default());
        Self {
            store,
            cache: Arc::new(LocalCache::new()),
            broadcaster: Broadcaster::new(channel, metrics.clone()),
            presence: Arc::new(StaticPresence::new()),
            capabilities: Arc::new(NoCapabilities),
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            metrics,
        }
    }

    /// Replace the presence oracle
    pub fn with_presence(mut self, presence: Arc<dyn Presence>) -> Self {
        self.presence = presence;
        self
    }

    /// Replace the capability lookup
    pub fn with_capabilities(mut self, capabilities: Arc<dyn Capabilities>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current time (ms)
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Realm this node declares
    pub fn realm(&self) -> &str {
        &self.config.realm
    }
}
