//! Fixtures shared by unit tests

use crate::{
    clock::ManualClock,
    context::LedgerContext,
    memory::MemoryStore,
    presence::StaticPresence,
    store::{LedgerStore, MultiplierFilter},
    types::{Account, Multiplier, PlayerId},
    Config, Error, Result,
};
use coins_messaging::{BroadcastChannel, Envelope, MessageHandler, MessageType};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub(crate) const START: i64 = 1_700_000_000_000;

#[derive(Clone)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a subscriber that records formatted log output
pub(crate) fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = LogSink(buffer.clone());
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.lock()).into_owned();
    (result, logs)
}

/// Channel that records published envelopes
pub(crate) struct RecordingChannel {
    node_id: Uuid,
    published: Mutex<Vec<Envelope>>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Self {
        Self {
            node_id: Uuid::new_v4(),
            published: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self, message_type: MessageType) -> Vec<Envelope> {
        self.published
            .lock()
            .iter()
            .filter(|e| e.message_type == message_type)
            .cloned()
            .collect()
    }
}

impl BroadcastChannel for RecordingChannel {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    fn publish(&self, envelope: Envelope) -> coins_messaging::Result<()> {
        self.published.lock().push(envelope);
        Ok(())
    }

    fn subscribe(&self, _handler: Arc<dyn MessageHandler>) -> coins_messaging::Result<JoinHandle<()>> {
        Ok(tokio::spawn(async {}))
    }
}

/// Shared memory store with targeted write failures
#[derive(Clone, Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    // player -> balance writes still allowed before failing
    balance_writes: Arc<Mutex<HashMap<PlayerId, usize>>>,
    fail_multiplier_updates: Arc<AtomicBool>,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every balance write for `player` after `successes` more succeed
    pub(crate) fn fail_balance_writes_after(&self, player: PlayerId, successes: usize) {
        self.balance_writes.lock().insert(player, successes);
    }

    pub(crate) fn fail_multiplier_updates(&self, failing: bool) {
        self.fail_multiplier_updates.store(failing, Ordering::SeqCst);
    }
}

impl LedgerStore for FaultyStore {
    fn create_account(&self, id: PlayerId, name: &str, balance: Decimal) -> Result<()> {
        self.inner.create_account(id, name, balance)
    }

    fn read_balance(&self, id: PlayerId) -> Result<Option<Decimal>> {
        self.inner.read_balance(id)
    }

    fn write_balance(&self, id: PlayerId, balance: Decimal) -> Result<()> {
        if let Some(remaining) = self.balance_writes.lock().get_mut(&id) {
            if *remaining == 0 {
                return Err(Error::Storage(format!("write rejected for {}", id)));
            }
            *remaining -= 1;
        }
        self.inner.write_balance(id, balance)
    }

    fn account_exists(&self, id: PlayerId) -> Result<bool> {
        self.inner.account_exists(id)
    }

    fn account_exists_by_name(&self, name: &str) -> Result<bool> {
        self.inner.account_exists_by_name(name)
    }

    fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        self.inner.account_by_name(name)
    }

    fn top_n(&self, n: usize) -> Result<Vec<Account>> {
        self.inner.top_n(n)
    }

    fn create_multiplier(&self, multiplier: &Multiplier) -> Result<i64> {
        self.inner.create_multiplier(multiplier)
    }

    fn read_multiplier(&self, id: i64) -> Result<Option<Multiplier>> {
        self.inner.read_multiplier(id)
    }

    fn list_multipliers(&self, filter: Option<&MultiplierFilter>) -> Result<Vec<Multiplier>> {
        self.inner.list_multipliers(filter)
    }

    fn delete_multiplier(&self, id: i64) -> Result<()> {
        self.inner.delete_multiplier(id)
    }

    fn update_multiplier(&self, multiplier: &Multiplier) -> Result<()> {
        if self.fail_multiplier_updates.load(Ordering::SeqCst) {
            return Err(Error::Storage("multiplier update rejected".to_string()));
        }
        self.inner.update_multiplier(multiplier)
    }

    fn is_shared(&self) -> bool {
        self.inner.is_shared()
    }
}

pub(crate) struct FaultyNode {
    pub ctx: LedgerContext,
    pub store: FaultyStore,
    pub channel: Arc<RecordingChannel>,
}

pub(crate) fn faulty_node(realm: &str) -> FaultyNode {
    let store = FaultyStore::new();
    let channel = Arc::new(RecordingChannel::new());
    let config = Config {
        realm: realm.to_string(),
        ..Config::default()
    };

    let ctx = LedgerContext::new(config, Arc::new(store.clone()), channel.clone())
        .with_clock(Arc::new(ManualClock::new(START)));

    FaultyNode {
        ctx,
        store,
        channel,
    }
}

pub(crate) struct TestNode {
    pub ctx: LedgerContext,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub presence: Arc<StaticPresence>,
    pub channel: Arc<RecordingChannel>,
}

pub(crate) fn node(realm: &str) -> TestNode {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(START));
    let presence = Arc::new(StaticPresence::new());
    let channel = Arc::new(RecordingChannel::new());

    let config = Config {
        realm: realm.to_string(),
        ..Config::default()
    };

    let ctx = LedgerContext::new(config, Arc::new(store.clone()), channel.clone())
        .with_clock(clock.clone())
        .with_presence(presence.clone());

    TestNode {
        ctx,
        store,
        clock,
        presence,
        channel,
    }
}
