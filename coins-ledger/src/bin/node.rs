//! Coins ledger node binary

use anyhow::Context;
use coins_ledger::{
    config::{MessagingKind, StorageKind},
    Config, Ledger, LedgerContext, LedgerStore, PgStore, Poller, RocksStore, SyncDispatcher,
};
use coins_messaging::{BroadcastChannel, LocalHub, NatsChannel, NoopChannel};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        realm = %config.realm,
        storage = ?config.storage.kind,
        "Starting coins ledger node"
    );

    let store: Arc<dyn LedgerStore> = match config.storage.kind {
        StorageKind::Postgres => Arc::new(PgStore::connect(&config.storage).await?),
        StorageKind::Rocksdb => Arc::new(RocksStore::open(&config)?),
    };

    let channel: Arc<dyn BroadcastChannel> = match config.messaging.kind {
        MessagingKind::Nats => Arc::new(NatsChannel::connect(&config.messaging.nats).await?),
        MessagingKind::Local => Arc::new(LocalHub::new().channel()),
        MessagingKind::None => Arc::new(NoopChannel::new()),
    };

    let poller_interval = config.poller_interval();
    let ctx = LedgerContext::new(config, store, channel);
    let ledger = Arc::new(Ledger::new(ctx.clone()));
    ledger.bootstrap()?;

    let subscription = SyncDispatcher::attach(ledger.clone())?;
    ledger.request_multipliers();

    let poller = Poller::new(ctx, ledger.multipliers().clone()).spawn(poller_interval);
    tracing::info!(node_id = %ledger.context().broadcaster.node_id(), "Ledger node ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger node");
    poller.shutdown().await;
    subscription.abort();
    Ok(())
}
