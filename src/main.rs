//! Process wiring: load configuration, construct the six components leaves
//! first, spawn their background tasks, and shut down gracefully on
//! `SIGINT`/`SIGTERM` (§6 "Exit codes").
//!
//! Grounded on the teacher's `main.rs` (config load, then spin up the
//! service), generalized from a single `axum` HTTP server into a supervised
//! task tree: two `ChainGateway`s, the Order/Secret stores, both monitors,
//! the resolver core's consumer loops, the cancellation sweeper, and the
//! periodic persistence task.

use std::sync::Arc;
use std::time::Duration;

use htlc_resolver::chain::gateway::ChainGateway;
use htlc_resolver::config::ResolverConfig;
use htlc_resolver::executor::Executor;
use htlc_resolver::indexer::IndexerClient;
use htlc_resolver::monitor::source::SourceMonitorEvent;
use htlc_resolver::monitor::{DestinationMonitor, SourceMonitor};
use htlc_resolver::policy::{DefaultProfitabilityPolicy, ProfitabilityPolicy};
use htlc_resolver::resolver_core::{NewOrderQueue, ResolverCore};
use htlc_resolver::store::{OrderStore, SecretStore};
use htlc_resolver::sweeper::{spawn_persistence_task, Sweeper};
use htlc_resolver::types::OrderStatus;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        // Fatal startup error: a single-line diagnostic, then a non-zero
        // exit (§6).
        eprintln!("htlc-resolver: fatal startup error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = ResolverConfig::from_env().map_err(anyhow::Error::from)?;
    info!(
        src_chain_id = cfg.src.chain_id,
        dst_chain_id = cfg.dst.chain_id,
        network_mode = ?cfg.network_mode,
        "starting htlc-resolver"
    );

    std::fs::create_dir_all(&cfg.data_dir)?;
    let orders_path = cfg.data_dir.join("order_state");
    let secrets_path = cfg.data_dir.join("secrets");
    let pending_orders_dir = cfg.data_dir.join("pending_orders");
    std::fs::create_dir_all(&pending_orders_dir)?;

    let src_gateway = Arc::new(ChainGateway::new(
        &cfg.src,
        &cfg.resolver_private_key,
        cfg.fee_strategy,
        cfg.tx_retry_attempts,
        cfg.event_batch_size,
    )?);
    let dst_gateway = Arc::new(ChainGateway::new(
        &cfg.dst,
        &cfg.resolver_private_key,
        cfg.fee_strategy,
        cfg.tx_retry_attempts,
        cfg.event_batch_size,
    )?);

    let order_store = Arc::new(OrderStore::open(&orders_path)?);
    let restored = order_store.restore()?;
    if restored > 0 {
        info!(restored, "reloaded orders from order_state.json snapshot");
    }
    let secret_store = Arc::new(SecretStore::open(&secrets_path)?);

    let executor = Arc::new(Executor {
        src_gateway: src_gateway.clone(),
        dst_gateway: dst_gateway.clone(),
        src_factory: cfg.src.factory_address,
        dst_factory: cfg.dst.factory_address,
        src_proxy_bytecode_hash: cfg.src.proxy_bytecode_hash,
        dst_proxy_bytecode_hash: cfg.dst.proxy_bytecode_hash,
        src_withdraw_abi: cfg.src.withdraw_abi,
        use_native_safety_deposit: cfg.use_native_safety_deposit,
        tx_retry_attempts: cfg.tx_retry_attempts,
    });

    let policy: Arc<dyn ProfitabilityPolicy> =
        Arc::new(DefaultProfitabilityPolicy::new(cfg.min_profit_bps));

    let indexer = if cfg.use_indexer {
        let url = cfg
            .indexer_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("USE_INDEXER set but no indexer_url"))?;
        Some(Arc::new(IndexerClient::new(url)))
    } else {
        None
    };

    let core = Arc::new(ResolverCore::new(
        order_store.clone(),
        secret_store.clone(),
        executor.clone(),
        policy,
        indexer,
        cfg.max_concurrent_orders,
    ));

    // Crash-recovery pass (§8 scenario 2): re-drive any order the store says
    // still needs action before subscribing to fresh chain events.
    if let Err(e) = core.run_recovery_once().await {
        warn!(error = %e, "startup recovery pass reported an error, continuing");
    }

    let new_order_queue = NewOrderQueue::new(cfg.max_concurrent_orders.saturating_mul(4).max(64));
    let _new_order_consumer = core.clone().spawn_new_order_consumer(new_order_queue.clone());

    let src_start_block = src_gateway.head_block().await.unwrap_or(0);
    let source_monitor = Arc::new(SourceMonitor::new(
        src_gateway.clone(),
        cfg.src.factory_address,
        cfg.src.proxy_bytecode_hash,
        Some(pending_orders_dir),
    ));
    let (mut source_events, _source_watch) = source_monitor.clone().start(src_start_block);
    let pending_orders_events = source_monitor.start_pending_orders_watch();

    {
        let queue = new_order_queue.clone();
        let order_store = order_store.clone();
        tokio::spawn(async move {
            while let Some(event) = source_events.recv().await {
                dispatch_source_event(event, &queue, &order_store).await;
            }
        });
    }
    if let Some(mut pending_rx) = pending_orders_events {
        let queue = new_order_queue.clone();
        let order_store = order_store.clone();
        tokio::spawn(async move {
            while let Some(event) = pending_rx.recv().await {
                dispatch_source_event(event, &queue, &order_store).await;
            }
        });
    }

    let dst_start_block = dst_gateway.head_block().await.unwrap_or(0);
    let destination_monitor = Arc::new(DestinationMonitor::new(dst_gateway.clone(), order_store.clone()));
    let (secret_revealed_rx, _dest_watch) = destination_monitor.start(dst_start_block);
    let _secret_consumer = core.clone().spawn_secret_revealed_consumer(secret_revealed_rx);

    let sweeper = Sweeper::new(order_store.clone(), executor.clone(), core.clone());
    let _sweeper_task = sweeper.spawn(Duration::from_secs(30));
    let _persistence_task = spawn_persistence_task(order_store.clone(), cfg.max_order_age, Duration::from_secs(60));

    wait_for_shutdown().await;
    info!("shutdown signal received, flushing state");
    if let Err(e) = order_store.snapshot() {
        error!(error = %e, "final snapshot failed");
    }
    info!("shutdown complete");
    Ok(())
}

/// `NewOrder` events go to the bounded queue; `Invalidated` (reorg)
/// compensations are a hard-abort for the order if it's already tracked
/// (§4.4).
async fn dispatch_source_event(
    event: SourceMonitorEvent,
    queue: &Arc<NewOrderQueue>,
    order_store: &Arc<OrderStore>,
) {
    match event {
        SourceMonitorEvent::New(new_order) => queue.push(new_order).await,
        SourceMonitorEvent::Invalidated(inv) => {
            warn!(order_hash = ?inv.order_hash, "source escrow log orphaned by reorg, aborting order");
            if let Some(order) = order_store
                .list_active()
                .unwrap_or_default()
                .into_iter()
                .find(|o| o.id.order_hash == inv.order_hash)
            {
                if !order.status.is_terminal() {
                    let _ = order_store
                        .update_status(order.id, OrderStatus::Failed, htlc_resolver::time::now_ts())
                        .await;
                    let _ = order_store
                        .annotate(order.id, "source escrow orphaned by reorg".to_string(), htlc_resolver::time::now_ts())
                        .await;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
