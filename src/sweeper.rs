//! Cancellation sweeper and periodic maintenance (§4.6 "`* → Cancelled`",
//! §5 "one background task for the cancellation sweeper" / "one background
//! task for periodic state persistence and cleanup").
//!
//! No teacher equivalent (the teacher has no timelock-gated cancellation
//! path); written in the same `tokio::spawn` + `tracing` idiom as the rest
//! of this crate's background tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::executor::Executor;
use crate::resolver_core::ResolverCore;
use crate::store::OrderStore;
use crate::time::{now_ts, now_u32};
use crate::types::OrderStatus;

pub struct Sweeper {
    order_store: Arc<OrderStore>,
    executor: Arc<Executor>,
    core: Arc<ResolverCore>,
}

impl Sweeper {
    pub fn new(order_store: Arc<OrderStore>, executor: Arc<Executor>, core: Arc<ResolverCore>) -> Arc<Self> {
        Arc::new(Self {
            order_store,
            executor,
            core,
        })
    }

    /// `* → Cancelled` (§4.6): "if `now ≥ dst_cancellation` AND the
    /// destination escrow still holds funds AND the state is
    /// `DstEscrowDeployed` ... it calls `executor.cancel_dst(dst_escrow)`."
    /// Also covers the boundary case in §8 ("Secrets revealed after
    /// `src_cancellation` have passed: the resolver still attempts
    /// `publicWithdraw` until `src_public_cancellation`; beyond that it
    /// records the order `Failed`") by retrying stuck `SecretRevealed`
    /// orders and failing them once the public-cancellation window closes.
    pub async fn sweep_once(&self) {
        let now = now_u32();

        for order in self.order_store.list_by_status(OrderStatus::DstEscrowDeployed).unwrap_or_default() {
            if !order.immutables.timelocks.is_past_dst_cancellation(now) {
                continue;
            }
            if order.dst_escrow_address_actual.is_none() {
                continue;
            }
            match self.executor.cancel_dst(&order, now).await {
                Ok(tx_hash) => {
                    if let Err(e) = self
                        .order_store
                        .update_status(order.id, OrderStatus::Cancelled, now_ts())
                        .await
                    {
                        error!(order_id = %order.id, error = %e, "failed to persist cancellation");
                    } else {
                        info!(order_id = %order.id, ?tx_hash, "destination escrow cancelled");
                    }
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "cancel_dst failed, will retry next sweep");
                }
            }
        }

        for order in self.order_store.list_by_status(OrderStatus::SecretRevealed).unwrap_or_default() {
            if order.immutables.timelocks.is_past_src_public_cancellation(now) {
                warn!(order_id = %order.id, "public cancellation window elapsed before withdrawal completed, failing order");
                if let Err(e) = self.order_store.update_status(order.id, OrderStatus::Failed, now_ts()).await {
                    error!(order_id = %order.id, error = %e, "failed to persist Failed transition");
                }
                let _ = self
                    .order_store
                    .annotate(order.id, "source withdrawal window expired".to_string(), now_ts())
                    .await;
                continue;
            }
            if let Err(e) = self.core.complete_if_ready(order.id).await {
                warn!(order_id = %order.id, error = %e, "retrying stuck source withdrawal failed");
            }
        }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

/// Periodic snapshot-to-disk + terminal-order cleanup (§4.3
/// `cleanup_older_than`, §6 `order_state.json`).
pub fn spawn_persistence_task(
    order_store: Arc<OrderStore>,
    max_order_age: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = order_store.snapshot() {
                error!(error = %e, "periodic order snapshot failed");
            }
            match order_store.cleanup_older_than(max_order_age, now_ts()).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "cleaned up terminal orders older than retention"),
                Err(e) => error!(error = %e, "periodic cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    // The sweeper's decision logic (timelock-gated cancel / fail) is
    // exercised end-to-end via `Timelocks::is_past_dst_cancellation` and
    // `is_past_src_public_cancellation`'s own unit tests in
    // `types/timelocks.rs`; a full sweep needs a live gateway and is left to
    // integration-level testing against a local chain.
}
