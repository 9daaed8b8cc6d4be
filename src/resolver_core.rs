//! Resolver Core (§4.6): the orchestrator. Consumes events from both chain
//! monitors, consults the profitability policy, drives the per-order state
//! machine, and calls the executor to deploy escrows, deposit tokens,
//! withdraw, and cancel.
//!
//! Grounded on spec.md §4.6/§5 directly, since the teacher has no equivalent
//! orchestrator (its `agent.rs` drives a single NEAR chain-signature flow,
//! not a two-sided escrow state machine). Built in the teacher's idiom:
//! `tokio::spawn` consumer loops over `mpsc` channels, `tracing` at every
//! transition, `Arc`-shared stores and gateways.

use std::collections::VecDeque;
use std::sync::Arc;

use ethers::types::H256;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{ResolverError, Result};
use crate::executor::Executor;
use crate::indexer::IndexerClient;
use crate::monitor::{NewOrder, SecretRevealed};
use crate::policy::ProfitabilityPolicy;
use crate::store::{OrderStore, SecretStore};
use crate::time::now_ts;
use crate::types::{OrderId, OrderParams, OrderState, OrderStatus, SecretRecord};

/// Bounded inbox for `NewOrder` events (§5 "Backpressure"): "new `NewOrder`
/// events sit in a bounded queue; overflow drops the oldest-not-started
/// event (never one in flight) and logs a metric." `tokio::sync::mpsc`'s
/// bounded channel can't selectively evict its head, so the queue is a plain
/// `VecDeque` behind a mutex with a `Notify` to wake the one consumer loop.
pub struct NewOrderQueue {
    inner: Mutex<VecDeque<NewOrder>>,
    capacity: usize,
    notify: Notify,
}

impl NewOrderQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        })
    }

    pub async fn push(&self, event: NewOrder) {
        let mut guard = self.inner.lock().await;
        if guard.len() >= self.capacity {
            if let Some(dropped) = guard.pop_front() {
                warn!(
                    order_hash = ?dropped.order_hash,
                    capacity = self.capacity,
                    "new-order queue saturated, dropped oldest not-yet-started event"
                );
            }
        }
        guard.push_back(event);
        drop(guard);
        self.notify.notify_one();
    }

    async fn pop(&self) -> NewOrder {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(event) = guard.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }
}

pub struct ResolverCore {
    pub order_store: Arc<OrderStore>,
    pub secret_store: Arc<SecretStore>,
    pub executor: Arc<Executor>,
    pub policy: Arc<dyn ProfitabilityPolicy>,
    pub indexer: Option<Arc<IndexerClient>>,
    pub max_concurrent_orders: usize,
    semaphore: Arc<Semaphore>,
}

impl ResolverCore {
    pub fn new(
        order_store: Arc<OrderStore>,
        secret_store: Arc<SecretStore>,
        executor: Arc<Executor>,
        policy: Arc<dyn ProfitabilityPolicy>,
        indexer: Option<Arc<IndexerClient>>,
        max_concurrent_orders: usize,
    ) -> Self {
        Self {
            order_store,
            secret_store,
            executor,
            policy,
            indexer,
            max_concurrent_orders,
            semaphore: Arc::new(Semaphore::new(max_concurrent_orders.max(1))),
        }
    }

    /// Consumer loop for the bounded `NewOrder` inbox. One task; each
    /// accepted order's chain work runs under the core's semaphore so at
    /// most `max_concurrent_orders` deployments are ever in flight (§5).
    pub fn spawn_new_order_consumer(self: Arc<Self>, queue: Arc<NewOrderQueue>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = queue.pop().await;
                let core = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = core.handle_new_order(event).await {
                        warn!(error = %e, "new order handling failed");
                    }
                });
            }
        })
    }

    /// Consumer loop for the Destination Monitor's reveal stream.
    pub fn spawn_secret_revealed_consumer(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<SecretRevealed>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let core = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = core.handle_secret_revealed(event).await {
                        warn!(error = %e, "secret-revealed handling failed");
                    }
                });
            }
        })
    }

    /// `Created → SrcEscrowDeployed` (§4.6): "On entry: add to Order Store,
    /// evaluate profitability, acquire per-order lock." Duplicate
    /// `order_hash` deliveries are a no-op (P5, §8 scenario 5); unprofitable
    /// orders are annotated and never transition further (§8 scenario 4).
    pub async fn handle_new_order(&self, event: NewOrder) -> Result<()> {
        if self.order_store.count_active() >= self.max_concurrent_orders {
            warn!(
                order_hash = ?event.order_hash,
                max = self.max_concurrent_orders,
                "at capacity, dropping new order"
            );
            return Ok(());
        }

        let params = self.resolve_params(&event).await?;
        let id = OrderId::new(params.src_chain_id, event.order_hash);
        let now = now_ts();
        let order = OrderState::new(id, params, event.immutables.clone(), now);

        let inserted = self.order_store.add(order).await?;
        if !inserted {
            debug!(order_id = %id, "duplicate NewOrder, order already tracked");
            return Ok(());
        }

        // A purely file-discovered order (no on-chain log yet) has nothing
        // further to do until its source escrow is actually observed on
        // chain; out of scope per §9's maker-client note.
        if event.block_number == 0 {
            return Ok(());
        }

        let stored = self
            .order_store
            .get(id)?
            .ok_or_else(|| ResolverError::Protocol(format!("order {id} vanished immediately after insert")))?;
        let decision = self.policy.analyse(
            stored.params.src_token,
            stored.params.src_amount,
            stored.params.dst_token,
            stored.params.dst_amount,
            stored.params.safety_deposit,
            stored.params.is_eth_deposit,
        );
        if !decision.profitable {
            info!(order_id = %id, reason = %decision.reason, margin_bps = decision.margin_bps, "order rejected by profitability policy");
            self.order_store.annotate(id, decision.reason, now_ts()).await?;
            return Ok(());
        }

        self.order_store
            .update_status(id, OrderStatus::SrcEscrowDeployed, now_ts())
            .await?;
        self.order_store
            .update_escrows(id, Some(event.src_escrow_address), None, None, now_ts())
            .await?;

        self.advance_src_escrow_deployed(id).await
    }

    /// Looks up the destination-side economics for a discovered order:
    /// carried on the event (maker drop-box, §4.4), or resolved via the
    /// optional indexer as a convenience hint only, never trusted past the
    /// on-chain validation the executor performs later (§9 "chain wins").
    async fn resolve_params(&self, event: &NewOrder) -> Result<OrderParams> {
        if let Some(params) = event.params.clone() {
            return Ok(params);
        }
        let Some(indexer) = &self.indexer else {
            return Err(ResolverError::Protocol(format!(
                "no destination-side terms available for order {:?} and no indexer configured",
                event.order_hash
            )));
        };
        indexer
            .get_order_params(event.order_hash)
            .await
            .map_err(|e| ResolverError::Protocol(format!("indexer lookup failed: {e}")))?
            .ok_or_else(|| {
                ResolverError::Protocol(format!(
                    "indexer has no record of order {:?}",
                    event.order_hash
                ))
            })
    }

    /// `SrcEscrowDeployed → DstEscrowDeployed` (§4.6): deploy the destination
    /// escrow, then lock tokens into it. Idempotent re-entry (crash
    /// recovery, §8 P5): an order that already has a `dst_escrow_address_actual`
    /// is skipped rather than deploying a second escrow.
    pub async fn advance_src_escrow_deployed(&self, id: OrderId) -> Result<()> {
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            ResolverError::Protocol("resolver core semaphore closed".to_string())
        })?;

        let Some(order) = self.order_store.get(id)? else {
            return Ok(());
        };
        if order.status != OrderStatus::SrcEscrowDeployed {
            return Ok(());
        }
        if order.dst_escrow_address_actual.is_some() {
            return Ok(());
        }

        let dst_escrow = match self.executor.deploy_dst_escrow(&order).await {
            Ok(addr) => addr,
            Err(e) => return self.handle_chain_error(id, e).await,
        };

        self.order_store
            .update_escrows(id, None, None, Some(dst_escrow), now_ts())
            .await?;

        let deposit_amount = if self.executor_uses_native_safety_deposit() {
            order.params.dst_amount
        } else {
            order.params.dst_amount.saturating_add(order.params.safety_deposit)
        };
        if let Err(e) = self
            .executor
            .lock_tokens(&self.executor.dst_gateway, dst_escrow, order.params.dst_token, deposit_amount)
            .await
        {
            return self.handle_chain_error(id, e).await;
        }

        self.order_store
            .update_status(id, OrderStatus::DstEscrowDeployed, now_ts())
            .await?;
        info!(order_id = %id, ?dst_escrow, "destination escrow funded");
        Ok(())
    }

    fn executor_uses_native_safety_deposit(&self) -> bool {
        self.executor.use_native_safety_deposit
    }

    /// `DstEscrowDeployed → SecretRevealed → Completed` (§4.6). Precondition
    /// (already checked by the Destination Monitor): the revealed escrow is
    /// in the store's dst-address index and `H(secret)` matches the
    /// tracked order's hashlock. Duplicate reveals for an order already past
    /// `SecretRevealed` are a no-op (§5 "duplicates are tolerated").
    pub async fn handle_secret_revealed(&self, event: SecretRevealed) -> Result<()> {
        let Some(id) = self.order_store.find_by_dst_escrow(event.escrow_address) else {
            debug!(?event.escrow_address, "reveal for an untracked escrow, ignoring");
            return Ok(());
        };
        let Some(order) = self.order_store.get(id)? else {
            return Ok(());
        };
        if order.status.is_terminal() || order.status == OrderStatus::SecretRevealed {
            debug!(order_id = %id, status = ?order.status, "reveal already applied, no-op");
            return self.complete_if_ready(id).await;
        }
        if order.status != OrderStatus::DstEscrowDeployed {
            warn!(order_id = %id, status = ?order.status, "reveal observed out of sequence, ignoring");
            return Ok(());
        }

        self.order_store.update_secret(id, event.secret, now_ts()).await?;
        self.order_store
            .update_status(id, OrderStatus::SecretRevealed, now_ts())
            .await?;

        let src_escrow = order
            .src_escrow_address
            .ok_or_else(|| ResolverError::Protocol(format!("order {id} has no src escrow recorded")))?;
        self.secret_store
            .store(SecretRecord::new_pending(
                order.immutables.hashlock,
                event.secret,
                order.id.order_hash,
                src_escrow,
                order.id.src_chain_id,
            ))
            .await?;

        self.complete_if_ready(id).await
    }

    /// `SecretRevealed → Completed` (§4.6): withdraw from the source escrow
    /// with the revealed secret. Also the crash-recovery re-entry point
    /// (§8 scenario 2): an order already sitting in `SecretRevealed` from a
    /// prior run is retried here without re-deriving the secret.
    pub async fn complete_if_ready(&self, id: OrderId) -> Result<()> {
        let Some(order) = self.order_store.get(id)? else {
            return Ok(());
        };
        if order.status != OrderStatus::SecretRevealed {
            return Ok(());
        }
        let Some(secret) = order.secret else {
            return Err(ResolverError::Protocol(format!(
                "order {id} is SecretRevealed with no secret recorded"
            )));
        };

        match self.executor.withdraw_src(&order, secret).await {
            Ok(tx_hash) => {
                self.secret_store
                    .confirm(order.immutables.hashlock, tx_hash, 0)
                    .await?;
                self.order_store
                    .update_status(id, OrderStatus::Completed, now_ts())
                    .await?;
                info!(order_id = %id, ?tx_hash, "source withdrawal complete");
                Ok(())
            }
            Err(e) => self.handle_chain_error(id, e).await,
        }
    }

    /// Shared fatal-vs-retryable handling for chain errors encountered while
    /// advancing an order (§7): retryable errors are logged and left for the
    /// next sweep/poll; everything else moves the order straight to
    /// `Failed` with the reason recorded.
    async fn handle_chain_error(&self, id: OrderId, err: ResolverError) -> Result<()> {
        let retryable = matches!(&err, ResolverError::Chain(c) if c.is_retryable());
        if retryable {
            warn!(order_id = %id, error = %err, "transient chain error, will retry");
            return Ok(());
        }
        warn!(order_id = %id, error = %err, "non-retryable error, marking order failed");
        self.order_store
            .update_status(id, OrderStatus::Failed, now_ts())
            .await?;
        self.order_store.annotate(id, err.to_string(), now_ts()).await?;
        Err(err)
    }

    /// Crash-recovery sweep (§8 scenario 2, §5 "no ordering across orders"):
    /// re-drives every order the store says still needs action, independent
    /// of any monitor event. Safe to call on a timer or once at startup.
    pub async fn run_recovery_once(&self) -> Result<()> {
        for order in self.order_store.orders_needing_action()? {
            if let Err(e) = self.advance_src_escrow_deployed(order.id).await {
                warn!(order_id = %order.id, error = %e, "recovery pass failed for order");
            }
        }
        for order in self.order_store.list_by_status(OrderStatus::SecretRevealed)? {
            if let Err(e) = self.complete_if_ready(order.id).await {
                warn!(order_id = %order.id, error = %e, "recovery pass failed to complete order");
            }
        }
        Ok(())
    }
}

/// Helper for callers constructing a `SecretRecord` outside the reveal path
/// (e.g. a future maker-mode operator generating its own secret); kept here
/// rather than in `hashlock.rs` since it's specific to how the core names a
/// pending record's hashlock from a raw `H256`.
pub fn hashlock_of(secret: H256) -> H256 {
    crate::hashlock::compute_hashlock(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_drops_oldest_when_saturated() {
        let queue = NewOrderQueue::new(2);
        let mk = |b: u8| NewOrder {
            order_hash: H256::repeat_byte(b),
            src_escrow_address: ethers::types::Address::zero(),
            immutables: sample_immutables(),
            params: None,
            block_number: 1,
            tx_hash: H256::zero(),
            log_index: 0,
        };
        queue.push(mk(1)).await;
        queue.push(mk(2)).await;
        queue.push(mk(3)).await;
        let first = queue.pop().await;
        assert_eq!(first.order_hash, H256::repeat_byte(2));
        let second = queue.pop().await;
        assert_eq!(second.order_hash, H256::repeat_byte(3));
    }

    fn sample_immutables() -> crate::types::Immutables {
        use crate::types::Timelocks;
        crate::types::Immutables {
            order_hash: H256::repeat_byte(1),
            hashlock: H256::repeat_byte(2),
            maker: ethers::types::Address::repeat_byte(3),
            taker: ethers::types::Address::repeat_byte(4),
            token: ethers::types::Address::repeat_byte(5),
            amount: ethers::types::U256::from(1_000u64),
            safety_deposit: ethers::types::U256::from(1u64),
            timelocks: Timelocks {
                src_withdrawal: 0,
                src_public_withdrawal: 10,
                src_cancellation: 30,
                src_public_cancellation: 45,
                dst_withdrawal: 0,
                dst_cancellation: 20,
            },
        }
    }
}
