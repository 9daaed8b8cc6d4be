//! Order Store (§4.3): the authoritative record of what the resolver
//! believes about each swap.
//!
//! Same `sled` + `bincode` foundation as [`crate::store::secret_store`]. Per
//! §9's "arena-plus-index design", the secondary indexes by status and by
//! destination-escrow address are *not* persisted trees; they are
//! rebuildable `dashmap::DashMap`s rebuilt from the `orders` tree on open, so
//! they "never outlive the store".

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ResolverError, Result};
use crate::types::{Immutables, OrderId, OrderParams, OrderState, OrderStatus, Timelocks};

pub struct OrderStore {
    db: sled::Db,
    orders: sled::Tree,
    by_status: DashMap<OrderStatus, HashSet<OrderId>>,
    by_dst_escrow: DashMap<Address, OrderId>,
    locks: DashMap<OrderId, Arc<Mutex<()>>>,
    snapshot_path: PathBuf,
}

impl OrderStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)?;
        let orders = db.open_tree("orders")?;
        let snapshot_path = path.as_ref().join("order_state.json");
        let store = Self {
            db,
            orders,
            by_status: DashMap::new(),
            by_dst_escrow: DashMap::new(),
            locks: DashMap::new(),
            snapshot_path,
        };
        store.rebuild_indexes()?;
        Ok(store)
    }

    fn rebuild_indexes(&self) -> Result<()> {
        for item in self.orders.iter() {
            let (_, bytes) = item?;
            let order: OrderState = bincode::deserialize(&bytes)?;
            self.index_insert(&order);
        }
        Ok(())
    }

    fn index_insert(&self, order: &OrderState) {
        self.by_status.entry(order.status).or_default().insert(order.id);
        if let Some(dst) = order.dst_escrow_address_actual {
            self.by_dst_escrow.insert(dst, order.id);
        }
    }

    fn index_remove_status(&self, id: OrderId, status: OrderStatus) {
        if let Some(mut set) = self.by_status.get_mut(&status) {
            set.remove(&id);
        }
    }

    fn lock_for(&self, id: OrderId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn get_raw(&self, id: OrderId) -> Result<Option<OrderState>> {
        let key = order_key(&id);
        match self.orders.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_raw(&self, order: &OrderState) -> Result<()> {
        let key = order_key(&order.id);
        let bytes = bincode::serialize(order)?;
        self.orders.insert(key, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// `add(order)`, a new row with `status = Created | SrcEscrowDeployed`
    /// depending on the event (§4.3). Duplicate `order_hash`/`id` is treated
    /// as a no-op (P5, §8 scenario 5: "Order Store detects the existing
    /// order_hash, leaves state unchanged").
    pub async fn add(&self, order: OrderState) -> Result<bool> {
        let guard = self.lock_for(order.id);
        let _permit = guard.lock().await;
        if self.get_raw(order.id)?.is_some() {
            return Ok(false);
        }
        self.put_raw(&order)?;
        self.index_insert(&order);
        Ok(true)
    }

    pub fn get(&self, id: OrderId) -> Result<Option<OrderState>> {
        self.get_raw(id)
    }

    pub fn list_by_status(&self, status: OrderStatus) -> Result<Vec<OrderState>> {
        let Some(ids) = self.by_status.get(&status) else {
            return Ok(Vec::new());
        };
        ids.iter().filter_map(|id| self.get_raw(*id).transpose()).collect()
    }

    /// Active = any non-terminal status (§4.3).
    pub fn list_active(&self) -> Result<Vec<OrderState>> {
        let mut out = Vec::new();
        for status in [
            OrderStatus::Created,
            OrderStatus::SrcEscrowDeployed,
            OrderStatus::DstEscrowDeployed,
            OrderStatus::SecretRevealed,
        ] {
            out.extend(self.list_by_status(status)?);
        }
        Ok(out)
    }

    pub fn count_active(&self) -> usize {
        [
            OrderStatus::Created,
            OrderStatus::SrcEscrowDeployed,
            OrderStatus::DstEscrowDeployed,
            OrderStatus::SecretRevealed,
        ]
        .iter()
        .map(|s| self.by_status.get(s).map(|set| set.len()).unwrap_or(0))
        .sum()
    }

    /// `update_status(id, new_status)` (§4.3); enforces the state machine
    /// per §4.6 and P2, and is idempotent for same-status replays (§8
    /// scenario 5).
    pub async fn update_status(&self, id: OrderId, new_status: OrderStatus, now: i64) -> Result<()> {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;
        let mut order = self
            .get_raw(id)?
            .ok_or_else(|| ResolverError::Protocol(format!("unknown order {id}")))?;
        let old_status = order.status;
        order.transition(new_status, now)?;
        self.put_raw(&order)?;
        if old_status != order.status {
            self.index_remove_status(id, old_status);
            self.by_status.entry(order.status).or_default().insert(id);
        }
        Ok(())
    }

    pub async fn update_escrows(
        &self,
        id: OrderId,
        src: Option<Address>,
        dst_predicted: Option<Address>,
        dst_actual: Option<Address>,
        now: i64,
    ) -> Result<()> {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;
        let mut order = self
            .get_raw(id)?
            .ok_or_else(|| ResolverError::Protocol(format!("unknown order {id}")))?;
        if src.is_some() {
            order.src_escrow_address = src;
        }
        if dst_predicted.is_some() {
            order.dst_escrow_address_predicted = dst_predicted;
        }
        if dst_actual.is_some() {
            order.dst_escrow_address_actual = dst_actual;
        }
        order.updated_at = now;
        self.put_raw(&order)?;
        if let Some(dst) = order.dst_escrow_address_actual {
            self.by_dst_escrow.insert(dst, id);
        }
        Ok(())
    }

    pub async fn update_secret(&self, id: OrderId, secret: H256, now: i64) -> Result<()> {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;
        let mut order = self
            .get_raw(id)?
            .ok_or_else(|| ResolverError::Protocol(format!("unknown order {id}")))?;
        order.secret = Some(secret);
        order.updated_at = now;
        self.put_raw(&order)
    }

    /// Annotate an order with a non-error reason it hasn't progressed (§8
    /// scenario 4, "insufficient profit") without changing its status.
    pub async fn annotate(&self, id: OrderId, reason: String, now: i64) -> Result<()> {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;
        let mut order = self
            .get_raw(id)?
            .ok_or_else(|| ResolverError::Protocol(format!("unknown order {id}")))?;
        order.reason = Some(reason);
        order.updated_at = now;
        self.put_raw(&order)
    }

    pub fn find_by_dst_escrow(&self, dst_escrow: Address) -> Option<OrderId> {
        self.by_dst_escrow.get(&dst_escrow).map(|id| *id)
    }

    /// `orders_needing_action() → […]` (§4.3): orders the core should act on,
    /// i.e. `SrcEscrowDeployed` without a destination escrow yet.
    pub fn orders_needing_action(&self) -> Result<Vec<OrderState>> {
        Ok(self
            .list_by_status(OrderStatus::SrcEscrowDeployed)?
            .into_iter()
            .filter(|o| o.dst_escrow_address_actual.is_none())
            .collect())
    }

    /// `cleanup_older_than(age)`, removes terminal orders older than `age`;
    /// returns the count removed.
    pub async fn cleanup_older_than(&self, age: Duration, now: i64) -> Result<usize> {
        let cutoff = now - age.as_secs() as i64;
        let mut removed = 0usize;
        for status in [OrderStatus::Completed, OrderStatus::Cancelled, OrderStatus::Failed] {
            for order in self.list_by_status(status)? {
                if order.updated_at <= cutoff {
                    let guard = self.lock_for(order.id);
                    let _permit = guard.lock().await;
                    self.orders.remove(order_key(&order.id))?;
                    self.index_remove_status(order.id, status);
                    if let Some(dst) = order.dst_escrow_address_actual {
                        self.by_dst_escrow.remove(&dst);
                    }
                    self.locks.remove(&order.id);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.db.flush()?;
            info!(removed, "cleaned up terminal orders");
        }
        Ok(removed)
    }

    /// Serialize every order to `order_state.json` next to the sled
    /// directory (§6), with 256-bit numeric fields as decimal strings so
    /// the file is portable across implementations that don't share
    /// `ethers::U256`'s hex-string `Serialize` impl.
    pub fn snapshot(&self) -> Result<()> {
        let mut all = Vec::new();
        for item in self.orders.iter() {
            let (_, bytes) = item?;
            let order: OrderState = bincode::deserialize(&bytes)?;
            all.push(OrderStateJson::from(&order));
        }
        let json = serde_json::to_string_pretty(&all)
            .map_err(|e| ResolverError::Store(format!("snapshot serialize: {e}")))?;
        std::fs::write(&self.snapshot_path, json)
            .map_err(|e| ResolverError::Store(format!("snapshot write: {e}")))?;
        Ok(())
    }

    /// Reload orders from `order_state.json` into the sled tree, e.g. to
    /// migrate a store from a file-backed deployment. A no-op if the file
    /// doesn't exist; the sled tree itself is already the durable source of
    /// truth across restarts.
    pub fn restore(&self) -> Result<usize> {
        if !self.snapshot_path.exists() {
            return Ok(0);
        }
        let json = std::fs::read_to_string(&self.snapshot_path)
            .map_err(|e| ResolverError::Store(format!("snapshot read: {e}")))?;
        let all: Vec<OrderStateJson> = serde_json::from_str(&json)
            .map_err(|e| ResolverError::Store(format!("snapshot parse: {e}")))?;
        let mut loaded = 0usize;
        for dto in all {
            let order: OrderState = dto
                .try_into()
                .map_err(|e| ResolverError::Store(format!("snapshot decode: {e}")))?;
            if self.get_raw(order.id)?.is_none() {
                self.put_raw(&order)?;
                self.index_insert(&order);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

fn order_key(id: &OrderId) -> Vec<u8> {
    let mut key = id.src_chain_id.to_be_bytes().to_vec();
    key.extend_from_slice(id.order_hash.as_bytes());
    key
}

/// Portable JSON-DTO mirror of [`OrderState`] for `order_state.json` (§6).
#[derive(Debug, Serialize, Deserialize)]
struct OrderStateJson {
    src_chain_id: u64,
    order_hash: H256,
    dst_chain_id: u64,
    src_token: Address,
    dst_token: Address,
    src_amount: String,
    dst_amount: String,
    safety_deposit: String,
    is_eth_deposit: bool,
    hashlock: H256,
    maker: Address,
    taker: Address,
    token: Address,
    amount: String,
    imm_safety_deposit: String,
    timelocks: Timelocks,
    src_escrow_address: Option<Address>,
    dst_escrow_address_predicted: Option<Address>,
    dst_escrow_address_actual: Option<Address>,
    status: OrderStatus,
    created_at: i64,
    updated_at: i64,
    secret: Option<H256>,
    reason: Option<String>,
}

impl From<&OrderState> for OrderStateJson {
    fn from(o: &OrderState) -> Self {
        Self {
            src_chain_id: o.id.src_chain_id,
            order_hash: o.id.order_hash,
            dst_chain_id: o.params.dst_chain_id,
            src_token: o.params.src_token,
            dst_token: o.params.dst_token,
            src_amount: o.params.src_amount.to_string(),
            dst_amount: o.params.dst_amount.to_string(),
            safety_deposit: o.params.safety_deposit.to_string(),
            is_eth_deposit: o.params.is_eth_deposit,
            hashlock: o.immutables.hashlock,
            maker: o.immutables.maker,
            taker: o.immutables.taker,
            token: o.immutables.token,
            amount: o.immutables.amount.to_string(),
            imm_safety_deposit: o.immutables.safety_deposit.to_string(),
            timelocks: o.immutables.timelocks,
            src_escrow_address: o.src_escrow_address,
            dst_escrow_address_predicted: o.dst_escrow_address_predicted,
            dst_escrow_address_actual: o.dst_escrow_address_actual,
            status: o.status,
            created_at: o.created_at,
            updated_at: o.updated_at,
            secret: o.secret,
            reason: o.reason.clone(),
        }
    }
}

impl TryFrom<OrderStateJson> for OrderState {
    type Error = String;

    fn try_from(d: OrderStateJson) -> std::result::Result<Self, String> {
        let parse = |s: &str| U256::from_dec_str(s).map_err(|e| e.to_string());
        let immutables = Immutables {
            order_hash: d.order_hash,
            hashlock: d.hashlock,
            maker: d.maker,
            taker: d.taker,
            token: d.token,
            amount: parse(&d.amount)?,
            safety_deposit: parse(&d.imm_safety_deposit)?,
            timelocks: d.timelocks,
        };
        let params = OrderParams {
            src_chain_id: d.src_chain_id,
            dst_chain_id: d.dst_chain_id,
            src_token: d.src_token,
            dst_token: d.dst_token,
            src_amount: parse(&d.src_amount)?,
            dst_amount: parse(&d.dst_amount)?,
            safety_deposit: parse(&d.safety_deposit)?,
            is_eth_deposit: d.is_eth_deposit,
        };
        Ok(OrderState {
            id: OrderId::new(d.src_chain_id, d.order_hash),
            params,
            immutables,
            src_escrow_address: d.src_escrow_address,
            dst_escrow_address_predicted: d.dst_escrow_address_predicted,
            dst_escrow_address_actual: d.dst_escrow_address_actual,
            status: d.status,
            created_at: d.created_at,
            updated_at: d.updated_at,
            secret: d.secret,
            reason: d.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order(order_hash: H256) -> OrderState {
        let timelocks = Timelocks {
            src_withdrawal: 0,
            src_public_withdrawal: 10,
            src_cancellation: 30,
            src_public_cancellation: 45,
            dst_withdrawal: 0,
            dst_cancellation: 20,
        };
        let immutables = Immutables {
            order_hash,
            hashlock: H256::repeat_byte(2),
            maker: Address::repeat_byte(3),
            taker: Address::repeat_byte(4),
            token: Address::repeat_byte(5),
            amount: U256::from(1_000u64),
            safety_deposit: U256::from(1u64),
            timelocks,
        };
        let params = OrderParams {
            src_chain_id: 1,
            dst_chain_id: 2,
            src_token: Address::repeat_byte(5),
            dst_token: Address::repeat_byte(6),
            src_amount: U256::from(1_000u64),
            dst_amount: U256::from(1_000u64),
            safety_deposit: U256::from(1u64),
            is_eth_deposit: true,
        };
        OrderState::new(OrderId::new(1, order_hash), params, immutables, 1_000)
    }

    fn open_tmp() -> (OrderStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = OrderStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn add_is_idempotent_for_duplicate_order_hash() {
        let (store, _dir) = open_tmp();
        let order = sample_order(H256::repeat_byte(7));
        assert!(store.add(order.clone()).await.unwrap());
        assert!(!store.add(order).await.unwrap());
    }

    #[tokio::test]
    async fn status_index_moves_with_transitions() {
        let (store, _dir) = open_tmp();
        let order = sample_order(H256::repeat_byte(8));
        let id = order.id;
        store.add(order).await.unwrap();
        store
            .update_status(id, OrderStatus::SrcEscrowDeployed, 1_001)
            .await
            .unwrap();
        assert_eq!(store.list_by_status(OrderStatus::Created).unwrap().len(), 0);
        assert_eq!(
            store.list_by_status(OrderStatus::SrcEscrowDeployed).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let (store, _dir) = open_tmp();
        let order = sample_order(H256::repeat_byte(9));
        let id = order.id;
        store.add(order).await.unwrap();
        assert!(store
            .update_status(id, OrderStatus::Completed, 1_001)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn orders_needing_action_excludes_orders_with_dst_escrow() {
        let (store, _dir) = open_tmp();
        let order = sample_order(H256::repeat_byte(10));
        let id = order.id;
        store.add(order).await.unwrap();
        store
            .update_status(id, OrderStatus::SrcEscrowDeployed, 1_001)
            .await
            .unwrap();
        assert_eq!(store.orders_needing_action().unwrap().len(), 1);
        store
            .update_escrows(id, None, None, Some(Address::repeat_byte(0xAA)), 1_002)
            .await
            .unwrap();
        assert_eq!(store.orders_needing_action().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_orders() {
        let (store, _dir) = open_tmp();
        let mut order = sample_order(H256::repeat_byte(11));
        order.status = OrderStatus::Completed;
        order.updated_at = 0;
        store.add(order).await.unwrap();
        let removed = store.cleanup_older_than(Duration::from_secs(10), 1_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_active(), 0);
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip_through_decimal_json() {
        let dir = tempfile::tempdir().unwrap();
        let order = sample_order(H256::repeat_byte(12));
        let id = order.id;
        {
            let store = OrderStore::open(dir.path()).unwrap();
            store.add(order).await.unwrap();
            store.snapshot().unwrap();
        }
        let restore_dir = tempfile::tempdir().unwrap();
        std::fs::copy(
            dir.path().join("order_state.json"),
            restore_dir.path().join("order_state.json"),
        )
        .unwrap();
        let restored_store = OrderStore::open(restore_dir.path()).unwrap();
        let loaded = restored_store.restore().unwrap();
        assert_eq!(loaded, 1);
        assert!(restored_store.get(id).unwrap().is_some());
    }
}
