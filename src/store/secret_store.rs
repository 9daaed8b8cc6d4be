//! Secret Store (§4.2): durable custody of preimages and a ledger of reveals.
//!
//! Grounded on `Counselco-chronx`'s `chronx-state::db::StateDb`, a
//! `sled::Db` with named `sled::Tree`s, `bincode` record encoding, and
//! `flush()` called after every write so nothing is acknowledged before it
//! hits disk. This store keeps two trees, `secrets` (hashlock → SecretRecord)
//! and `by_order` (order_hash → hashlock), matching the "secondary lookup by
//! order_hash" requirement in §4.2.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::H256;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{ResolverError, Result};
use crate::hashlock::compute_hashlock;
use crate::types::{SecretRecord, SecretStatus, SecretStoreStatistics};

pub struct SecretStore {
    db: sled::Db,
    secrets: sled::Tree,
    by_order: sled::Tree,
    /// Single-writer discipline per hashlock (§4.2 "a single-writer
    /// discipline is enforced").
    locks: DashMap<H256, Arc<Mutex<()>>>,
}

impl SecretStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let secrets = db.open_tree("secrets")?;
        let by_order = db.open_tree("by_order")?;
        Ok(Self {
            db,
            secrets,
            by_order,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, hashlock: H256) -> Arc<Mutex<()>> {
        self.locks.entry(hashlock).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn get_raw(&self, hashlock: H256) -> Result<Option<SecretRecord>> {
        match self.secrets.get(hashlock.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_raw(&self, record: &SecretRecord) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.secrets.insert(record.hashlock.as_bytes(), bytes)?;
        self.by_order
            .insert(record.order_hash.as_bytes(), record.hashlock.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// `store(record) → ()` (§4.2). Checks I1 (`H(secret) == hashlock`) on
    /// ingestion. Re-inserting an existing hashlock is a no-op if the secret
    /// matches (I3), a hard error otherwise.
    pub async fn store(&self, record: SecretRecord) -> Result<()> {
        if compute_hashlock(record.secret) != record.hashlock {
            return Err(ResolverError::Protocol(format!(
                "hashlock mismatch on ingestion for {:?}",
                record.hashlock
            )));
        }
        let guard = self.lock_for(record.hashlock);
        let _permit = guard.lock().await;
        if let Some(existing) = self.get_raw(record.hashlock)? {
            if existing.secret != record.secret {
                return Err(ResolverError::Protocol(format!(
                    "hashlock {:?} already bound to a different secret",
                    record.hashlock
                )));
            }
            return Ok(());
        }
        self.put_raw(&record)
    }

    pub fn get_by_hashlock(&self, hashlock: H256) -> Result<Option<H256>> {
        Ok(self.get_raw(hashlock)?.map(|r| r.secret))
    }

    pub fn get_by_order(&self, order_hash: H256) -> Result<Option<H256>> {
        let Some(hashlock_bytes) = self.by_order.get(order_hash.as_bytes())? else {
            return Ok(None);
        };
        let hashlock = H256::from_slice(&hashlock_bytes);
        self.get_by_hashlock(hashlock)
    }

    pub fn has(&self, hashlock: H256) -> Result<bool> {
        Ok(self.secrets.contains_key(hashlock.as_bytes())?)
    }

    pub fn list_pending(&self) -> Result<Vec<SecretRecord>> {
        let mut out = Vec::new();
        for item in self.secrets.iter() {
            let (_, bytes) = item?;
            let record: SecretRecord = bincode::deserialize(&bytes)?;
            if matches!(record.status, SecretStatus::Pending) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// `confirm(hashlock, tx_hash, gas_used)`, idempotent.
    pub async fn confirm(&self, hashlock: H256, tx_hash: H256, gas_used: u64) -> Result<()> {
        let guard = self.lock_for(hashlock);
        let _permit = guard.lock().await;
        let Some(mut record) = self.get_raw(hashlock)? else {
            return Err(ResolverError::Protocol(format!(
                "confirm on unknown hashlock {hashlock:?}"
            )));
        };
        record.status = SecretStatus::Confirmed;
        record.reveal_tx = Some(tx_hash);
        record.gas_used = Some(gas_used);
        self.put_raw(&record)
    }

    /// `mark_failed(hashlock, reason)`, idempotent.
    pub async fn mark_failed(&self, hashlock: H256, reason: String) -> Result<()> {
        let guard = self.lock_for(hashlock);
        let _permit = guard.lock().await;
        let Some(mut record) = self.get_raw(hashlock)? else {
            warn!(?hashlock, "mark_failed on unknown hashlock, ignoring");
            return Ok(());
        };
        record.status = SecretStatus::Failed;
        record.error = Some(reason);
        self.put_raw(&record)
    }

    pub fn statistics(&self) -> Result<SecretStoreStatistics> {
        let mut stats = SecretStoreStatistics::default();
        let mut by_chain: BTreeMap<u64, u64> = BTreeMap::new();
        for item in self.secrets.iter() {
            let (_, bytes) = item?;
            let record: SecretRecord = bincode::deserialize(&bytes)?;
            stats.total += 1;
            match record.status {
                SecretStatus::Pending => stats.pending += 1,
                SecretStatus::Confirmed => stats.confirmed += 1,
                SecretStatus::Failed => stats.failed += 1,
            }
            *by_chain.entry(record.chain_id).or_insert(0) += 1;
        }
        stats.by_chain = by_chain;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlock::{compute_hashlock, generate_secret};
    use ethers::types::Address;

    fn open_tmp() -> (SecretStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn sample(secret: H256, order_hash: H256) -> SecretRecord {
        SecretRecord::new_pending(
            compute_hashlock(secret),
            secret,
            order_hash,
            Address::repeat_byte(1),
            1,
        )
    }

    #[tokio::test]
    async fn rejects_hashlock_mismatch_on_ingestion() {
        let (store, _dir) = open_tmp();
        let secret = generate_secret();
        let mut record = sample(secret, H256::repeat_byte(9));
        record.hashlock = H256::repeat_byte(0xee);
        assert!(store.store(record).await.is_err());
    }

    #[tokio::test]
    async fn re_storing_the_same_secret_is_a_no_op() {
        let (store, _dir) = open_tmp();
        let secret = generate_secret();
        let order_hash = H256::repeat_byte(9);
        store.store(sample(secret, order_hash)).await.unwrap();
        store.store(sample(secret, order_hash)).await.unwrap();
        assert_eq!(store.statistics().unwrap().total, 1);
    }

    #[tokio::test]
    async fn re_storing_a_different_secret_for_the_same_hashlock_is_an_error() {
        let (store, _dir) = open_tmp();
        let secret = generate_secret();
        let order_hash = H256::repeat_byte(9);
        let mut record = sample(secret, order_hash);
        store.store(record.clone()).await.unwrap();
        record.secret = generate_secret();
        assert!(store.store(record).await.is_err());
    }

    #[tokio::test]
    async fn confirm_and_mark_failed_are_idempotent() {
        let (store, _dir) = open_tmp();
        let secret = generate_secret();
        let hashlock = compute_hashlock(secret);
        let order_hash = H256::repeat_byte(9);
        store.store(sample(secret, order_hash)).await.unwrap();
        store.confirm(hashlock, H256::repeat_byte(3), 21_000).await.unwrap();
        store.confirm(hashlock, H256::repeat_byte(3), 21_000).await.unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.confirmed, 1);
    }

    #[tokio::test]
    async fn secondary_index_resolves_by_order_hash() {
        let (store, _dir) = open_tmp();
        let secret = generate_secret();
        let order_hash = H256::repeat_byte(9);
        store.store(sample(secret, order_hash)).await.unwrap();
        assert_eq!(store.get_by_order(order_hash).unwrap(), Some(secret));
    }
}
