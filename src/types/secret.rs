//! `SecretRecord` (§3, §4.2).

use ethers::types::H256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub hashlock: H256,
    pub secret: H256,
    pub order_hash: H256,
    pub escrow_address: ethers::types::Address,
    pub chain_id: u64,
    pub status: SecretStatus,
    pub reveal_tx: Option<H256>,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
}

impl SecretRecord {
    pub fn new_pending(
        hashlock: H256,
        secret: H256,
        order_hash: H256,
        escrow_address: ethers::types::Address,
        chain_id: u64,
    ) -> Self {
        Self {
            hashlock,
            secret,
            order_hash,
            escrow_address,
            chain_id,
            status: SecretStatus::Pending,
            reveal_tx: None,
            gas_used: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretStoreStatistics {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub by_chain: std::collections::BTreeMap<u64, u64>,
}
