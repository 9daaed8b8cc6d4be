//! Destination Monitor (§4.5): detects secret reveals on chain B.
//!
//! The set of destination escrows is not known in advance, so filtering is
//! by topic only (no address filter), the same "watch everything, validate
//! against local state" shape as the Source Monitor, reusing
//! [`crate::chain::gateway::ChainGateway::watch_logs`].

use std::sync::Arc;

use ethers::types::{Address, H256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chain::abi::{decode_escrow_withdrawal, ESCROW_WITHDRAWAL_TOPIC};
use crate::chain::gateway::{ChainGateway, LogFilter, WatchHandle};
use crate::hashlock::compute_hashlock;
use crate::store::OrderStore;

/// One confirmed secret reveal (§4.5).
#[derive(Debug, Clone)]
pub struct SecretRevealed {
    pub escrow_address: Address,
    pub secret: H256,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

pub struct DestinationMonitor {
    gateway: Arc<ChainGateway>,
    order_store: Arc<OrderStore>,
}

impl DestinationMonitor {
    pub fn new(gateway: Arc<ChainGateway>, order_store: Arc<OrderStore>) -> Self {
        Self { gateway, order_store }
    }

    /// Subscribe to `EscrowWithdrawal(secret)` across all addresses and
    /// stream validated `SecretRevealed` events. A log whose secret doesn't
    /// hash to any order in the destination-escrow index (§4.5: "verifies
    /// that H(secret) equals the hashlock of some active order") is logged
    /// and dropped, never forwarded.
    pub fn start(
        self: Arc<Self>,
        start_block: u64,
    ) -> (mpsc::UnboundedReceiver<SecretRevealed>, WatchHandle) {
        let filter = LogFilter {
            address: None,
            topic0: *ESCROW_WITHDRAWAL_TOPIC,
            topic1: None,
        };
        let (mut raw_logs, handle) = self.gateway.clone().watch_logs(filter, start_block);
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(log) = raw_logs.recv().await {
                let escrow_address = log.address;
                let Some(block_number) = log.block_number.map(|b| b.as_u64()) else {
                    continue;
                };
                let Some(tx_hash) = log.transaction_hash else {
                    continue;
                };
                let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or(0);

                let secret = match decode_escrow_withdrawal(&log.data) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to decode EscrowWithdrawal log, dropping");
                        continue;
                    }
                };

                let Some(order_id) = monitor.order_store.find_by_dst_escrow(escrow_address) else {
                    debug!(?escrow_address, "reveal at an escrow this resolver doesn't track, dropping");
                    continue;
                };
                let Ok(Some(order)) = monitor.order_store.get(order_id) else {
                    continue;
                };
                if compute_hashlock(secret) != order.immutables.hashlock {
                    warn!(
                        ?escrow_address,
                        order_id = %order_id,
                        "revealed secret does not match the tracked order's hashlock, dropping"
                    );
                    continue;
                }

                let event = SecretRevealed {
                    escrow_address,
                    secret,
                    block_number,
                    tx_hash,
                    log_index,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlock::generate_secret;

    #[test]
    fn hashlock_check_matches_only_the_right_secret() {
        let secret = generate_secret();
        let hashlock = compute_hashlock(secret);
        let other = generate_secret();
        assert_eq!(compute_hashlock(secret), hashlock);
        assert_ne!(compute_hashlock(other), hashlock);
    }
}
