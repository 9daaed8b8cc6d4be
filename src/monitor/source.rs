//! Source Monitor (§4.4): discovers new source escrows on chain A and emits
//! a stream of `NewOrder` events.
//!
//! Grounded on the pack's on-chain intent-discovery pattern (`shahnami-oif-solver`'s
//! `Eip7683Discovery`: poll for new blocks, `get_logs` in a range, decode,
//! forward over an mpsc channel, track `last_block`), adapted from `alloy` to
//! `ethers` to match the teacher's stack, and layered on
//! [`crate::chain::gateway::ChainGateway::watch_logs`] rather than rolling
//! its own poll loop.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, H256};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::address::derive_escrow_address;
use crate::chain::abi::SRC_ESCROW_CREATED_TOPIC;
use crate::chain::gateway::{ChainGateway, LogFilter, WatchHandle};
use crate::error::ResolverError;
use crate::types::{decode_immutables, Immutables, OrderParams};

/// One discovered on-chain escrow (§4.4). `SrcEscrowCreated` only carries the
/// source-side `Immutables`; it says nothing about the destination chain,
/// token, or amount the maker actually wants. `params` is `None` for orders
/// discovered purely on-chain; the core is responsible for resolving the
/// destination-side terms (via the indexer or a matching drop-box file)
/// before it can evaluate profitability or deploy anything.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_hash: H256,
    pub src_escrow_address: Address,
    pub immutables: Immutables,
    pub params: Option<OrderParams>,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

/// Emitted when a previously-delivered `NewOrder`'s block is orphaned by a
/// reorg (§4.4): "a compensating 'invalidate' callback is issued; consumers
/// treat such a compensation as a hard-abort signal for the order".
#[derive(Debug, Clone)]
pub struct Invalidated {
    pub order_hash: H256,
}

#[derive(Debug, Clone)]
pub enum SourceMonitorEvent {
    New(NewOrder),
    Invalidated(Invalidated),
}

const IMMUTABLES_TUPLE: [ParamType; 8] = [
    ParamType::FixedBytes(32),
    ParamType::FixedBytes(32),
    ParamType::Address,
    ParamType::Address,
    ParamType::Address,
    ParamType::Uint(256),
    ParamType::Uint(256),
    ParamType::Uint(256),
];

struct SeenLog {
    block_number: u64,
    block_hash: H256,
    order_hash: H256,
}

pub struct SourceMonitor {
    gateway: Arc<ChainGateway>,
    factory: Address,
    proxy_bytecode_hash: H256,
    pending_orders_dir: Option<PathBuf>,
}

impl SourceMonitor {
    pub fn new(
        gateway: Arc<ChainGateway>,
        factory: Address,
        proxy_bytecode_hash: H256,
        pending_orders_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            factory,
            proxy_bytecode_hash,
            pending_orders_dir,
        }
    }

    /// Subscribe to the factory's `SrcEscrowCreated` topic and start
    /// streaming `SourceMonitorEvent`s from `start_block` onward. The
    /// returned `WatchHandle` stops the underlying log poll when dropped or
    /// explicitly unwatched.
    pub fn start(
        self: Arc<Self>,
        start_block: u64,
    ) -> (mpsc::UnboundedReceiver<SourceMonitorEvent>, WatchHandle) {
        let filter = LogFilter {
            address: Some(self.factory),
            topic0: *SRC_ESCROW_CREATED_TOPIC,
            topic1: None,
        };
        let (mut raw_logs, handle) = self.gateway.clone().watch_logs(filter, start_block);
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut reorg_window: VecDeque<SeenLog> = VecDeque::with_capacity(256);
            while let Some(log) = raw_logs.recv().await {
                let Some(block_number) = log.block_number.map(|b| b.as_u64()) else {
                    continue;
                };
                let Some(block_hash) = log.block_hash else {
                    continue;
                };
                let Some(tx_hash) = log.transaction_hash else {
                    continue;
                };
                let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or(0);

                match monitor.decode(&log.data) {
                    Ok(immutables) => {
                        let Some(escrow_topic) = log.topics.get(1) else { continue };
                        let src_escrow_address = Address::from_slice(&escrow_topic.as_bytes()[12..]);
                        let order_hash = immutables.order_hash;
                        if let Err(e) = immutables.validate() {
                            error!(?order_hash, error = %e, "rejecting order with invalid timelocks");
                            continue;
                        }
                        let computed = derive_escrow_address(
                            monitor.factory,
                            &immutables,
                            monitor.proxy_bytecode_hash,
                        );
                        if computed != src_escrow_address {
                            error!(
                                ?order_hash,
                                event_address = ?src_escrow_address,
                                computed_address = ?computed,
                                "src escrow address mismatch, rejecting order"
                            );
                            continue;
                        }
                        reorg_window.push_back(SeenLog {
                            block_number,
                            block_hash,
                            order_hash,
                        });
                        while reorg_window.len() > 256 {
                            reorg_window.pop_front();
                        }
                        let event = NewOrder {
                            order_hash,
                            src_escrow_address,
                            immutables,
                            params: None,
                            block_number,
                            tx_hash,
                            log_index,
                        };
                        if tx.send(SourceMonitorEvent::New(event)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to decode SrcEscrowCreated log, dropping");
                    }
                }

                monitor.check_reorgs(&mut reorg_window, &tx).await;
            }
        });
        (rx, handle)
    }

    fn decode(&self, data: &[u8]) -> Result<Immutables, ResolverError> {
        let tokens = ethers::abi::decode(&IMMUTABLES_TUPLE, data)
            .map_err(|e| ResolverError::Protocol(format!("bad SrcEscrowCreated payload: {e}")))?;
        decode_immutables(&[Token::Tuple(tokens)])
    }

    /// Best-effort reorg detection: re-fetch the canonical hash at each
    /// already-delivered block and invalidate anything whose recorded hash
    /// no longer matches (§4.4).
    async fn check_reorgs(
        &self,
        window: &mut VecDeque<SeenLog>,
        tx: &mpsc::UnboundedSender<SourceMonitorEvent>,
    ) {
        let head = match self.gateway.head_block().await {
            Ok(h) => h,
            Err(_) => return,
        };
        let mut still_valid = VecDeque::with_capacity(window.len());
        while let Some(seen) = window.pop_front() {
            if head.saturating_sub(seen.block_number) > 64 {
                // Old enough to be final; stop tracking it.
                continue;
            }
            match self.gateway.block_hash(seen.block_number).await {
                Ok(Some(canonical)) if canonical == seen.block_hash => {
                    still_valid.push_back(seen);
                }
                Ok(_) => {
                    warn!(
                        order_hash = ?seen.order_hash,
                        block_number = seen.block_number,
                        "block orphaned by reorg, invalidating order"
                    );
                    let _ = tx.send(SourceMonitorEvent::Invalidated(Invalidated {
                        order_hash: seen.order_hash,
                    }));
                }
                Err(_) => {
                    // Transport hiccup, not a confirmed orphan; keep tracking
                    // and re-check on the next log.
                    still_valid.push_back(seen);
                }
            }
        }
        *window = still_valid;
    }

    /// Alternative input: watch `pending_orders/<hashlock>.json` for
    /// maker-dropped orders awaiting a fill (§4.4, §6). Each file is decoded
    /// once and then renamed with a `.consumed` suffix so a restart doesn't
    /// replay it; malformed files are logged and skipped, never panicking
    /// the poll loop.
    pub fn start_pending_orders_watch(
        self: Arc<Self>,
    ) -> Option<mpsc::UnboundedReceiver<SourceMonitorEvent>> {
        let dir = self.pending_orders_dir.clone()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                    continue;
                };
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match tokio::fs::read_to_string(&path).await {
                        Ok(contents) => match parse_pending_order(&contents) {
                            Ok(event) => {
                                if tx.send(SourceMonitorEvent::New(event)).is_err() {
                                    return;
                                }
                                let consumed = path.with_extension("json.consumed");
                                let _ = tokio::fs::rename(&path, &consumed).await;
                            }
                            Err(e) => warn!(?path, error = %e, "malformed pending order file"),
                        },
                        Err(e) => warn!(?path, error = %e, "failed to read pending order file"),
                    }
                }
            }
        });
        Some(rx)
    }
}

#[derive(serde::Deserialize)]
struct PendingOrderFile {
    order_hash: H256,
    src_escrow_address: Address,
    immutables: Immutables,
    /// Unlike the on-chain discovery path, the maker drop-box always knows
    /// its own destination terms, so this is required here.
    params: OrderParams,
}

fn parse_pending_order(contents: &str) -> Result<NewOrder, ResolverError> {
    let file: PendingOrderFile = serde_json::from_str(contents)
        .map_err(|e| ResolverError::Protocol(format!("bad pending order json: {e}")))?;
    file.immutables.validate()?;
    if file.immutables.order_hash != file.order_hash {
        return Err(ResolverError::Protocol(
            "pending order order_hash does not match immutables".to_string(),
        ));
    }
    Ok(NewOrder {
        order_hash: file.order_hash,
        src_escrow_address: file.src_escrow_address,
        immutables: file.immutables,
        params: Some(file.params),
        block_number: 0,
        tx_hash: H256::zero(),
        log_index: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timelocks;
    use ethers::types::U256;

    fn sample_immutables() -> Immutables {
        Immutables {
            order_hash: H256::repeat_byte(1),
            hashlock: H256::repeat_byte(2),
            maker: Address::repeat_byte(3),
            taker: Address::repeat_byte(4),
            token: Address::repeat_byte(5),
            amount: U256::from(1_000u64),
            safety_deposit: U256::from(1u64),
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

    fn sample_params() -> OrderParams {
        OrderParams {
            src_chain_id: 1,
            dst_chain_id: 2,
            src_token: Address::repeat_byte(5),
            dst_token: Address::repeat_byte(6),
            src_amount: U256::from(1_000u64),
            dst_amount: U256::from(1_000u64),
            safety_deposit: U256::from(1u64),
            is_eth_deposit: true,
        }
    }

    #[test]
    fn pending_order_json_round_trips() {
        let imm = sample_immutables();
        let file = serde_json::json!({
            "order_hash": format!("{:?}", imm.order_hash),
            "src_escrow_address": format!("{:?}", Address::repeat_byte(9)),
            "immutables": imm,
            "params": sample_params(),
        });
        let parsed = parse_pending_order(&file.to_string()).unwrap();
        assert_eq!(parsed.order_hash, imm.order_hash);
        assert!(parsed.params.is_some());
    }

    #[test]
    fn pending_order_rejects_order_hash_mismatch() {
        let imm = sample_immutables();
        let file = serde_json::json!({
            "order_hash": format!("{:?}", H256::repeat_byte(0xff)),
            "src_escrow_address": format!("{:?}", Address::repeat_byte(9)),
            "immutables": imm,
            "params": sample_params(),
        });
        assert!(parse_pending_order(&file.to_string()).is_err());
    }
}
