//! Typed, eagerly-validated process configuration (§6 "Environment inputs").
//!
//! Generalizes the teacher's `agent::AgentConfig::from_env` (a handful of ad
//! hoc `env::var` calls) into one validated struct per chain plus a top-level
//! `ResolverConfig`. Configuration errors refuse to start (§7).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::{Address, H256};
use serde::Deserialize;

use crate::error::{ResolverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStrategy {
    Slow,
    Standard,
    Fast,
}

impl FeeStrategy {
    /// Multiplier applied to the network's current priority fee (§4.1).
    pub fn priority_multiplier(&self) -> f64 {
        match self {
            FeeStrategy::Slow => 0.8,
            FeeStrategy::Standard => 1.0,
            FeeStrategy::Fast => 1.5,
        }
    }
}

impl FromStr for FeeStrategy {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "slow" => Ok(FeeStrategy::Slow),
            "standard" => Ok(FeeStrategy::Standard),
            "fast" => Ok(FeeStrategy::Fast),
            other => Err(ResolverError::Configuration(format!(
                "unknown fee strategy: {other}"
            ))),
        }
    }
}

/// The two flavors of on-chain `withdraw` the spec's Open Questions call out
/// (§9): implementations MUST detect the factory's version and dispatch
/// accordingly rather than guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawAbi {
    /// `withdraw(bytes32 secret)`
    Legacy,
    /// `withdraw(bytes32 secret, Immutables immutables)`
    Immutables,
}

impl FromStr for WithdrawAbi {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(WithdrawAbi::Legacy),
            "immutables" => Ok(WithdrawAbi::Immutables),
            other => Err(ResolverError::Configuration(format!(
                "unknown withdraw abi variant: {other}"
            ))),
        }
    }
}

/// Per-chain configuration: one gateway is constructed per entry.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub factory_address: Address,
    /// keccak256 of the minimal-proxy bytecode used for CREATE2 derivation;
    /// chain-specific because the proxy implementation address differs (§6).
    pub proxy_bytecode_hash: H256,
    pub confirmations: usize,
    pub withdraw_abi: WithdrawAbi,
}

impl ChainConfig {
    fn from_env(prefix: &str) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            std::env::var(format!("{prefix}{key}")).map_err(|_| {
                ResolverError::Configuration(format!("missing env var {prefix}{key}"))
            })
        };

        let chain_id: u64 = get("CHAIN_ID")?
            .parse()
            .map_err(|_| ResolverError::Configuration(format!("{prefix}CHAIN_ID not a u64")))?;
        let rpc_url = get("RPC_URL")?;
        let factory_address = Address::from_str(get("FACTORY_ADDRESS")?.trim())
            .map_err(|e| ResolverError::Configuration(format!("bad factory address: {e}")))?;
        let proxy_bytecode_hash = H256::from_str(get("PROXY_BYTECODE_HASH")?.trim())
            .map_err(|e| ResolverError::Configuration(format!("bad proxy bytecode hash: {e}")))?;
        let confirmations: usize = std::env::var(format!("{prefix}CONFIRMATIONS"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let withdraw_abi = std::env::var(format!("{prefix}WITHDRAW_ABI"))
            .ok()
            .unwrap_or_else(|| "immutables".to_string())
            .parse()?;

        Ok(Self {
            chain_id,
            rpc_url,
            factory_address,
            proxy_bytecode_hash,
            confirmations,
            withdraw_abi,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub resolver_private_key: String,
    pub src: ChainConfig,
    pub dst: ChainConfig,
    pub indexer_url: Option<String>,
    pub network_mode: NetworkMode,
    pub use_native_safety_deposit: bool,
    pub use_indexer: bool,
    pub max_concurrent_orders: usize,
    pub max_order_age: Duration,
    pub event_batch_size: u64,
    pub tx_retry_attempts: u32,
    pub fee_strategy: FeeStrategy,
    pub min_profit_bps: i64,
    pub data_dir: PathBuf,
}

impl ResolverConfig {
    /// Load and validate configuration from the process environment. Never
    /// guesses at a missing required value; missing/malformed config is a
    /// startup-refusing `ResolverError::Configuration`.
    pub fn from_env() -> Result<Self> {
        let resolver_private_key = std::env::var("RESOLVER_PRIVATE_KEY").map_err(|_| {
            ResolverError::Configuration("missing RESOLVER_PRIVATE_KEY".to_string())
        })?;
        if !resolver_private_key.starts_with("0x") || resolver_private_key.len() != 66 {
            return Err(ResolverError::Configuration(
                "RESOLVER_PRIVATE_KEY must be a 0x-prefixed 32-byte hex string".to_string(),
            ));
        }

        let src = ChainConfig::from_env("SRC_")?;
        let dst = ChainConfig::from_env("DST_")?;
        if src.chain_id == dst.chain_id {
            return Err(ResolverError::Configuration(
                "SRC_CHAIN_ID and DST_CHAIN_ID must differ".to_string(),
            ));
        }

        let indexer_url = std::env::var("INDEXER_URL").ok();
        let use_indexer = std::env::var("USE_INDEXER")
            .ok()
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if use_indexer && indexer_url.is_none() {
            return Err(ResolverError::Configuration(
                "USE_INDEXER is set but INDEXER_URL is missing".to_string(),
            ));
        }

        let network_mode = match std::env::var("NETWORK_MODE").as_deref() {
            Ok("mainnet") => NetworkMode::Mainnet,
            Ok("testnet") | Err(_) => NetworkMode::Testnet,
            Ok(other) => {
                return Err(ResolverError::Configuration(format!(
                    "unknown network mode: {other}"
                )))
            }
        };

        let use_native_safety_deposit = std::env::var("NATIVE_SAFETY_DEPOSIT")
            .ok()
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let max_concurrent_orders: usize = std::env::var("MAX_CONCURRENT_ORDERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);

        let max_order_age = Duration::from_secs(
            std::env::var("MAX_ORDER_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400 * 7),
        );

        let event_batch_size: u64 = std::env::var("EVENT_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2_000);

        let tx_retry_attempts: u32 = std::env::var("TX_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let fee_strategy: FeeStrategy = std::env::var("FEE_STRATEGY")
            .ok()
            .unwrap_or_else(|| "standard".to_string())
            .parse()?;

        let min_profit_bps: i64 = std::env::var("MIN_PROFIT_BPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        let data_dir = PathBuf::from(
            std::env::var("DATA_DIR").unwrap_or_else(|_| "./resolver-data".to_string()),
        );

        Ok(Self {
            resolver_private_key,
            src,
            dst,
            indexer_url,
            network_mode,
            use_native_safety_deposit,
            use_indexer,
            max_concurrent_orders,
            max_order_age,
            event_batch_size,
            tx_retry_attempts,
            fee_strategy,
            min_profit_bps,
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_minimal_env() {
        std::env::set_var(
            "RESOLVER_PRIVATE_KEY",
            "0x0000000000000000000000000000000000000000000000000000000000000001"
                .chars()
                .take(66)
                .collect::<String>(),
        );
        std::env::set_var("SRC_CHAIN_ID", "1");
        std::env::set_var("SRC_RPC_URL", "http://localhost:8545");
        std::env::set_var(
            "SRC_FACTORY_ADDRESS",
            "0x0000000000000000000000000000000000000001",
        );
        std::env::set_var(
            "SRC_PROXY_BYTECODE_HASH",
            "0x0000000000000000000000000000000000000000000000000000000000000002",
        );
        std::env::set_var("DST_CHAIN_ID", "2");
        std::env::set_var("DST_RPC_URL", "http://localhost:8546");
        std::env::set_var(
            "DST_FACTORY_ADDRESS",
            "0x0000000000000000000000000000000000000003",
        );
        std::env::set_var(
            "DST_PROXY_BYTECODE_HASH",
            "0x0000000000000000000000000000000000000000000000000000000000000004",
        );
    }

    #[test]
    #[ignore = "mutates process env; run with --test-threads=1"]
    fn loads_minimal_config() {
        set_minimal_env();
        let cfg = ResolverConfig::from_env().expect("should load");
        assert_eq!(cfg.src.chain_id, 1);
        assert_eq!(cfg.dst.chain_id, 2);
        assert_eq!(cfg.max_concurrent_orders, 16);
    }

    #[test]
    #[ignore = "mutates process env; run with --test-threads=1"]
    fn rejects_same_chain_on_both_sides() {
        set_minimal_env();
        std::env::set_var("DST_CHAIN_ID", "1");
        let err = ResolverConfig::from_env().unwrap_err();
        assert!(matches!(err, ResolverError::Configuration(_)));
    }
}
