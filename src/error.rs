use ethers::types::{H256, U256};
use thiserror::Error;

/// Chain-level failures, distinguished by retryability (§7).
#[derive(Debug, Error, Clone)]
pub enum ChainError {
    #[error("transient chain error: {0}")]
    Transient(String),

    #[error("reverted: {reason} (retryable={retryable})")]
    Revert { reason: String, retryable: bool },

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("insufficient native balance for gas: need {need}, have {have}")]
    InsufficientGas { need: U256, have: U256 },

    #[error("unknown revert")]
    Unknown,
}

impl ChainError {
    /// Whether the core may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::Transient(_) => true,
            ChainError::Revert { retryable, .. } => *retryable,
            ChainError::Unreachable(_) => true,
            ChainError::InsufficientGas { .. } => false,
            ChainError::Unknown => false,
        }
    }
}

/// Top-level error taxonomy (§7): every domain operation returns an outcome
/// tagged with one of these categories.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("policy rejection: {0}")]
    Policy(String),
}

impl ResolverError {
    /// Store errors are the only category that is process-fatal per §7;
    /// everything else is handled locally or terminates the single order.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolverError::Store(_) | ResolverError::Configuration(_))
    }
}

impl From<sled::Error> for ResolverError {
    fn from(e: sled::Error) -> Self {
        ResolverError::Store(e.to_string())
    }
}

impl From<bincode::Error> for ResolverError {
    fn from(e: bincode::Error) -> Self {
        ResolverError::Store(format!("serialization: {e}"))
    }
}

/// Convenience alias used throughout the resolver.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// A transaction hash paired with the chain it was broadcast on, used when
/// logging failures per §7 ("tx hash and an explorer URL").
#[derive(Debug, Clone, Copy)]
pub struct TxRef {
    pub chain_id: u64,
    pub tx_hash: H256,
}

impl TxRef {
    /// Best-effort explorer link. Unknown chain ids fall back to a generic
    /// Etherscan-shaped URL; this is a logging convenience only, never parsed.
    pub fn explorer_url(&self) -> String {
        let base = match self.chain_id {
            1 => "https://etherscan.io/tx",
            11155111 => "https://sepolia.etherscan.io/tx",
            137 => "https://polygonscan.com/tx",
            _ => "https://etherscan.io/tx",
        };
        format!("{base}/{:?}", self.tx_hash)
    }
}
