pub mod immutables;
pub mod order;
pub mod secret;
pub mod timelocks;

pub use immutables::{decode_immutables, Immutables, OrderId};
pub use order::{OrderParams, OrderState, OrderStatus};
pub use secret::{SecretRecord, SecretStatus, SecretStoreStatistics};
pub use timelocks::Timelocks;

use ethers::types::U256;

/// Worst-case native-currency cost for a full happy-path swap (§4.7
/// `estimate`).
#[derive(Debug, Clone, Copy)]
pub struct GasCosts {
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub native_cost: U256,
}

/// The tagged operation kind every write passes to the gateway (§4.1), used
/// to select a gas buffer/floor and to classify non-retryable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Approve,
    DeployDstEscrow,
    Withdraw,
    Cancel,
    Default,
}
