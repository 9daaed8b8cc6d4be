//! Gas policy: per-`OperationKind` buffer multiplier and floor, plus fee
//! selection via a `FeeStrategy` (§4.1).
//!
//! Grounded on the teacher's hardcoded `max_gas_fee` / `max_priority_fee_per_gas`
//! / `gas_limit` constants sprinkled through `eth/utils.rs`'s `deploy_*`
//! functions; this generalizes those magic numbers into one policy table.

use ethers::types::U256;

use crate::config::FeeStrategy;
use crate::types::OperationKind;

#[derive(Debug, Clone, Copy)]
struct Buffer {
    multiplier: f64,
    floor: u64,
}

fn buffer_for(kind: OperationKind) -> Buffer {
    match kind {
        OperationKind::Approve => Buffer {
            multiplier: 1.3,
            floor: 60_000,
        },
        OperationKind::DeployDstEscrow => Buffer {
            multiplier: 1.5,
            floor: 250_000,
        },
        OperationKind::Withdraw => Buffer {
            multiplier: 1.3,
            floor: 120_000,
        },
        OperationKind::Cancel => Buffer {
            multiplier: 1.3,
            floor: 100_000,
        },
        OperationKind::Default => Buffer {
            multiplier: 2.0,
            floor: 50_000,
        },
    }
}

/// Apply the kind-specific buffer and floor to a raw `eth_estimateGas` result.
pub fn buffered_gas_limit(kind: OperationKind, estimated: U256) -> U256 {
    let buffer = buffer_for(kind);
    let buffered = apply_multiplier(estimated, buffer.multiplier);
    buffered.max(U256::from(buffer.floor))
}

fn apply_multiplier(value: U256, multiplier: f64) -> U256 {
    // U256 has no native float math; scale by a fixed-point factor (basis
    // points) to stay within integer arithmetic without losing precision.
    let bps = (multiplier * 10_000.0).round() as u64;
    value.saturating_mul(U256::from(bps)) / U256::from(10_000u64)
}

/// Scale the network's current priority fee by the configured strategy.
pub fn priority_fee_for_strategy(strategy: FeeStrategy, network_priority_fee: U256) -> U256 {
    apply_multiplier(network_priority_fee, strategy.priority_multiplier())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_applies_when_estimate_is_tiny() {
        let limit = buffered_gas_limit(OperationKind::DeployDstEscrow, U256::from(1u64));
        assert_eq!(limit, U256::from(250_000u64));
    }

    #[test]
    fn multiplier_applies_when_estimate_exceeds_floor() {
        let limit = buffered_gas_limit(OperationKind::Withdraw, U256::from(1_000_000u64));
        assert_eq!(limit, U256::from(1_300_000u64));
    }

    #[test]
    fn fee_strategy_scales_priority_fee() {
        let base = U256::from(1_000_000_000u64);
        let fast = priority_fee_for_strategy(FeeStrategy::Fast, base);
        let slow = priority_fee_for_strategy(FeeStrategy::Slow, base);
        assert!(fast > base);
        assert!(slow < base);
    }
}
