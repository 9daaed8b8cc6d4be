//! Profitability policy (§4.6): a pure, deterministic function the core
//! consults before committing to deploy a destination escrow.
//!
//! Per spec.md §1's Non-goals, the *numeric* policy is the operator's; this
//! module only fixes the trait boundary and ships one conservative default
//! so the crate builds and tests end-to-end without an external pricing
//! feed. Replace [`DefaultProfitabilityPolicy`] with a real one before
//! running against mainnet liquidity.

use ethers::types::{Address, U256};

/// Result of [`ProfitabilityPolicy::analyse`] (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitabilityDecision {
    pub profitable: bool,
    pub margin_bps: i64,
    pub reason: String,
}

/// Must be side-effect free and deterministic (§4.6: "so that replay
/// produces the same decision").
pub trait ProfitabilityPolicy: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn analyse(
        &self,
        src_token: Address,
        src_amount: U256,
        dst_token: Address,
        dst_amount: U256,
        safety_deposit: U256,
        is_eth_deposit: bool,
    ) -> ProfitabilityDecision;
}

/// Assumes `src_token` and `dst_token` are comparable 1:1 (e.g. both
/// stablecoins of equal decimals) and rejects anything below
/// `min_profit_bps`. This is intentionally simplistic; a real deployment
/// needs a USD/price-feed-aware policy, which is explicitly out of scope
/// (spec.md §1).
pub struct DefaultProfitabilityPolicy {
    pub min_profit_bps: i64,
}

impl DefaultProfitabilityPolicy {
    pub fn new(min_profit_bps: i64) -> Self {
        Self { min_profit_bps }
    }
}

impl ProfitabilityPolicy for DefaultProfitabilityPolicy {
    fn analyse(
        &self,
        _src_token: Address,
        src_amount: U256,
        _dst_token: Address,
        dst_amount: U256,
        safety_deposit: U256,
        is_eth_deposit: bool,
    ) -> ProfitabilityDecision {
        if src_amount.is_zero() {
            return ProfitabilityDecision {
                profitable: false,
                margin_bps: i64::MIN,
                reason: "zero source amount".to_string(),
            };
        }

        // Cost of filling the order: the destination-token payout, plus the
        // safety deposit only when it's posted in the destination token
        // rather than native currency (§4.6 `is_eth_deposit`).
        let cost = if is_eth_deposit {
            dst_amount
        } else {
            dst_amount.saturating_add(safety_deposit)
        };

        let (numerator, sign): (U256, i64) = if src_amount >= cost {
            (src_amount - cost, 1)
        } else {
            (cost - src_amount, -1)
        };
        let scaled = numerator.saturating_mul(U256::from(10_000u64)) / src_amount;
        let margin_bps = sign * scaled.low_u64() as i64;

        let profitable = margin_bps >= self.min_profit_bps;
        let reason = if profitable {
            format!("margin {margin_bps}bps >= floor {}bps", self.min_profit_bps)
        } else {
            "insufficient profit".to_string()
        };

        ProfitabilityDecision {
            profitable,
            margin_bps,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profitable_order_passes_the_floor() {
        let policy = DefaultProfitabilityPolicy::new(50);
        let decision = policy.analyse(
            Address::zero(),
            U256::from(10_100u64),
            Address::zero(),
            U256::from(10_000u64),
            U256::zero(),
            true,
        );
        assert!(decision.profitable);
    }

    #[test]
    fn scenario_4_unprofitable_order_is_rejected() {
        // §8 scenario 4: src 10e18, dst 10.001e18, min_profit_bps 50.
        let policy = DefaultProfitabilityPolicy::new(50);
        let src = U256::from(10u64) * U256::exp10(18);
        let dst = U256::from(10_001u64) * U256::exp10(15);
        let decision = policy.analyse(Address::zero(), src, Address::zero(), dst, U256::zero(), true);
        assert!(!decision.profitable);
        assert_eq!(decision.reason, "insufficient profit");
    }

    #[test]
    fn native_safety_deposit_is_excluded_from_cost() {
        let policy = DefaultProfitabilityPolicy::new(0);
        let native = policy.analyse(
            Address::zero(),
            U256::from(1_000u64),
            Address::zero(),
            U256::from(1_000u64),
            U256::from(500u64),
            true,
        );
        let token_funded = policy.analyse(
            Address::zero(),
            U256::from(1_000u64),
            Address::zero(),
            U256::from(1_000u64),
            U256::from(500u64),
            false,
        );
        assert!(native.profitable);
        assert!(!token_funded.profitable);
    }
}
