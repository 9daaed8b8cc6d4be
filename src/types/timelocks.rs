//! Packed timelocks (§3, §6).
//!
//! Six absolute UNIX timestamps packed into one 256-bit word, 32 bits each,
//! in the fixed order `srcWithdrawal | srcPublicWithdrawal | srcCancellation |
//! srcPublicCancellation | dstWithdrawal | dstCancellation` from bit 0 upward.
//! Grounded on the teacher's `eth/utils.rs::TimelocksBuilder`, which already
//! builds a near-identical packed `U256` (it additionally reserves a
//! `deployed_at` slot at bit 224 for a 7-stage maker-traits-style timelock;
//! this spec's six-stage layout has no such slot, so it is dropped here).

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{ResolverError, Result};

const STAGE_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timelocks {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl Timelocks {
    /// Validate the inequalities required at ingestion (§3, P4):
    /// `src_withdrawal <= src_public_withdrawal < src_cancellation <
    /// src_public_cancellation` and `dst_withdrawal <= dst_cancellation`, plus
    /// the cross-escrow relationship `dst_cancellation < src_cancellation`
    /// that guarantees the resolver always has time to claim on the source.
    pub fn validate(&self) -> Result<()> {
        if !(self.src_withdrawal <= self.src_public_withdrawal
            && self.src_public_withdrawal < self.src_cancellation
            && self.src_cancellation < self.src_public_cancellation)
        {
            return Err(ResolverError::Protocol(format!(
                "source timelock ordering violated: {:?}",
                self
            )));
        }
        if self.dst_withdrawal > self.dst_cancellation {
            return Err(ResolverError::Protocol(format!(
                "destination timelock ordering violated: {:?}",
                self
            )));
        }
        if self.dst_cancellation >= self.src_cancellation {
            return Err(ResolverError::Protocol(format!(
                "dst_cancellation ({}) must be before src_cancellation ({})",
                self.dst_cancellation, self.src_cancellation
            )));
        }
        Ok(())
    }

    /// Pack into the on-chain 256-bit representation.
    pub fn pack(&self) -> U256 {
        let stages = [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_cancellation,
        ];
        let mut data = U256::zero();
        for (i, stage) in stages.iter().enumerate() {
            data |= U256::from(*stage) << (i as u32 * STAGE_BITS);
        }
        data
    }

    /// Inverse of [`Timelocks::pack`]; round-trips for any value produced by
    /// `pack` over the valid domain (§8 round-trip law).
    pub fn unpack(word: U256) -> Self {
        let mask = U256::from(u32::MAX);
        let stage = |i: u32| -> u32 { ((word >> (i * STAGE_BITS)) & mask).as_u32() };
        Self {
            src_withdrawal: stage(0),
            src_public_withdrawal: stage(1),
            src_cancellation: stage(2),
            src_public_cancellation: stage(3),
            dst_withdrawal: stage(4),
            dst_cancellation: stage(5),
        }
    }

    pub fn is_past_dst_cancellation(&self, now: u32) -> bool {
        now >= self.dst_cancellation
    }

    pub fn is_past_src_cancellation(&self, now: u32) -> bool {
        now >= self.src_cancellation
    }

    pub fn is_past_src_public_cancellation(&self, now: u32) -> bool {
        now >= self.src_public_cancellation
    }

    pub fn src_withdrawal_open(&self, now: u32) -> bool {
        now >= self.src_withdrawal
    }

    pub fn dst_withdrawal_open(&self, now: u32) -> bool {
        now >= self.dst_withdrawal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Timelocks {
        Timelocks {
            src_withdrawal: 0,
            src_public_withdrawal: 10,
            src_cancellation: 30,
            src_public_cancellation: 45,
            dst_withdrawal: 0,
            dst_cancellation: 20,
        }
    }

    #[test]
    fn pack_unpack_round_trips() {
        let tl = sample();
        let packed = tl.pack();
        assert_eq!(Timelocks::unpack(packed), tl);
    }

    #[test]
    fn validates_happy_path() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_src_ordering_violation() {
        let mut tl = sample();
        tl.src_cancellation = 5; // now < src_public_withdrawal
        assert!(tl.validate().is_err());
    }

    #[test]
    fn rejects_dst_after_src_cancellation() {
        let mut tl = sample();
        tl.dst_cancellation = tl.src_cancellation; // must be strictly before
        assert!(tl.validate().is_err());
    }

    #[test]
    fn boundary_inclusive_lower_bounds() {
        let tl = sample();
        assert!(tl.dst_withdrawal_open(tl.dst_withdrawal));
        assert!(tl.is_past_dst_cancellation(tl.dst_cancellation));
    }
}
