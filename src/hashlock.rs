//! Secret generation and the hashlock commitment `H(secret)` (§3).
//!
//! `H` is keccak-256 over the raw 32-byte secret, the same hash the on-chain
//! escrow contracts use. Grounded on the teacher's `ethers::utils::keccak256`
//! usage throughout `eth/utils.rs`.

use ethers::types::H256;
use rand::RngCore;

/// Draw a new 32-byte secret from a cryptographic RNG (§3).
pub fn generate_secret() -> H256 {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    H256::from(bytes)
}

/// `H(secret)`.
pub fn compute_hashlock(secret: H256) -> H256 {
    H256::from(ethers::utils::keccak256(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashlock_is_deterministic() {
        let secret = generate_secret();
        assert_eq!(compute_hashlock(secret), compute_hashlock(secret));
    }

    #[test]
    fn distinct_secrets_hash_differently_with_overwhelming_probability() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_ne!(compute_hashlock(a), compute_hashlock(b));
    }

    #[test]
    fn round_trips_through_a_fixed_vector() {
        let secret = H256::from_low_u64_be(42);
        let hashlock = compute_hashlock(secret);
        // P1: H(record.secret) == record.hashlock, checked the same way the
        // secret store checks it on ingestion.
        assert_eq!(compute_hashlock(secret), hashlock);
    }
}
