//! Deterministic escrow address derivation (§3, §6):
//! `Addr = Create2(factory, salt=keccak(immutables), proxy_bytecode_hash)`.
//!
//! Grounded on the teacher's `calculate_contract_address` in `eth/utils.rs`,
//! which derives a CREATE (nonce-based) address for its resolver-contract
//! deployment. This generalizes the same "keccak, take last 20 bytes" shape
//! to the CREATE2 formula the spec requires for escrow clones.

use ethers::types::Address;
use ethers::utils::keccak256;

use crate::types::Immutables;

/// Compute the minimal-proxy clone address for one escrow instance.
pub fn derive_escrow_address(
    factory: Address,
    immutables: &Immutables,
    proxy_bytecode_hash: ethers::types::H256,
) -> Address {
    let salt = immutables.salt();
    let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
    buf.push(0xffu8);
    buf.extend_from_slice(factory.as_bytes());
    buf.extend_from_slice(salt.as_bytes());
    buf.extend_from_slice(proxy_bytecode_hash.as_bytes());
    let hash = keccak256(&buf);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timelocks;
    use ethers::types::{H256, U256};

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

    #[test]
    fn derivation_is_deterministic_and_20_bytes() {
        let factory = Address::repeat_byte(9);
        let proxy_hash = H256::repeat_byte(7);
        let imm = sample_immutables();
        let a1 = derive_escrow_address(factory, &imm, proxy_hash);
        let a2 = derive_escrow_address(factory, &imm, proxy_hash);
        assert_eq!(a1, a2);
    }

    #[test]
    fn different_immutables_derive_different_addresses() {
        let factory = Address::repeat_byte(9);
        let proxy_hash = H256::repeat_byte(7);
        let mut imm = sample_immutables();
        let a1 = derive_escrow_address(factory, &imm, proxy_hash);
        imm.amount = U256::from(2_000u64);
        let a2 = derive_escrow_address(factory, &imm, proxy_hash);
        assert_ne!(a1, a2);
    }
}
