//! The `Immutables` tuple that uniquely identifies one escrow instance (§3).
//!
//! Grounded on the teacher's `eth/utils.rs::Immutables` struct, which already
//! carries exactly these eight fields for ABI encoding; this version adds
//! `order_id`/validation/ABI round-tripping so it can serve as the shared
//! identity used by the store, monitors, and executor.

use ethers::abi::{Token, Tokenizable};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::timelocks::Timelocks;
use crate::error::{ResolverError, Result};

/// `(src_chain_id, order_hash)`, per §3's `OrderState::id` definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    pub src_chain_id: u64,
    pub order_hash: H256,
}

impl OrderId {
    pub fn new(src_chain_id: u64, order_hash: H256) -> Self {
        Self {
            src_chain_id,
            order_hash,
        }
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.src_chain_id, self.order_hash)
    }
}

/// Canonical immutables tuple shared by the source and destination escrow of
/// one swap (§3). `maker`/`taker` are swapped between the two escrows; the
/// caller is responsible for constructing the destination-side variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immutables {
    pub order_hash: H256,
    pub hashlock: H256,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub timelocks: Timelocks,
}

impl Immutables {
    /// Validate the timelock ordering invariant (P4) that must hold for any
    /// immutables ingested from a monitor event.
    pub fn validate(&self) -> Result<()> {
        self.timelocks.validate()
    }

    /// Build the destination-side immutables for the same swap: maker/taker
    /// swap roles (§3, "on the destination escrow the resolver is the
    /// 'maker' and the original maker is the 'taker'"), and token/amount are
    /// the destination-chain equivalents supplied by the caller.
    pub fn to_dst(
        &self,
        resolver: Address,
        dst_token: Address,
        dst_amount: U256,
        dst_safety_deposit: U256,
    ) -> Immutables {
        Immutables {
            order_hash: self.order_hash,
            hashlock: self.hashlock,
            maker: resolver,
            taker: self.maker,
            token: dst_token,
            amount: dst_amount,
            safety_deposit: dst_safety_deposit,
            timelocks: self.timelocks,
        }
    }

    /// keccak256 of the ABI-encoded tuple; this is the CREATE2 salt (§3, §6).
    pub fn salt(&self) -> H256 {
        let encoded = ethers::abi::encode(&[self.clone().into_token()]);
        H256::from(ethers::utils::keccak256(encoded))
    }
}

impl Tokenizable for Immutables {
    fn from_token(token: Token) -> std::result::Result<Self, ethers::abi::InvalidOutputType>
    where
        Self: Sized,
    {
        let Token::Tuple(fields) = token else {
            return Err(ethers::abi::InvalidOutputType(
                "expected tuple for Immutables".to_string(),
            ));
        };
        if fields.len() != 8 {
            return Err(ethers::abi::InvalidOutputType(format!(
                "expected 8 fields, got {}",
                fields.len()
            )));
        }
        let order_hash = H256::from_token(fields[0].clone())?;
        let hashlock = H256::from_token(fields[1].clone())?;
        let maker = Address::from_token(fields[2].clone())?;
        let taker = Address::from_token(fields[3].clone())?;
        let token_addr = Address::from_token(fields[4].clone())?;
        let amount = U256::from_token(fields[5].clone())?;
        let safety_deposit = U256::from_token(fields[6].clone())?;
        let packed_timelocks = U256::from_token(fields[7].clone())?;
        Ok(Immutables {
            order_hash,
            hashlock,
            maker,
            taker,
            token: token_addr,
            amount,
            safety_deposit,
            timelocks: Timelocks::unpack(packed_timelocks),
        })
    }

    fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes(self.order_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.hashlock.as_bytes().to_vec()),
            Token::Address(self.maker),
            Token::Address(self.taker),
            Token::Address(self.token),
            Token::Uint(self.amount),
            Token::Uint(self.safety_deposit),
            Token::Uint(self.timelocks.pack()),
        ])
    }
}

/// Parse an event's raw (order_hash, hashlock, maker, taker, amount, ...)
/// payload shape from `SrcEscrowCreated` into `Immutables`, erroring (not
/// guessing) on a malformed tuple, per §9's "validate on ingestion" note.
pub fn decode_immutables(tokens: &[Token]) -> Result<Immutables> {
    let tuple = tokens
        .first()
        .cloned()
        .ok_or_else(|| ResolverError::Protocol("empty event payload".to_string()))?;
    Immutables::from_token(tuple)
        .map_err(|e| ResolverError::Protocol(format!("failed to decode immutables: {e}")))
}
