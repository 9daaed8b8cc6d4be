//! Executor (§4.7): wraps Chain Gateway writes with the semantics the
//! Resolver Core needs: allowance bookkeeping, deterministic-address
//! cross-checks, and version-aware `withdraw` dispatch.
//!
//! Grounded on the teacher's `deploy_eth_dest_contract`/`deploy_eth_src_contract`
//! in `eth/utils.rs`: parse a function out of an ABI, keccak-hash its
//! signature for the selector, ABI-encode the immutables tuple by hand. Kept
//! deliberately free of `ethers::contract::abigen!`, matching the teacher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use tracing::{error, info, warn};

use crate::address::derive_escrow_address;
use crate::chain::abi::{decode_dst_escrow_created, encode_call, parse_function, DST_ESCROW_CREATED_TOPIC};
use crate::chain::gateway::ChainGateway;
use crate::chain::retry::with_retry;
use crate::config::WithdrawAbi;
use crate::error::{ChainError, ResolverError, Result};
use crate::types::{GasCosts, Immutables, OrderState, OperationKind};

pub struct Executor {
    pub src_gateway: Arc<ChainGateway>,
    pub dst_gateway: Arc<ChainGateway>,
    pub src_factory: Address,
    pub dst_factory: Address,
    pub src_proxy_bytecode_hash: H256,
    pub dst_proxy_bytecode_hash: H256,
    pub src_withdraw_abi: WithdrawAbi,
    pub use_native_safety_deposit: bool,
    pub tx_retry_attempts: u32,
}

impl Executor {
    /// `estimator.with_retry(kind, fn)` (§4.6): the core wraps every
    /// executor call in this so retryable chain errors are retried locally
    /// without advancing the order's state.
    pub async fn with_retry<T, F, Fut>(&self, kind: OperationKind, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ChainError>>,
    {
        with_retry(kind_label(kind), self.tx_retry_attempts, f)
            .await
            .map_err(ResolverError::from)
    }

    /// `deploy_dst_escrow(order) → dst_escrow_address` (§4.7).
    pub async fn deploy_dst_escrow(&self, order: &OrderState) -> Result<Address> {
        let resolver = self.dst_gateway.signer_address();
        let dst_immutables = order.immutables.to_dst(
            resolver,
            order.params.dst_token,
            order.params.dst_amount,
            order.params.safety_deposit,
        );

        if !self.use_native_safety_deposit || order.params.safety_deposit.is_zero() {
            self.ensure_allowance(
                &self.dst_gateway,
                order.params.dst_token,
                resolver,
                self.dst_factory,
                order.params.dst_amount.saturating_add(order.params.safety_deposit),
            )
            .await?;
        } else {
            self.ensure_allowance(
                &self.dst_gateway,
                order.params.dst_token,
                resolver,
                self.dst_factory,
                order.params.dst_amount,
            )
            .await?;
        }

        let function = parse_function(
            "function createDstEscrow(tuple(bytes32,bytes32,address,address,address,uint256,uint256,uint256),uint256)",
        )?;
        let src_cancellation_timestamp = U256::from(order.immutables.timelocks.src_cancellation);
        let calldata = encode_call(
            &function,
            &[immutables_token(&dst_immutables), Token::Uint(src_cancellation_timestamp)],
        );
        let value = if self.use_native_safety_deposit {
            order.params.safety_deposit
        } else {
            U256::zero()
        };

        let tx_hash = self
            .dst_gateway
            .send_tx(self.dst_factory, calldata, value, OperationKind::DeployDstEscrow)
            .await?;
        let receipt = self
            .dst_gateway
            .wait_receipt(tx_hash, self.dst_gateway.confirmations, Duration::from_secs(180))
            .await?;

        let from_event = receipt
            .logs
            .iter()
            .find(|log| log.topics.first() == Some(&*DST_ESCROW_CREATED_TOPIC))
            .and_then(|log| decode_dst_escrow_created(&log.data).ok());

        let computed = derive_escrow_address(self.dst_factory, &dst_immutables, self.dst_proxy_bytecode_hash);

        match from_event {
            Some(addr) if addr == computed => {
                info!(?addr, order_id = %order.id, "dst escrow deployed");
                Ok(addr)
            }
            Some(addr) => {
                error!(
                    event_addr = ?addr,
                    computed_addr = ?computed,
                    order_id = %order.id,
                    "DstEscrowCreated event address disagrees with CREATE2 derivation"
                );
                Err(ResolverError::Protocol(format!(
                    "dst escrow address mismatch: event {addr:?} vs computed {computed:?}"
                )))
            }
            None => {
                warn!(order_id = %order.id, "DstEscrowCreated event missing or malformed, falling back to computed address");
                Ok(computed)
            }
        }
    }

    /// `lock_tokens(escrow, token, amount)` (§4.7), idempotent: checks the
    /// resolver's current allowance to `escrow`, approves a large round
    /// amount if insufficient (§5: "the executor deliberately over-approves
    /// ... to avoid frequent re-approvals"), then transfers.
    pub async fn lock_tokens(&self, gateway: &ChainGateway, escrow: Address, token: Address, amount: U256) -> Result<()> {
        self.ensure_allowance(gateway, token, gateway.signer_address(), escrow, amount).await?;
        let function = parse_function("function transfer(address,uint256) returns (bool)")?;
        let calldata = encode_call(&function, &[Token::Address(escrow), Token::Uint(amount)]);
        let tx_hash = gateway.send_tx(token, calldata, U256::zero(), OperationKind::Default).await?;
        gateway
            .wait_receipt(tx_hash, gateway.confirmations, Duration::from_secs(120))
            .await?;
        Ok(())
    }

    async fn ensure_allowance(
        &self,
        gateway: &ChainGateway,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<()> {
        let current = gateway.get_allowance(token, owner, spender).await?;
        if current >= amount {
            return Ok(());
        }
        // Over-approve by a large round amount so routine fills don't need a
        // fresh approval every time (§5).
        let approve_amount = amount.saturating_mul(U256::from(1_000u64));
        let function = parse_function("function approve(address,uint256) returns (bool)")?;
        let calldata = encode_call(&function, &[Token::Address(spender), Token::Uint(approve_amount)]);
        let tx_hash = gateway
            .send_tx(token, calldata, U256::zero(), OperationKind::Approve)
            .await?;
        gateway
            .wait_receipt(tx_hash, gateway.confirmations, Duration::from_secs(120))
            .await?;
        Ok(())
    }

    /// `withdraw_src(src_escrow, secret)` (§4.7). Dispatches on the
    /// configured `WithdrawAbi` variant (§9 Open Question 3); a mismatch
    /// between the configured variant and what the chain actually accepts
    /// surfaces as a hard, non-retryable protocol error rather than a
    /// silent fallback.
    pub async fn withdraw_src(&self, order: &OrderState, secret: H256) -> Result<H256> {
        let src_escrow = order
            .src_escrow_address
            .ok_or_else(|| ResolverError::Protocol("withdraw_src called with no src escrow".to_string()))?;
        let calldata = match self.src_withdraw_abi {
            WithdrawAbi::Legacy => {
                let function = parse_function("function withdraw(bytes32)")?;
                encode_call(&function, &[Token::FixedBytes(secret.as_bytes().to_vec())])
            }
            WithdrawAbi::Immutables => {
                let function = parse_function(
                    "function withdraw(bytes32,tuple(bytes32,bytes32,address,address,address,uint256,uint256,uint256))",
                )?;
                encode_call(
                    &function,
                    &[
                        Token::FixedBytes(secret.as_bytes().to_vec()),
                        immutables_token(&order.immutables),
                    ],
                )
            }
        };
        let tx_hash = self
            .src_gateway
            .send_tx(src_escrow, calldata, U256::zero(), OperationKind::Withdraw)
            .await?;
        self.src_gateway
            .wait_receipt(tx_hash, self.src_gateway.confirmations, Duration::from_secs(180))
            .await?;
        Ok(tx_hash)
    }

    /// `cancel_dst(dst_escrow)` (§4.7). Callers are expected to have already
    /// checked `now >= dst_cancellation` (the sweeper does); this still
    /// refuses defensively so a programming error can't send a doomed-to-revert
    /// cancellation.
    pub async fn cancel_dst(&self, order: &OrderState, now: u32) -> Result<H256> {
        let dst_escrow = order
            .dst_escrow_address_actual
            .ok_or_else(|| ResolverError::Protocol("cancel_dst called with no dst escrow".to_string()))?;
        if !order.immutables.timelocks.is_past_dst_cancellation(now) {
            return Err(ResolverError::Protocol(
                "cancel_dst called before dst_cancellation".to_string(),
            ));
        }
        let function = parse_function(
            "function cancel(tuple(bytes32,bytes32,address,address,address,uint256,uint256,uint256))",
        )?;
        let dst_immutables = order.immutables.to_dst(
            self.dst_gateway.signer_address(),
            order.params.dst_token,
            order.params.dst_amount,
            order.params.safety_deposit,
        );
        let calldata = encode_call(&function, &[immutables_token(&dst_immutables)]);
        let tx_hash = self
            .dst_gateway
            .send_tx(dst_escrow, calldata, U256::zero(), OperationKind::Cancel)
            .await?;
        self.dst_gateway
            .wait_receipt(tx_hash, self.dst_gateway.confirmations, Duration::from_secs(180))
            .await?;
        Ok(tx_hash)
    }

    /// `estimate(order) → GasCosts` (§4.7): worst-case native-currency cost
    /// for the full happy path (deploy + lock + withdraw), used by the core
    /// to gate marginal orders.
    pub async fn estimate(&self, order: &OrderState) -> Result<GasCosts> {
        use crate::chain::gas::buffered_gas_limit;

        let deploy_gas = buffered_gas_limit(OperationKind::DeployDstEscrow, U256::from(250_000u64));
        let approve_gas = buffered_gas_limit(OperationKind::Approve, U256::from(60_000u64));
        let withdraw_gas = buffered_gas_limit(OperationKind::Withdraw, U256::from(120_000u64));
        let gas_limit = deploy_gas + approve_gas + withdraw_gas;

        let (max_fee, max_priority_fee) = self
            .dst_gateway
            .estimate_fees()
            .await
            .unwrap_or((U256::from(50_000_000_000u64), U256::from(2_000_000_000u64)));

        let native_cost = gas_limit.saturating_mul(max_fee).saturating_add(
            if self.use_native_safety_deposit {
                order.params.safety_deposit
            } else {
                U256::zero()
            },
        );

        Ok(GasCosts {
            gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority_fee,
            native_cost,
        })
    }
}

fn immutables_token(immutables: &Immutables) -> Token {
    Token::Tuple(vec![
        Token::FixedBytes(immutables.order_hash.as_bytes().to_vec()),
        Token::FixedBytes(immutables.hashlock.as_bytes().to_vec()),
        Token::Address(immutables.maker),
        Token::Address(immutables.taker),
        Token::Address(immutables.token),
        Token::Uint(immutables.amount),
        Token::Uint(immutables.safety_deposit),
        Token::Uint(immutables.timelocks.pack()),
    ])
}

fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Approve => "approve",
        OperationKind::DeployDstEscrow => "deploy_dst_escrow",
        OperationKind::Withdraw => "withdraw",
        OperationKind::Cancel => "cancel",
        OperationKind::Default => "default",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutables_token_has_eight_fields() {
        use crate::types::Timelocks;
        let imm = Immutables {
            order_hash: H256::repeat_byte(1),
            hashlock: H256::repeat_byte(2),
            maker: Address::repeat_byte(3),
            taker: Address::repeat_byte(4),
            token: Address::repeat_byte(5),
            amount: U256::from(1u64),
            safety_deposit: U256::from(1u64),
            timelocks: Timelocks {
                src_withdrawal: 0,
                src_public_withdrawal: 1,
                src_cancellation: 2,
                src_public_cancellation: 3,
                dst_withdrawal: 0,
                dst_cancellation: 1,
            },
        };
        if let Token::Tuple(fields) = immutables_token(&imm) {
            assert_eq!(fields.len(), 8);
        } else {
            panic!("expected tuple token");
        }
    }
}
