//! `OrderState` and its lifecycle (§3, §4.6).

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::immutables::{Immutables, OrderId};
use super::timelocks::Timelocks;
use crate::error::{ResolverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    SrcEscrowDeployed,
    DstEscrowDeployed,
    SecretRevealed,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// The state diagram in §4.6: list of statuses this one may legally
    /// transition to. `Failed` is reachable from every non-terminal state;
    /// `Cancelled` only from `DstEscrowDeployed`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Created, SrcEscrowDeployed) => true,
            (SrcEscrowDeployed, DstEscrowDeployed) => true,
            (DstEscrowDeployed, SecretRevealed) => true,
            (DstEscrowDeployed, Cancelled) => true,
            (SecretRevealed, Completed) => true,
            (_, Failed) => true,
            _ => false,
        }
    }
}

/// Swap economics, independent of the canonical `Immutables` tuple: what the
/// profitability policy needs that isn't part of the on-chain identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: Address,
    pub dst_token: Address,
    pub src_amount: U256,
    pub dst_amount: U256,
    pub safety_deposit: U256,
    pub is_eth_deposit: bool,
}

/// One record per swap the resolver has accepted (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderState {
    pub id: OrderId,
    pub params: OrderParams,
    pub immutables: Immutables,
    pub src_escrow_address: Option<Address>,
    pub dst_escrow_address_predicted: Option<Address>,
    pub dst_escrow_address_actual: Option<Address>,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub secret: Option<H256>,
    /// Non-error bookkeeping for why the order hasn't progressed, e.g.
    /// "insufficient profit" (§8 scenario 4). Not an error channel.
    pub reason: Option<String>,
}

impl OrderState {
    pub fn new(id: OrderId, params: OrderParams, immutables: Immutables, now: i64) -> Self {
        Self {
            id,
            params,
            immutables,
            src_escrow_address: None,
            dst_escrow_address_predicted: None,
            dst_escrow_address_actual: None,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
            secret: None,
            reason: None,
        }
    }

    pub fn timelocks(&self) -> &Timelocks {
        &self.immutables.timelocks
    }

    /// Apply a status transition, enforcing the state machine (§4.6, P2).
    /// Idempotent moves into the *same* status are accepted as no-ops so
    /// replayed monitor events don't error (§8 scenario 5).
    pub fn transition(&mut self, next: OrderStatus, now: i64) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(ResolverError::Protocol(format!(
                "illegal transition {:?} -> {:?} for order {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_is_reachable_from_any_nonterminal_state() {
        for s in [
            OrderStatus::Created,
            OrderStatus::SrcEscrowDeployed,
            OrderStatus::DstEscrowDeployed,
            OrderStatus::SecretRevealed,
        ] {
            assert!(s.can_transition_to(OrderStatus::Failed));
        }
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        for s in [
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert!(!s.can_transition_to(OrderStatus::Created));
            assert!(!s.can_transition_to(OrderStatus::Failed));
        }
    }

    #[test]
    fn happy_path_sequence_is_legal() {
        use OrderStatus::*;
        let seq = [
            Created,
            SrcEscrowDeployed,
            DstEscrowDeployed,
            SecretRevealed,
            Completed,
        ];
        for w in seq.windows(2) {
            assert!(w[0].can_transition_to(w[1]));
        }
    }
}
