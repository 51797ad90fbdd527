//! Duelgrid contract bridge.
//!
//! Maps room-level events (create, join, move, forfeit) onto ledger
//! operations and ledger failures back into the error taxonomy the session
//! layer surfaces. Local gameplay pacing never waits on the ledger: the
//! socket-level turn flow is authoritative for continuity, and the ledger is
//! an eventually-consistent settlement trail. Accepted moves that fail to
//! settle are queued and retried in order.

mod ledger;
mod worker;

pub use ledger::{
    ArenaMatches, EvmLedger, InitiatedMatch, LedgerApi, LedgerCall, MatchInfo, MatchStatus,
};
pub use worker::{spawn_settlement, SettlementCommand, SettlementHandle};

use std::collections::VecDeque;
use std::future::Future;

use duelgrid_types::TimeoutPolicy;
use ethers::types::{TxHash, U256};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Error taxonomy surfaced to the bridge's caller. Each variant is distinct
/// because the user-facing recovery differs: reconnect the wallet, top up the
/// balance, retry, or abort.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("wallet is not ready: {reason}")]
    WalletNotReady { reason: String },
    #[error("contract unavailable during {op}: {reason}")]
    ContractUnavailable { op: &'static str, reason: String },
    #[error("insufficient balance: {reason}")]
    InsufficientBalance { reason: String },
    #[error("stake mismatch for match {match_id}: ledger holds {expected} wei, caller offered {offered} wei")]
    StakeMismatch {
        match_id: u64,
        expected: U256,
        offered: U256,
    },
    #[error("transaction rejected: {reason}")]
    TransactionRejected { reason: String },
    #[error("invalid stake {stake_wei} wei (must be > 0 and <= {max_wei})")]
    InvalidStake { stake_wei: U256, max_wei: U256 },
}

impl BridgeError {
    /// Stable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::WalletNotReady { .. } => "WALLET_NOT_READY",
            BridgeError::ContractUnavailable { .. } => "CONTRACT_UNAVAILABLE",
            BridgeError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BridgeError::StakeMismatch { .. } => "STAKE_MISMATCH",
            BridgeError::TransactionRejected { .. } => "TRANSACTION_REJECTED",
            BridgeError::InvalidStake { .. } => "INVALID_STAKE",
        }
    }
}

/// A move accepted locally but not yet settled on the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingMove {
    pub match_id: u64,
    pub ability_index: u8,
    pub turn: u32,
}

/// Bridges one room's match to the ledger.
///
/// `initiate_staked_match` and `join_staked_match` are request/response and
/// propagate errors to the caller; `submit_move` is fire-and-forget with a
/// retry queue; `claim_timeout_victory` is invoked at most once.
pub struct ContractBridge<L> {
    ledger: L,
    policy: TimeoutPolicy,
    max_stake_wei: U256,
    pending_moves: VecDeque<PendingMove>,
    timeout_claimed: bool,
}

impl<L: LedgerApi> ContractBridge<L> {
    pub fn new(ledger: L, policy: TimeoutPolicy, max_stake_wei: U256) -> Self {
        Self {
            ledger,
            policy,
            max_stake_wei,
            pending_moves: VecDeque::new(),
            timeout_claimed: false,
        }
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub fn pending_len(&self) -> usize {
        self.pending_moves.len()
    }

    /// Protocol-level stake bound, checked before anything touches the ledger.
    pub fn validate_stake(&self, stake_wei: U256) -> Result<(), BridgeError> {
        if stake_wei.is_zero() || stake_wei > self.max_stake_wei {
            return Err(BridgeError::InvalidStake {
                stake_wei,
                max_wei: self.max_stake_wei,
            });
        }
        Ok(())
    }

    /// Host path: open the on-chain match with the stake deposit.
    pub async fn initiate_staked_match(
        &self,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> Result<InitiatedMatch, BridgeError> {
        self.validate_stake(stake_wei)?;
        let initiated = self
            .bounded(
                "initiate_match",
                self.ledger.initiate_match(character_instance_id, stake_wei),
            )
            .await?;
        debug!(
            match_id = initiated.match_id,
            tx = %initiated.tx_hash,
            "staked match initiated"
        );
        Ok(initiated)
    }

    /// Guest path: re-fetch the recorded stake and refuse locally on any
    /// difference rather than submitting a doomed transaction.
    pub async fn join_staked_match(
        &self,
        match_id: u64,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> Result<TxHash, BridgeError> {
        self.validate_stake(stake_wei)?;
        let info = self
            .bounded("get_match", self.ledger.get_match(match_id))
            .await?;
        if info.stake != stake_wei {
            return Err(BridgeError::StakeMismatch {
                match_id,
                expected: info.stake,
                offered: stake_wei,
            });
        }
        self.bounded(
            "join_match",
            self.ledger
                .join_match(match_id, character_instance_id, stake_wei),
        )
        .await
    }

    /// Fire-and-forget settlement of an accepted move. A failure queues the
    /// move for retry instead of blocking the next local turn.
    pub async fn submit_move(&mut self, mv: PendingMove) {
        match self
            .bounded(
                "make_move",
                self.ledger.make_move(mv.match_id, mv.ability_index),
            )
            .await
        {
            Ok(tx_hash) => {
                debug!(match_id = mv.match_id, turn = mv.turn, tx = %tx_hash, "move settled");
            }
            Err(err) => {
                warn!(
                    match_id = mv.match_id,
                    turn = mv.turn,
                    %err,
                    "move settlement failed; queued for retry"
                );
                self.pending_moves.push_back(mv);
            }
        }
    }

    /// Drain queued moves in order. Stops at the first failure so the
    /// on-chain move sequence matches the accepted local sequence.
    pub async fn flush_pending(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(mv) = self.pending_moves.front().copied() {
            match self
                .bounded(
                    "make_move",
                    self.ledger.make_move(mv.match_id, mv.ability_index),
                )
                .await
            {
                Ok(tx_hash) => {
                    debug!(match_id = mv.match_id, turn = mv.turn, tx = %tx_hash, "queued move settled");
                    self.pending_moves.pop_front();
                    flushed += 1;
                }
                Err(err) => {
                    debug!(match_id = mv.match_id, turn = mv.turn, %err, "retry failed; keeping queue");
                    break;
                }
            }
        }
        flushed
    }

    /// Trigger on-chain forfeiture after a disconnect grace period expires.
    /// Invoked at most once per bridge; later calls return `Ok(None)`.
    pub async fn claim_timeout_victory(
        &mut self,
        match_id: u64,
    ) -> Result<Option<TxHash>, BridgeError> {
        if self.timeout_claimed {
            return Ok(None);
        }
        self.timeout_claimed = true;
        let tx_hash = self
            .bounded(
                "claim_timeout_victory",
                self.ledger.claim_timeout_victory(match_id),
            )
            .await?;
        debug!(match_id, tx = %tx_hash, "timeout victory claimed");
        Ok(Some(tx_hash))
    }

    /// Gas estimate passthrough for the UI layer.
    pub async fn estimate_gas(&self, call: LedgerCall) -> Result<U256, BridgeError> {
        self.bounded("estimate_gas", self.ledger.estimate_gas(call))
            .await
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BridgeError>>,
    ) -> Result<T, BridgeError> {
        match timeout(self.policy.ledger_call, fut).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ContractUnavailable {
                op,
                reason: format!("no response within {:?}", self.policy.ledger_call),
            }),
        }
    }
}
