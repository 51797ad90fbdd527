//! Settlement worker: a per-room task that owns the [`ContractBridge`] and
//! serializes its ledger writes, so the room's coordinator never suspends on
//! ledger I/O.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::{ContractBridge, LedgerApi, PendingMove};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementCommand {
    Move(PendingMove),
    ClaimTimeout { match_id: u64 },
}

/// Handle for enqueueing settlement work. Sends never block the caller.
#[derive(Clone)]
pub struct SettlementHandle {
    sender: mpsc::UnboundedSender<SettlementCommand>,
}

impl SettlementHandle {
    pub fn submit_move(&self, mv: PendingMove) {
        if self.sender.send(SettlementCommand::Move(mv)).is_err() {
            warn!(match_id = mv.match_id, turn = mv.turn, "settlement worker gone; move dropped");
        }
    }

    pub fn claim_timeout(&self, match_id: u64) {
        if self
            .sender
            .send(SettlementCommand::ClaimTimeout { match_id })
            .is_err()
        {
            warn!(match_id, "settlement worker gone; timeout claim dropped");
        }
    }
}

/// Spawn the worker. It drains commands as they arrive and retries queued
/// moves on the policy's settlement interval; dropping the handle lets it
/// attempt one final flush and exit.
pub fn spawn_settlement<L: LedgerApi>(
    bridge: ContractBridge<L>,
) -> (SettlementHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(bridge, receiver));
    (SettlementHandle { sender }, task)
}

async fn run<L: LedgerApi>(
    mut bridge: ContractBridge<L>,
    mut receiver: mpsc::UnboundedReceiver<SettlementCommand>,
) {
    let mut retry = interval(bridge.policy().settlement_retry);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    break;
                };
                match command {
                    SettlementCommand::Move(mv) => bridge.submit_move(mv).await,
                    SettlementCommand::ClaimTimeout { match_id } => {
                        if let Err(err) = bridge.claim_timeout_victory(match_id).await {
                            error!(match_id, %err, "timeout victory claim failed");
                        }
                    }
                }
            }
            _ = retry.tick() => {
                if bridge.pending_len() > 0 {
                    let flushed = bridge.flush_pending().await;
                    if flushed > 0 {
                        debug!(flushed, remaining = bridge.pending_len(), "settled queued moves");
                    }
                }
            }
        }
    }
    // Last chance for queued moves before the room goes away.
    let _ = bridge.flush_pending().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelgrid_types::TimeoutPolicy;
    use ethers::types::{Address, TxHash, U256};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::{BridgeError, InitiatedMatch, LedgerCall, MatchInfo, MatchStatus};

    #[derive(Default)]
    struct FlakyLedger {
        calls: Mutex<Vec<String>>,
        fail_moves: AtomicBool,
    }

    impl FlakyLedger {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl LedgerApi for Arc<FlakyLedger> {
        async fn initiate_match(
            &self,
            _character_instance_id: u64,
            _stake_wei: U256,
        ) -> Result<InitiatedMatch, BridgeError> {
            Ok(InitiatedMatch {
                match_id: 1,
                tx_hash: TxHash::zero(),
            })
        }

        async fn join_match(
            &self,
            _match_id: u64,
            _character_instance_id: u64,
            _stake_wei: U256,
        ) -> Result<TxHash, BridgeError> {
            Ok(TxHash::zero())
        }

        async fn make_move(&self, match_id: u64, ability_index: u8) -> Result<TxHash, BridgeError> {
            if self.fail_moves.load(Ordering::SeqCst) {
                return Err(BridgeError::ContractUnavailable {
                    op: "make_move",
                    reason: "rpc down".to_string(),
                });
            }
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("move:{match_id}:{ability_index}"));
            Ok(TxHash::zero())
        }

        async fn claim_timeout_victory(&self, match_id: u64) -> Result<TxHash, BridgeError> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("claim:{match_id}"));
            Ok(TxHash::zero())
        }

        async fn get_match(&self, _match_id: u64) -> Result<MatchInfo, BridgeError> {
            Ok(MatchInfo {
                player1: Address::zero(),
                player2: Address::zero(),
                stake: U256::zero(),
                status: MatchStatus::Active,
            })
        }

        async fn estimate_gas(&self, _call: LedgerCall) -> Result<U256, BridgeError> {
            Ok(U256::from(21_000u64))
        }
    }

    fn test_policy() -> TimeoutPolicy {
        TimeoutPolicy {
            ledger_call: Duration::from_millis(50),
            settlement_retry: Duration::from_millis(20),
            ..TimeoutPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_worker_settles_moves_and_retries_after_outage() {
        let ledger = Arc::new(FlakyLedger::default());
        let bridge = ContractBridge::new(ledger.clone(), test_policy(), U256::exp10(18));
        let (handle, task) = spawn_settlement(bridge);

        ledger.fail_moves.store(true, Ordering::SeqCst);
        handle.submit_move(PendingMove {
            match_id: 3,
            ability_index: 1,
            turn: 1,
        });
        handle.submit_move(PendingMove {
            match_id: 3,
            ability_index: 0,
            turn: 2,
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ledger.calls().is_empty());

        // The ledger recovers; the retry tick drains the queue in order.
        ledger.fail_moves.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            ledger.calls(),
            vec!["move:3:1".to_string(), "move:3:0".to_string()]
        );

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_claims_timeout_once() {
        let ledger = Arc::new(FlakyLedger::default());
        let bridge = ContractBridge::new(ledger.clone(), test_policy(), U256::exp10(18));
        let (handle, task) = spawn_settlement(bridge);

        handle.claim_timeout(3);
        handle.claim_timeout(3);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ledger.calls(), vec!["claim:3".to_string()]);

        drop(handle);
        task.await.unwrap();
    }
}
