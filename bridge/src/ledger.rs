//! Ledger access for staked matches.
//!
//! The contract is opaque to the rest of the system; [`LedgerApi`] is the only
//! shape the core relies on, and [`EvmLedger`] is its on-chain implementation.

use std::future::Future;
use std::sync::Arc;

use ethers::contract::{parse_log, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::prelude::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TxHash, U256};

use crate::BridgeError;

abigen!(
    ArenaMatches,
    r#"[
        function initiateMatch(uint256 characterInstanceId) external payable returns (uint256)
        function joinMatch(uint256 matchId, uint256 characterInstanceId) external payable
        function makeMove(uint256 matchId, uint8 abilityIndex) external
        function claimTimeoutVictory(uint256 matchId) external
        function getMatch(uint256 matchId) external view returns (address, address, uint256, uint8)
        event MatchInitiated(uint256 indexed matchId, address indexed player1, uint256 stake)
    ]"#
);

/// Lifecycle of a match as recorded on the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStatus {
    Finding,
    Active,
    Completed,
}

impl TryFrom<u8> for MatchStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MatchStatus::Finding),
            1 => Ok(MatchStatus::Active),
            2 => Ok(MatchStatus::Completed),
            other => Err(other),
        }
    }
}

/// The ledger's record of a match. Source of truth for stake custody.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchInfo {
    pub player1: Address,
    pub player2: Address,
    pub stake: U256,
    pub status: MatchStatus,
}

/// A freshly initiated match: its on-chain id plus the transaction that
/// created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitiatedMatch {
    pub match_id: u64,
    pub tx_hash: TxHash,
}

/// A ledger call, for gas estimation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    InitiateMatch {
        character_instance_id: u64,
        stake_wei: U256,
    },
    JoinMatch {
        match_id: u64,
        character_instance_id: u64,
        stake_wei: U256,
    },
    MakeMove {
        match_id: u64,
        ability_index: u8,
    },
    ClaimTimeoutVictory {
        match_id: u64,
    },
}

/// The ledger operations the bridge consumes.
pub trait LedgerApi: Send + Sync + 'static {
    fn initiate_match(
        &self,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> impl Future<Output = Result<InitiatedMatch, BridgeError>> + Send;

    fn join_match(
        &self,
        match_id: u64,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> impl Future<Output = Result<TxHash, BridgeError>> + Send;

    fn make_move(
        &self,
        match_id: u64,
        ability_index: u8,
    ) -> impl Future<Output = Result<TxHash, BridgeError>> + Send;

    fn claim_timeout_victory(
        &self,
        match_id: u64,
    ) -> impl Future<Output = Result<TxHash, BridgeError>> + Send;

    fn get_match(&self, match_id: u64)
        -> impl Future<Output = Result<MatchInfo, BridgeError>> + Send;

    fn estimate_gas(
        &self,
        call: LedgerCall,
    ) -> impl Future<Output = Result<U256, BridgeError>> + Send;
}

type EvmClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// On-chain arena contract over JSON-RPC.
#[derive(Clone)]
pub struct EvmLedger {
    contract: ArenaMatches<EvmClient>,
}

impl EvmLedger {
    pub fn connect(
        rpc_url: &str,
        private_key: &str,
        contract_address: &str,
        chain_id: u64,
    ) -> Result<Self, BridgeError> {
        let provider =
            Provider::<Http>::try_from(rpc_url).map_err(|err| BridgeError::ContractUnavailable {
                op: "connect",
                reason: format!("invalid RPC URL: {err}"),
            })?;
        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|err| BridgeError::WalletNotReady {
                reason: format!("invalid private key: {err}"),
            })?;
        let wallet = wallet.with_chain_id(chain_id);
        let address: Address =
            contract_address
                .parse()
                .map_err(|err| BridgeError::ContractUnavailable {
                    op: "connect",
                    reason: format!("invalid contract address: {err}"),
                })?;
        let client = SignerMiddleware::new(provider, wallet);
        Ok(Self {
            contract: ArenaMatches::new(address, Arc::new(client)),
        })
    }

    async fn send_tx(
        &self,
        op: &'static str,
        call: ethers::contract::FunctionCall<Arc<EvmClient>, EvmClient, ()>,
    ) -> Result<TxHash, BridgeError> {
        let pending = call.send().await.map_err(|err| map_contract_err(op, err))?;
        Ok(pending.tx_hash())
    }
}

fn map_contract_err<M: Middleware>(op: &'static str, err: ContractError<M>) -> BridgeError {
    let reason = err.to_string();
    if reason.contains("insufficient funds") {
        return BridgeError::InsufficientBalance { reason };
    }
    if err.is_revert() {
        return BridgeError::TransactionRejected { reason };
    }
    BridgeError::ContractUnavailable { op, reason }
}

impl LedgerApi for EvmLedger {
    async fn initiate_match(
        &self,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> Result<InitiatedMatch, BridgeError> {
        let call = self
            .contract
            .initiate_match(U256::from(character_instance_id))
            .value(stake_wei);
        let pending = call
            .send()
            .await
            .map_err(|err| map_contract_err("initiate_match", err))?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|err| BridgeError::ContractUnavailable {
                op: "initiate_match",
                reason: err.to_string(),
            })?
            .ok_or(BridgeError::TransactionRejected {
                reason: "transaction dropped from the mempool".to_string(),
            })?;
        let event = receipt
            .logs
            .into_iter()
            .find_map(|log| parse_log::<MatchInitiatedFilter>(log).ok())
            .ok_or(BridgeError::ContractUnavailable {
                op: "initiate_match",
                reason: "MatchInitiated event missing from receipt".to_string(),
            })?;
        Ok(InitiatedMatch {
            match_id: event.match_id.as_u64(),
            tx_hash,
        })
    }

    async fn join_match(
        &self,
        match_id: u64,
        character_instance_id: u64,
        stake_wei: U256,
    ) -> Result<TxHash, BridgeError> {
        let call = self
            .contract
            .join_match(U256::from(match_id), U256::from(character_instance_id))
            .value(stake_wei);
        self.send_tx("join_match", call).await
    }

    async fn make_move(&self, match_id: u64, ability_index: u8) -> Result<TxHash, BridgeError> {
        let call = self.contract.make_move(U256::from(match_id), ability_index);
        self.send_tx("make_move", call).await
    }

    async fn claim_timeout_victory(&self, match_id: u64) -> Result<TxHash, BridgeError> {
        let call = self.contract.claim_timeout_victory(U256::from(match_id));
        self.send_tx("claim_timeout_victory", call).await
    }

    async fn get_match(&self, match_id: u64) -> Result<MatchInfo, BridgeError> {
        let (player1, player2, stake, status) = self
            .contract
            .get_match(U256::from(match_id))
            .call()
            .await
            .map_err(|err| map_contract_err("get_match", err))?;
        let status = MatchStatus::try_from(status).map_err(|raw| BridgeError::ContractUnavailable {
            op: "get_match",
            reason: format!("unknown match status {raw}"),
        })?;
        Ok(MatchInfo {
            player1,
            player2,
            stake,
            status,
        })
    }

    async fn estimate_gas(&self, call: LedgerCall) -> Result<U256, BridgeError> {
        let estimate = match call {
            LedgerCall::InitiateMatch {
                character_instance_id,
                stake_wei,
            } => {
                self.contract
                    .initiate_match(U256::from(character_instance_id))
                    .value(stake_wei)
                    .estimate_gas()
                    .await
            }
            LedgerCall::JoinMatch {
                match_id,
                character_instance_id,
                stake_wei,
            } => {
                self.contract
                    .join_match(U256::from(match_id), U256::from(character_instance_id))
                    .value(stake_wei)
                    .estimate_gas()
                    .await
            }
            LedgerCall::MakeMove {
                match_id,
                ability_index,
            } => {
                self.contract
                    .make_move(U256::from(match_id), ability_index)
                    .estimate_gas()
                    .await
            }
            LedgerCall::ClaimTimeoutVictory { match_id } => {
                self.contract
                    .claim_timeout_victory(U256::from(match_id))
                    .estimate_gas()
                    .await
            }
        };
        estimate.map_err(|err| map_contract_err("estimate_gas", err))
    }
}
