use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use duelgrid_bridge::{ContractBridge, EvmLedger};
use duelgrid_service::actor::Coordinator;
use duelgrid_service::{router, AppState};
use duelgrid_types::TimeoutPolicy;
use ethers::types::U256;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Duelgrid session service")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "9200")]
    port: u16,

    /// EVM JSON-RPC endpoint URL
    #[arg(long)]
    evm_rpc_url: Option<String>,

    /// EVM private key for the service wallet
    #[arg(long)]
    evm_private_key: Option<String>,

    /// Arena contract address
    #[arg(long)]
    arena_address: Option<String>,

    /// EVM chain id
    #[arg(long, default_value = "1")]
    evm_chain_id: u64,

    /// Maximum accepted stake in wei (default 1 ETH)
    #[arg(long, default_value = "1000000000000000000")]
    max_stake_wei: String,

    /// Upper bound on any single ledger call, in seconds
    #[arg(long, default_value = "30")]
    ledger_timeout_secs: u64,

    /// Disconnect grace period before forfeit, in seconds
    #[arg(long, default_value = "30")]
    disconnect_grace_secs: u64,

    /// Countdown tick interval, in milliseconds
    #[arg(long, default_value = "1000")]
    countdown_interval_ms: u64,

    /// Retry interval for queued settlement calls, in milliseconds
    #[arg(long, default_value = "5000")]
    settlement_retry_ms: u64,
}

fn arg_or_env(value: Option<String>, env_key: &str) -> Option<String> {
    value.or_else(|| env::var(env_key).ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let policy = TimeoutPolicy {
        ledger_call: Duration::from_secs(args.ledger_timeout_secs),
        disconnect_grace: Duration::from_secs(args.disconnect_grace_secs),
        countdown_interval: Duration::from_millis(args.countdown_interval_ms),
        settlement_retry: Duration::from_millis(args.settlement_retry_ms),
    };
    let max_stake_wei =
        U256::from_dec_str(&args.max_stake_wei).context("invalid --max-stake-wei")?;

    let evm_rpc_url = arg_or_env(args.evm_rpc_url, "DUELGRID_EVM_RPC_URL");
    let evm_private_key = arg_or_env(args.evm_private_key, "DUELGRID_EVM_PRIVATE_KEY");
    let arena_address = arg_or_env(args.arena_address, "DUELGRID_ARENA_ADDRESS");

    let ledger = match (evm_rpc_url, evm_private_key, arena_address) {
        (Some(rpc_url), Some(private_key), Some(address)) => {
            let ledger =
                EvmLedger::connect(&rpc_url, &private_key, &address, args.evm_chain_id)
                    .context("failed to connect ledger")?;
            info!(contract = %address, chain_id = args.evm_chain_id, "ledger connected");
            Some(ledger)
        }
        _ => {
            info!("ledger not configured; staked rooms disabled");
            None
        }
    };

    let bridge = ledger
        .clone()
        .map(|ledger| Arc::new(ContractBridge::new(ledger, policy, max_stake_wei)));

    let (coordinator, mailbox) = Coordinator::new(policy, ledger, max_stake_wei);
    coordinator.start();

    let state = AppState { mailbox, bridge };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen addr")?;
    info!(%addr, "duelgrid session service listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
