//! Duelgrid session service.
//!
//! Axum WebSocket front end over the room coordinator: connections speak the
//! JSON wire contract from `duelgrid-types`, every room mutation serializes
//! through the coordinator actor, and staked rooms settle through the
//! contract bridge.

pub mod actor;
pub mod ingress;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use duelgrid_bridge::{ContractBridge, EvmLedger};

use crate::ingress::Mailbox;

#[derive(Clone)]
pub struct AppState {
    pub mailbox: Mailbox,
    /// Request-path bridge for opening/joining staked matches. `None` when the
    /// service runs without a ledger; staked rooms then fail with
    /// `WALLET_NOT_READY`.
    pub bridge: Option<Arc<ContractBridge<EvmLedger>>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
