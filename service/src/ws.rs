//! WebSocket session handling.
//!
//! Each connection gets a writer task fed by an unbounded channel, a
//! participant id issued at upgrade, and (once in a room) a forwarder task
//! that relays the room's broadcast events onto the socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use ethers::types::U256;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use duelgrid_types::{ClientRequest, RoomCode, ServerEvent, WireResponse};

use crate::ingress::CoordinatorError;
use crate::AppState;

pub async fn ws_handler(
    AxumState(state): AxumState<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

struct ConnState {
    participant_id: String,
    room: Option<RoomCode>,
    forwarder: Option<JoinHandle<()>>,
}

type Outbound = mpsc::UnboundedSender<Message>;

fn send_json<T: Serialize>(tx: &Outbound, value: &T) {
    if let Ok(payload) = serde_json::to_string(value) {
        let _ = tx.send(Message::Text(payload));
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let participant_id = Uuid::new_v4().to_string();
    info!(%participant_id, "session connected");
    send_json(
        &tx,
        &ServerEvent::Connected {
            participant_id: participant_id.clone(),
        },
    );

    let mut conn = ConnState {
        participant_id,
        room: None,
        forwarder: None,
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                Ok(request) => handle_request(request, &state, &tx, &mut conn).await,
                Err(err) => {
                    warn!(?err, "invalid inbound message");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Socket gone without an explicit leave: the coordinator decides between
    // plain leave, countdown cancellation, and the mid-battle grace timer.
    if let Some(code) = conn.room.take() {
        state
            .mailbox
            .disconnected(code, conn.participant_id.clone())
            .await;
    }
    if let Some(task) = conn.forwarder.take() {
        task.abort();
    }
    write_task.abort();
    info!(participant_id = %conn.participant_id, "session closed");
}

/// Spawn the task that relays room events onto this socket.
fn attach_room(
    conn: &mut ConnState,
    tx: &Outbound,
    code: RoomCode,
    mut events: broadcast::Receiver<ServerEvent>,
) {
    if let Some(task) = conn.forwarder.take() {
        task.abort();
    }
    let tx = tx.clone();
    conn.room = Some(code);
    conn.forwarder = Some(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => send_json(&tx, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "room event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }));
}

fn ack(tx: &Outbound, request_id: &str) {
    send_json(
        tx,
        &WireResponse::Ack {
            request_id: request_id.to_string(),
        },
    );
}

fn reject(
    tx: &Outbound,
    request_id: &str,
    op: &str,
    room_code: Option<RoomCode>,
    code: &str,
    message: String,
) {
    send_json(
        tx,
        &WireResponse::Error {
            request_id: request_id.to_string(),
            code: code.to_string(),
            message,
            room_code,
            op: op.to_string(),
        },
    );
}

fn reject_coordinator(
    tx: &Outbound,
    request_id: &str,
    op: &str,
    room_code: Option<RoomCode>,
    err: &CoordinatorError,
) {
    reject(tx, request_id, op, room_code, err.code(), err.to_string());
}

async fn handle_request(
    request: ClientRequest,
    state: &AppState,
    tx: &Outbound,
    conn: &mut ConnState,
) {
    match request {
        ClientRequest::CreateRoom {
            request_id,
            room_name,
            player_name,
            is_private,
            stake_wei,
            character_instance_id,
        } => {
            if conn.room.is_some() {
                reject(
                    tx,
                    &request_id,
                    "create_room",
                    conn.room.clone(),
                    "ALREADY_IN_ROOM",
                    "already in a room".to_string(),
                );
                return;
            }

            // Staked rooms open the on-chain match before the room exists, so
            // a ledger failure never leaves a half-created room behind.
            let mut contract_match_id = None;
            if let Some(stake) = &stake_wei {
                match open_staked_match(state, stake, character_instance_id).await {
                    Ok(match_id) => contract_match_id = Some(match_id),
                    Err((code, message)) => {
                        reject(tx, &request_id, "create_room", None, code, message.clone());
                        send_json(
                            tx,
                            &ServerEvent::CreateRoomError {
                                code: code.to_string(),
                                message,
                            },
                        );
                        return;
                    }
                }
            }

            match state
                .mailbox
                .create_room(
                    conn.participant_id.clone(),
                    player_name,
                    room_name,
                    is_private,
                    stake_wei,
                    contract_match_id,
                )
                .await
            {
                Ok(opened) => {
                    let code = opened.room.code.clone();
                    debug!(%code, "room created");
                    attach_room(conn, tx, code, opened.events);
                    ack(tx, &request_id);
                }
                Err(err) => {
                    reject_coordinator(tx, &request_id, "create_room", None, &err);
                    send_json(
                        tx,
                        &ServerEvent::CreateRoomError {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        },
                    );
                }
            }
        }
        ClientRequest::ListRooms { request_id } => {
            let rooms = state.mailbox.list_rooms().await;
            send_json(tx, &WireResponse::RoomList { request_id, rooms });
        }
        ClientRequest::JoinRoom {
            request_id,
            room_code,
            player_name,
            stake_wei,
            character_instance_id,
        } => {
            if conn.room.is_some() {
                reject(
                    tx,
                    &request_id,
                    "join_room",
                    conn.room.clone(),
                    "ALREADY_IN_ROOM",
                    "already in a room".to_string(),
                );
                return;
            }
            let code = match RoomCode::parse(&room_code) {
                Ok(code) => code,
                Err(err) => {
                    reject(
                        tx,
                        &request_id,
                        "join_room",
                        None,
                        "ROOM_NOT_FOUND",
                        err.to_string(),
                    );
                    send_json(
                        tx,
                        &ServerEvent::JoinRoomError {
                            code: "ROOM_NOT_FOUND".to_string(),
                            message: err.to_string(),
                        },
                    );
                    return;
                }
            };

            // Staked rooms require a matching deposit before the seat is taken.
            if let Some(room) = state.mailbox.get_room(code.clone()).await {
                if room.is_staked() {
                    if let Err((err_code, message)) = join_staked_match(
                        state,
                        &room,
                        stake_wei.as_deref(),
                        character_instance_id,
                    )
                    .await
                    {
                        reject(
                            tx,
                            &request_id,
                            "join_room",
                            Some(code.clone()),
                            err_code,
                            message.clone(),
                        );
                        send_json(
                            tx,
                            &ServerEvent::JoinRoomError {
                                code: err_code.to_string(),
                                message,
                            },
                        );
                        return;
                    }
                }
            }

            match state
                .mailbox
                .join_room(code.clone(), conn.participant_id.clone(), player_name)
                .await
            {
                Ok(opened) => {
                    attach_room(conn, tx, code, opened.events);
                    ack(tx, &request_id);
                }
                Err(err) => {
                    reject_coordinator(tx, &request_id, "join_room", Some(code), &err);
                    send_json(
                        tx,
                        &ServerEvent::JoinRoomError {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        },
                    );
                }
            }
        }
        ClientRequest::LeaveRoom { request_id } => {
            let Some(code) = conn.room.clone() else {
                reject(
                    tx,
                    &request_id,
                    "leave_room",
                    None,
                    "NOT_IN_ROOM",
                    "not in a room".to_string(),
                );
                return;
            };
            match state
                .mailbox
                .leave_room(code.clone(), conn.participant_id.clone())
                .await
            {
                Ok(()) => {
                    conn.room = None;
                    if let Some(task) = conn.forwarder.take() {
                        task.abort();
                    }
                    ack(tx, &request_id);
                }
                Err(err) => reject_coordinator(tx, &request_id, "leave_room", Some(code), &err),
            }
        }
        ClientRequest::SelectCharacter {
            request_id,
            character,
        } => {
            let Some(code) = conn.room.clone() else {
                reject(
                    tx,
                    &request_id,
                    "select_character",
                    None,
                    "NOT_IN_ROOM",
                    "not in a room".to_string(),
                );
                return;
            };
            match state
                .mailbox
                .select_character(code.clone(), conn.participant_id.clone(), character)
                .await
            {
                Ok(()) => ack(tx, &request_id),
                Err(err) => {
                    reject_coordinator(tx, &request_id, "select_character", Some(code), &err)
                }
            }
        }
        ClientRequest::SetReady {
            request_id,
            is_ready,
        } => {
            let Some(code) = conn.room.clone() else {
                reject(
                    tx,
                    &request_id,
                    "set_ready",
                    None,
                    "NOT_IN_ROOM",
                    "not in a room".to_string(),
                );
                return;
            };
            match state
                .mailbox
                .set_ready(code.clone(), conn.participant_id.clone(), is_ready)
                .await
            {
                Ok(()) => ack(tx, &request_id),
                Err(err) => reject_coordinator(tx, &request_id, "set_ready", Some(code), &err),
            }
        }
        ClientRequest::PerformAction {
            request_id,
            ability_id,
        } => {
            let Some(code) = conn.room.clone() else {
                reject(
                    tx,
                    &request_id,
                    "perform_action",
                    None,
                    "NOT_IN_ROOM",
                    "not in a room".to_string(),
                );
                return;
            };
            match state
                .mailbox
                .perform_action(code.clone(), conn.participant_id.clone(), ability_id)
                .await
            {
                Ok(()) => ack(tx, &request_id),
                Err(err) => {
                    reject_coordinator(tx, &request_id, "perform_action", Some(code), &err)
                }
            }
        }
        ClientRequest::Surrender { request_id } => {
            let Some(code) = conn.room.clone() else {
                reject(
                    tx,
                    &request_id,
                    "surrender",
                    None,
                    "NOT_IN_ROOM",
                    "not in a room".to_string(),
                );
                return;
            };
            match state
                .mailbox
                .surrender(code.clone(), conn.participant_id.clone())
                .await
            {
                Ok(()) => ack(tx, &request_id),
                Err(err) => reject_coordinator(tx, &request_id, "surrender", Some(code), &err),
            }
        }
        ClientRequest::Reconnect {
            request_id,
            participant_id,
            room_code,
        } => {
            if conn.room.is_some() {
                reject(
                    tx,
                    &request_id,
                    "reconnect",
                    conn.room.clone(),
                    "ALREADY_IN_ROOM",
                    "already in a room".to_string(),
                );
                return;
            }
            let code = match RoomCode::parse(&room_code) {
                Ok(code) => code,
                Err(err) => {
                    reject(
                        tx,
                        &request_id,
                        "reconnect",
                        None,
                        "ROOM_NOT_FOUND",
                        err.to_string(),
                    );
                    return;
                }
            };
            match state
                .mailbox
                .reconnect(code.clone(), participant_id.clone())
                .await
            {
                Ok(opened) => {
                    conn.participant_id = participant_id;
                    attach_room(conn, tx, code, opened.events);
                    ack(tx, &request_id);
                }
                Err(err) => reject_coordinator(tx, &request_id, "reconnect", Some(code), &err),
            }
        }
    }
}

/// Host path: validate and open the on-chain match. Returns the wire error
/// code and message on failure.
async fn open_staked_match(
    state: &AppState,
    stake_wei: &str,
    character_instance_id: Option<u64>,
) -> Result<u64, (&'static str, String)> {
    let Some(bridge) = &state.bridge else {
        return Err((
            "WALLET_NOT_READY",
            "ledger is not configured on this service".to_string(),
        ));
    };
    let stake = U256::from_dec_str(stake_wei)
        .map_err(|err| ("INVALID_STAKE", format!("unparseable stake: {err}")))?;
    let character = character_instance_id.unwrap_or_default();
    match bridge.initiate_staked_match(character, stake).await {
        Ok(initiated) => Ok(initiated.match_id),
        Err(err) => Err((err.code(), err.to_string())),
    }
}

/// Guest path: re-check the recorded stake on the ledger and deposit.
async fn join_staked_match(
    state: &AppState,
    room: &duelgrid_types::Room,
    stake_wei: Option<&str>,
    character_instance_id: Option<u64>,
) -> Result<(), (&'static str, String)> {
    let Some(bridge) = &state.bridge else {
        return Err((
            "WALLET_NOT_READY",
            "ledger is not configured on this service".to_string(),
        ));
    };
    let Some(match_id) = room.contract_match_id else {
        return Err((
            "CONTRACT_UNAVAILABLE",
            "staked room has no on-chain match".to_string(),
        ));
    };
    let Some(stake_wei) = stake_wei else {
        return Err((
            "INVALID_STAKE",
            "staked room requires a stake".to_string(),
        ));
    };
    let stake = U256::from_dec_str(stake_wei)
        .map_err(|err| ("INVALID_STAKE", format!("unparseable stake: {err}")))?;
    let character = character_instance_id.unwrap_or_default();
    bridge
        .join_staked_match(match_id, character, stake)
        .await
        .map(|_| ())
        .map_err(|err| (err.code(), err.to_string()))
}
