//! Wire contract for the session transport.
//!
//! JSON over the socket: clients send [`ClientRequest`] frames carrying a
//! `requestId`, the service answers each request with a [`WireResponse`]
//! (`ack`/`error`) and pushes [`ServerEvent`] frames to everyone in the room.

use serde::{Deserialize, Serialize};

use crate::{BattleState, CharacterSnapshot, Participant, Room, RoomCode};

/// Requests sent by clients over the session transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        request_id: String,
        room_name: String,
        player_name: String,
        #[serde(default)]
        is_private: bool,
        /// Stake in wei (decimal string); present only for staked rooms.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stake_wei: Option<String>,
        /// On-chain character instance backing a staked match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_instance_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ListRooms { request_id: String },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        request_id: String,
        room_code: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stake_wei: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_instance_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { request_id: String },
    #[serde(rename_all = "camelCase")]
    SelectCharacter {
        request_id: String,
        character: CharacterSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    SetReady { request_id: String, is_ready: bool },
    #[serde(rename_all = "camelCase")]
    PerformAction { request_id: String, ability_id: u32 },
    #[serde(rename_all = "camelCase")]
    Surrender { request_id: String },
    /// Re-attach a previous participant id to a fresh connection, clearing any
    /// pending disconnect forfeit if inside the grace window.
    #[serde(rename_all = "camelCase")]
    Reconnect {
        request_id: String,
        participant_id: String,
        room_code: String,
    },
}

impl ClientRequest {
    pub fn request_id(&self) -> &str {
        match self {
            ClientRequest::CreateRoom { request_id, .. }
            | ClientRequest::ListRooms { request_id }
            | ClientRequest::JoinRoom { request_id, .. }
            | ClientRequest::LeaveRoom { request_id }
            | ClientRequest::SelectCharacter { request_id, .. }
            | ClientRequest::SetReady { request_id, .. }
            | ClientRequest::PerformAction { request_id, .. }
            | ClientRequest::Surrender { request_id }
            | ClientRequest::Reconnect { request_id, .. } => request_id,
        }
    }
}

/// Per-request responses, correlated by `requestId`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResponse {
    #[serde(rename_all = "camelCase")]
    Ack { request_id: String },
    #[serde(rename_all = "camelCase")]
    RoomList {
        request_id: String,
        rooms: Vec<Room>,
    },
    /// Rejection with enough context (room, operation) to correlate it with
    /// the originating flow.
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: String,
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_code: Option<RoomCode>,
        op: String,
    },
}

/// Events pushed by the service to room participants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected { participant_id: String },
    #[serde(rename_all = "camelCase")]
    RoomCreated { room: Room },
    #[serde(rename_all = "camelCase")]
    CreateRoomError { code: String, message: String },
    #[serde(rename_all = "camelCase")]
    RoomJoined { room: Room },
    #[serde(rename_all = "camelCase")]
    JoinRoomError { code: String, message: String },
    #[serde(rename_all = "camelCase")]
    PlayerJoined { participant: Participant },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: String },
    #[serde(rename_all = "camelCase")]
    CharacterSelected {
        player_id: String,
        character: CharacterSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReadyUpdated { player_id: String, is_ready: bool },
    #[serde(rename_all = "camelCase")]
    GameCountdown { countdown: u8 },
    #[serde(rename_all = "camelCase")]
    GameStarted { room: Room },
    #[serde(rename_all = "camelCase")]
    GameActionPerformed {
        player_id: String,
        ability_id: u32,
        damage: u32,
        new_health: u32,
        extra_turn: bool,
        battle: BattleState,
    },
    #[serde(rename_all = "camelCase")]
    ContractMovePerformed {
        player_id: String,
        ability_index: u32,
        damage: u32,
        new_health: u32,
    },
    #[serde(rename_all = "camelCase")]
    GameOver {
        winner_id: String,
        winner_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RoomClosed { room_code: RoomCode, reason: String },
}
