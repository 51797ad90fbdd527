//! Mailbox for the room coordinator.
//!
//! Every room mutation travels through this channel and is processed by the
//! single coordinator task, which is what guarantees that no two actions for
//! the same room are ever evaluated against a stale turn-owner snapshot.

use duelgrid_engine::{RoomError, SessionError};
use duelgrid_types::{CharacterSnapshot, Room, RoomCode, ServerEvent};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("room coordinator unavailable")]
    Unavailable,
}

impl CoordinatorError {
    /// Stable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Room(err) => match err {
                RoomError::DuplicateCode { .. } => "DUPLICATE_CODE",
                RoomError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
                RoomError::RoomFull { .. } => "ROOM_FULL",
                RoomError::AlreadyInRoom { .. } => "ALREADY_IN_ROOM",
                RoomError::NotInRoom { .. } => "NOT_IN_ROOM",
            },
            CoordinatorError::Session(err) => match err {
                SessionError::UnknownPlayer { .. } => "UNKNOWN_PLAYER",
                SessionError::SelectionClosed { .. } => "SELECTION_CLOSED",
                SessionError::ReadinessClosed { .. } => "READINESS_CLOSED",
                SessionError::NoCharacterSelected => "NO_CHARACTER_SELECTED",
                SessionError::CountdownNotArmed { .. } | SessionError::NotCountingDown => {
                    "COUNTDOWN_NOT_ARMED"
                }
                SessionError::BattleNotStarted => "BATTLE_NOT_STARTED",
                SessionError::InvalidCharacter(_) => "INVALID_CHARACTER",
                SessionError::Battle(err) => match err {
                    duelgrid_engine::BattleError::NotYourTurn => "NOT_YOUR_TURN",
                    duelgrid_engine::BattleError::UnknownAbility { .. } => "UNKNOWN_ABILITY",
                    duelgrid_engine::BattleError::InsufficientMana { .. } => "INSUFFICIENT_MANA",
                    duelgrid_engine::BattleError::BattleOver => "BATTLE_OVER",
                },
            },
            CoordinatorError::Unavailable => "COORDINATOR_UNAVAILABLE",
        }
    }
}

/// A room the caller just entered: its snapshot plus the event subscription
/// that will carry every subsequent update.
pub struct RoomOpened {
    pub room: Room,
    pub events: broadcast::Receiver<ServerEvent>,
}

/// Messages sent to the coordinator.
pub enum Message {
    CreateRoom {
        host_id: String,
        host_name: String,
        room_name: String,
        is_private: bool,
        stake_wei: Option<String>,
        contract_match_id: Option<u64>,
        respond: oneshot::Sender<Result<RoomOpened, CoordinatorError>>,
    },
    ListRooms {
        respond: oneshot::Sender<Vec<Room>>,
    },
    GetRoom {
        code: RoomCode,
        respond: oneshot::Sender<Option<Room>>,
    },
    JoinRoom {
        code: RoomCode,
        player_id: String,
        player_name: String,
        respond: oneshot::Sender<Result<RoomOpened, CoordinatorError>>,
    },
    LeaveRoom {
        code: RoomCode,
        player_id: String,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    SelectCharacter {
        code: RoomCode,
        player_id: String,
        character: CharacterSnapshot,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    SetReady {
        code: RoomCode,
        player_id: String,
        is_ready: bool,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    PerformAction {
        code: RoomCode,
        player_id: String,
        ability_id: u32,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Surrender {
        code: RoomCode,
        player_id: String,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Reconnect {
        code: RoomCode,
        player_id: String,
        respond: oneshot::Sender<Result<RoomOpened, CoordinatorError>>,
    },
    Disconnected {
        code: RoomCode,
        player_id: String,
    },
}

/// Cloneable sender half of the coordinator mailbox.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(crate) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CoordinatorError>>) -> Message,
    ) -> Result<T, CoordinatorError> {
        let (respond, receiver) = oneshot::channel();
        if self.sender.send(build(respond)).await.is_err() {
            return Err(CoordinatorError::Unavailable);
        }
        receiver.await.unwrap_or(Err(CoordinatorError::Unavailable))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_room(
        &self,
        host_id: String,
        host_name: String,
        room_name: String,
        is_private: bool,
        stake_wei: Option<String>,
        contract_match_id: Option<u64>,
    ) -> Result<RoomOpened, CoordinatorError> {
        self.request(|respond| Message::CreateRoom {
            host_id,
            host_name,
            room_name,
            is_private,
            stake_wei,
            contract_match_id,
            respond,
        })
        .await
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let (respond, receiver) = oneshot::channel();
        if self.sender.send(Message::ListRooms { respond }).await.is_err() {
            return Vec::new();
        }
        receiver.await.unwrap_or_default()
    }

    pub async fn get_room(&self, code: RoomCode) -> Option<Room> {
        let (respond, receiver) = oneshot::channel();
        if self
            .sender
            .send(Message::GetRoom { code, respond })
            .await
            .is_err()
        {
            return None;
        }
        receiver.await.unwrap_or_default()
    }

    pub async fn join_room(
        &self,
        code: RoomCode,
        player_id: String,
        player_name: String,
    ) -> Result<RoomOpened, CoordinatorError> {
        self.request(|respond| Message::JoinRoom {
            code,
            player_id,
            player_name,
            respond,
        })
        .await
    }

    pub async fn leave_room(
        &self,
        code: RoomCode,
        player_id: String,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond| Message::LeaveRoom {
            code,
            player_id,
            respond,
        })
        .await
    }

    pub async fn select_character(
        &self,
        code: RoomCode,
        player_id: String,
        character: CharacterSnapshot,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond| Message::SelectCharacter {
            code,
            player_id,
            character,
            respond,
        })
        .await
    }

    pub async fn set_ready(
        &self,
        code: RoomCode,
        player_id: String,
        is_ready: bool,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond| Message::SetReady {
            code,
            player_id,
            is_ready,
            respond,
        })
        .await
    }

    pub async fn perform_action(
        &self,
        code: RoomCode,
        player_id: String,
        ability_id: u32,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond| Message::PerformAction {
            code,
            player_id,
            ability_id,
            respond,
        })
        .await
    }

    pub async fn surrender(
        &self,
        code: RoomCode,
        player_id: String,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond| Message::Surrender {
            code,
            player_id,
            respond,
        })
        .await
    }

    pub async fn reconnect(
        &self,
        code: RoomCode,
        player_id: String,
    ) -> Result<RoomOpened, CoordinatorError> {
        self.request(|respond| Message::Reconnect {
            code,
            player_id,
            respond,
        })
        .await
    }

    pub async fn disconnected(&self, code: RoomCode, player_id: String) {
        if self
            .sender
            .send(Message::Disconnected { code, player_id })
            .await
            .is_err()
        {
            warn!("coordinator mailbox closed; disconnect dropped");
        }
    }
}
