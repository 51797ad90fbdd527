//! Per-room aggregate: membership, readiness, countdown, and the running
//! battle. One `RoomSession` is the single authoritative copy of a room; the
//! caller serializes all mutations through it.

use duelgrid_types::{
    BattleState, CharacterInvariantError, CharacterSnapshot, Participant, Role, Room, RoomCode,
    RoomStatus,
};
use thiserror::Error;

use crate::battle::{ActionOutcome, Battle, BattleError, TurnEnd};
use crate::damage::DamageModel;

/// First broadcast countdown value; tick 0 is the "fight" edge.
pub const COUNTDOWN_START: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("player {player_id} is not in this room")]
    UnknownPlayer { player_id: String },
    #[error("character selection is closed in status {status:?}")]
    SelectionClosed { status: RoomStatus },
    #[error("readiness changes are not accepted in status {status:?}")]
    ReadinessClosed { status: RoomStatus },
    #[error("cannot ready up without a selected character")]
    NoCharacterSelected,
    #[error("countdown is not armed in status {status:?}")]
    CountdownNotArmed { status: RoomStatus },
    #[error("room is not counting down")]
    NotCountingDown,
    #[error("battle has not started")]
    BattleNotStarted,
    #[error(transparent)]
    InvalidCharacter(#[from] CharacterInvariantError),
    #[error(transparent)]
    Battle(#[from] BattleError),
}

/// Result of a readiness update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyOutcome {
    pub role: Role,
    pub is_ready: bool,
    /// True exactly once: the first time both sides are ready with characters
    /// selected. Redundant ready echoes never re-arm the countdown.
    pub armed: bool,
}

/// One step of the countdown sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownStep {
    Tick(u8),
    /// Tick 0 reached: the room is now playing and the battle is initialized.
    Started,
}

/// What a disconnect means for the room, by phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Before any battle: plain leave semantics apply.
    LeftBeforeBattle { role: Role },
    /// A countdown never silently continues; the room is closed.
    CountdownCancelled { role: Role },
    /// Mid-battle: the caller starts the grace timer for this side.
    GraceStarted { role: Role },
    /// Battle already over (or room closed); nothing to do.
    AlreadyOver,
}

#[derive(Debug, PartialEq)]
pub struct RoomSession {
    room: Room,
    participants: Vec<Participant>,
    countdown: Option<u8>,
    countdown_armed: bool,
    battle: Option<Battle>,
}

impl RoomSession {
    pub(crate) fn new(
        code: RoomCode,
        room_name: &str,
        host_id: &str,
        host_name: &str,
        is_private: bool,
        stake_wei: Option<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            room: Room::new(code, room_name, host_id, is_private, stake_wei, created_at_ms),
            participants: vec![Participant::new(host_id, host_name, Role::Host)],
            countdown: None,
            countdown_armed: false,
            battle: None,
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Clone of the room for the wire.
    pub fn snapshot(&self) -> Room {
        self.room.clone()
    }

    pub fn status(&self) -> RoomStatus {
        self.room.status
    }

    pub fn code(&self) -> &RoomCode {
        &self.room.code
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, player_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == player_id)
    }

    fn participant_mut(&mut self, player_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == player_id)
    }

    pub fn participant_by_role(&self, role: Role) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == role)
    }

    pub fn role_of(&self, player_id: &str) -> Option<Role> {
        self.room.role_of(player_id)
    }

    pub fn battle(&self) -> Option<&Battle> {
        self.battle.as_ref()
    }

    pub fn battle_state(&self) -> Option<&BattleState> {
        self.battle.as_ref().map(Battle::state)
    }

    /// The winning participant once the battle is over.
    pub fn winner(&self) -> Option<&Participant> {
        let winner = self.battle.as_ref()?.state().winner?;
        self.participant_by_role(winner)
    }

    /// Registers the guest. Capacity and duplicate checks happen in the
    /// registry before this is called.
    pub(crate) fn add_guest(&mut self, player_id: &str, name: &str) -> Participant {
        let participant = Participant::new(player_id, name, Role::Guest);
        self.room.guest_id = Some(player_id.to_string());
        self.room.players.push(player_id.to_string());
        self.room.status = RoomStatus::Selecting;
        self.participants.push(participant.clone());
        participant
    }

    /// Removes the guest and reopens the room. Ready flags reset because both
    /// sides re-enter character selection.
    pub(crate) fn remove_guest(&mut self) {
        if let Some(guest_id) = self.room.guest_id.take() {
            self.room.players.retain(|p| p != &guest_id);
            self.participants.retain(|p| p.id != guest_id);
        }
        self.room.guest_character = None;
        self.room.status = RoomStatus::Waiting;
        self.countdown = None;
        self.countdown_armed = false;
        for participant in &mut self.participants {
            participant.ready = false;
        }
    }

    pub(crate) fn close(&mut self) {
        self.room.status = RoomStatus::Closed;
        self.countdown = None;
    }

    /// Cache the on-chain match id on the room mirror.
    pub fn set_contract_match(&mut self, match_id: u64) {
        self.room.contract_match_id = Some(match_id);
    }

    fn role_of_required(&self, player_id: &str) -> Result<Role, SessionError> {
        self.role_of(player_id)
            .ok_or_else(|| SessionError::UnknownPlayer {
                player_id: player_id.to_string(),
            })
    }

    /// Store the caller's character snapshot on their half of the room.
    ///
    /// The other participant has no way to observe the selection locally, so
    /// the caller must broadcast it.
    pub fn select_character(
        &mut self,
        player_id: &str,
        snapshot: CharacterSnapshot,
    ) -> Result<Role, SessionError> {
        let role = self.role_of_required(player_id)?;
        match self.room.status {
            RoomStatus::Waiting | RoomStatus::Selecting => {}
            status => return Err(SessionError::SelectionClosed { status }),
        }
        snapshot.validate_invariants()?;
        self.room.set_character(role, snapshot);
        // Re-selecting drops readiness until confirmed again.
        if let Some(participant) = self.participant_mut(player_id) {
            participant.ready = false;
        }
        Ok(role)
    }

    /// Update the caller's ready flag.
    ///
    /// Arming is edge-triggered: the first time both sides are ready with both
    /// snapshots present, the room moves to `ready` and `armed` is reported
    /// exactly once. The authoritative process then begins the countdown, so
    /// both sides evaluating the condition independently cannot double-start.
    pub fn set_ready(&mut self, player_id: &str, ready: bool) -> Result<ReadyOutcome, SessionError> {
        let role = self.role_of_required(player_id)?;
        match self.room.status {
            RoomStatus::Waiting | RoomStatus::Selecting => {}
            status => return Err(SessionError::ReadinessClosed { status }),
        }
        if ready && self.room.character(role).is_none() {
            return Err(SessionError::NoCharacterSelected);
        }
        if let Some(participant) = self.participant_mut(player_id) {
            participant.ready = ready;
        }

        let both_ready = self.participants.len() == 2
            && self.participants.iter().all(|p| p.ready)
            && self.room.host_character.is_some()
            && self.room.guest_character.is_some();
        let armed = both_ready && !self.countdown_armed;
        if armed {
            self.countdown_armed = true;
            self.room.status = RoomStatus::Ready;
        }
        Ok(ReadyOutcome {
            role,
            is_ready: ready,
            armed,
        })
    }

    /// Start the countdown; returns the first broadcast value.
    pub fn begin_countdown(&mut self) -> Result<u8, SessionError> {
        if self.room.status != RoomStatus::Ready || !self.countdown_armed {
            return Err(SessionError::CountdownNotArmed {
                status: self.room.status,
            });
        }
        self.room.status = RoomStatus::CountingDown;
        self.countdown = Some(COUNTDOWN_START);
        Ok(COUNTDOWN_START)
    }

    /// Advance the countdown one tick. Reaching 0 deterministically starts
    /// the battle with turn owner = host.
    pub fn tick_countdown(&mut self) -> Result<CountdownStep, SessionError> {
        let value = self.countdown.ok_or(SessionError::NotCountingDown)?;
        let next = value.saturating_sub(1);
        if next > 0 {
            self.countdown = Some(next);
            return Ok(CountdownStep::Tick(next));
        }
        self.countdown = None;
        // Both snapshots are present; arming requires them.
        let (host, guest) = match (&self.room.host_character, &self.room.guest_character) {
            (Some(host), Some(guest)) => (host.clone(), guest.clone()),
            _ => return Err(SessionError::BattleNotStarted),
        };
        self.battle = Some(Battle::new(host, guest));
        self.room.status = RoomStatus::Playing;
        Ok(CountdownStep::Started)
    }

    pub fn submit_action(
        &mut self,
        player_id: &str,
        ability_id: u32,
        model: &impl DamageModel,
    ) -> Result<ActionOutcome, SessionError> {
        let role = self.role_of_required(player_id)?;
        let battle = self.battle.as_mut().ok_or(SessionError::BattleNotStarted)?;
        let outcome = battle.submit_action(role, ability_id, model)?;
        if matches!(outcome.end, TurnEnd::Victory { .. }) {
            self.room.status = RoomStatus::Completed;
        }
        Ok(outcome)
    }

    pub fn surrender(&mut self, player_id: &str) -> Result<Role, SessionError> {
        let role = self.role_of_required(player_id)?;
        let battle = self.battle.as_mut().ok_or(SessionError::BattleNotStarted)?;
        let winner = battle.surrender(role)?;
        self.room.status = RoomStatus::Completed;
        Ok(winner)
    }

    /// Record a disconnect and report what it means for the current phase.
    pub fn handle_disconnect(&mut self, player_id: &str) -> Result<DisconnectOutcome, SessionError> {
        let role = self.role_of_required(player_id)?;
        if let Some(participant) = self.participant_mut(player_id) {
            participant.connected = false;
        }
        let outcome = match self.room.status {
            RoomStatus::Waiting | RoomStatus::Selecting | RoomStatus::Ready => {
                DisconnectOutcome::LeftBeforeBattle { role }
            }
            RoomStatus::CountingDown => {
                self.close();
                DisconnectOutcome::CountdownCancelled { role }
            }
            RoomStatus::Playing => DisconnectOutcome::GraceStarted { role },
            RoomStatus::Completed | RoomStatus::Closed => DisconnectOutcome::AlreadyOver,
        };
        Ok(outcome)
    }

    /// A participant returned within the grace window.
    pub fn handle_reconnect(&mut self, player_id: &str) -> Result<(), SessionError> {
        self.role_of_required(player_id)?;
        if let Some(participant) = self.participant_mut(player_id) {
            participant.connected = true;
        }
        Ok(())
    }

    /// Grace period expired: the disconnected side forfeits.
    pub fn forfeit_disconnected(&mut self, player_id: &str) -> Result<Role, SessionError> {
        let role = self.role_of_required(player_id)?;
        let battle = self.battle.as_mut().ok_or(SessionError::BattleNotStarted)?;
        let winner = battle.forfeit(role)?;
        self.room.status = RoomStatus::Completed;
        Ok(winner)
    }
}
