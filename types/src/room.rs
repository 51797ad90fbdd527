use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of every room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Alphabet room codes are drawn from. Uppercase alphanumerics only, so a code
/// survives case-insensitive entry.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Maximum length accepted for room and participant names.
pub const MAX_NAME_LENGTH: usize = 32;

/// Maximum number of participants in a room.
pub const MAX_ROOM_PLAYERS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("room code must be {expected} characters (got {got})")]
    BadLength { expected: usize, got: usize },
    #[error("room code contains a character outside A-Z0-9")]
    BadCharacter,
}

/// A six-character room identifier. Stored uppercase; parsing normalizes, so
/// codes round-trip through case-insensitive entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, RoomCodeError> {
        let trimmed = raw.trim();
        if trimmed.len() != ROOM_CODE_LEN {
            return Err(RoomCodeError::BadLength {
                expected: ROOM_CODE_LEN,
                got: trimmed.len(),
            });
        }
        let normalized = trimmed.to_ascii_uppercase();
        if !normalized.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)) {
            return Err(RoomCodeError::BadCharacter);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// The two roles within a room. The host creates, the guest joins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn other(self) -> Self {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

/// Room lifecycle status.
///
/// `counting_down` and `closed` are explicit so clients can observe the
/// countdown phase and distinguish a closed room from one that merely emptied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Selecting,
    Ready,
    CountingDown,
    Playing,
    Completed,
    Closed,
}

/// One connected player within a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub ready: bool,
    pub connected: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            ready: false,
            connected: true,
        }
    }
}

/// What an ability does beyond dealing damage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityEffect {
    #[default]
    None,
    /// The acting side keeps the turn for one additional action.
    ExtraTurn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ability {
    pub id: u32,
    pub name: String,
    pub mana_cost: u32,
    pub base_damage: u32,
    #[serde(default)]
    pub effect: AbilityEffect,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CharacterInvariantError {
    #[error("character name too long (len={len}, max={max})")]
    NameTooLong { len: usize, max: usize },
    #[error("character has no abilities")]
    NoAbilities,
    #[error("duplicate ability id {ability_id}")]
    DuplicateAbilityId { ability_id: u32 },
}

/// Immutable copy of a combatant's stats taken at selection time.
///
/// Once a battle starts the snapshot is frozen; health and mana mutate in
/// [`crate::BattleState`], never here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub character_id: u64,
    pub name: String,
    pub max_health: u32,
    pub max_mana: u32,
    pub abilities: Vec<Ability>,
}

impl CharacterSnapshot {
    pub fn ability(&self, ability_id: u32) -> Option<&Ability> {
        self.abilities.iter().find(|a| a.id == ability_id)
    }

    /// Index of an ability within the snapshot, as submitted to the ledger.
    pub fn ability_index(&self, ability_id: u32) -> Option<usize> {
        self.abilities.iter().position(|a| a.id == ability_id)
    }

    pub fn validate_invariants(&self) -> Result<(), CharacterInvariantError> {
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(CharacterInvariantError::NameTooLong {
                len: self.name.len(),
                max: MAX_NAME_LENGTH,
            });
        }
        if self.abilities.is_empty() {
            return Err(CharacterInvariantError::NoAbilities);
        }
        for (i, ability) in self.abilities.iter().enumerate() {
            if self.abilities[..i].iter().any(|a| a.id == ability.id) {
                return Err(CharacterInvariantError::DuplicateAbilityId {
                    ability_id: ability.id,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomInvariantError {
    #[error("room has {got} players (max {max})")]
    TooManyPlayers { got: usize, max: usize },
    #[error("room is playing but the {role:?} character snapshot is missing")]
    MissingCharacter { role: Role },
}

/// A two-participant session container.
///
/// The service process that created a room owns it; joined clients hold
/// read-only mirrors updated exclusively via broadcast events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: RoomCode,
    pub name: String,
    pub host_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    pub players: Vec<String>,
    pub status: RoomStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_character: Option<CharacterSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_character: Option<CharacterSnapshot>,
    /// Stake in wei as a decimal string; 256-bit values do not fit a JSON number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stake_wei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_match_id: Option<u64>,
    pub is_private: bool,
    pub created_at_ms: u64,
}

impl Room {
    pub fn new(
        code: RoomCode,
        name: impl Into<String>,
        host_id: impl Into<String>,
        is_private: bool,
        stake_wei: Option<String>,
        created_at_ms: u64,
    ) -> Self {
        let host_id = host_id.into();
        Self {
            code,
            name: name.into(),
            players: vec![host_id.clone()],
            host_id,
            guest_id: None,
            status: RoomStatus::Waiting,
            host_character: None,
            guest_character: None,
            stake_wei,
            contract_match_id: None,
            is_private,
            created_at_ms,
        }
    }

    pub fn role_of(&self, player_id: &str) -> Option<Role> {
        if self.host_id == player_id {
            return Some(Role::Host);
        }
        if self.guest_id.as_deref() == Some(player_id) {
            return Some(Role::Guest);
        }
        None
    }

    pub fn character(&self, role: Role) -> Option<&CharacterSnapshot> {
        match role {
            Role::Host => self.host_character.as_ref(),
            Role::Guest => self.guest_character.as_ref(),
        }
    }

    pub fn set_character(&mut self, role: Role, snapshot: CharacterSnapshot) {
        match role {
            Role::Host => self.host_character = Some(snapshot),
            Role::Guest => self.guest_character = Some(snapshot),
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_ROOM_PLAYERS
    }

    pub fn is_staked(&self) -> bool {
        self.stake_wei.is_some()
    }

    pub fn validate_invariants(&self) -> Result<(), RoomInvariantError> {
        if self.players.len() > MAX_ROOM_PLAYERS {
            return Err(RoomInvariantError::TooManyPlayers {
                got: self.players.len(),
                max: MAX_ROOM_PLAYERS,
            });
        }
        if self.status == RoomStatus::Playing {
            if self.host_character.is_none() {
                return Err(RoomInvariantError::MissingCharacter { role: Role::Host });
            }
            if self.guest_character.is_none() {
                return Err(RoomInvariantError::MissingCharacter { role: Role::Guest });
            }
        }
        Ok(())
    }
}
