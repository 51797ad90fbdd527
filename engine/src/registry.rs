//! In-memory room directory: create/list/join/leave with host/guest role
//! assignment and two-player capacity.

use std::collections::HashMap;

use duelgrid_types::{Participant, Role, Room, RoomCode, RoomStatus, ROOM_CODE_ALPHABET, ROOM_CODE_LEN};
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::session::RoomSession;

/// Attempts at generating a fresh code before giving up. With a 36^6 code
/// space the retry bound is practically unreachable.
pub const MAX_CODE_ATTEMPTS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("could not generate an unused room code after {attempts} attempts")]
    DuplicateCode { attempts: usize },
    #[error("room {code} not found")]
    RoomNotFound { code: RoomCode },
    #[error("room {code} already has two players")]
    RoomFull { code: RoomCode },
    #[error("player {player_id} is already in room {code}")]
    AlreadyInRoom { code: RoomCode, player_id: String },
    #[error("player {player_id} is not in room {code}")]
    NotInRoom { code: RoomCode, player_id: String },
}

/// What a leave did to the room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The guest left; the room is open again.
    GuestLeft { room: Room },
    /// The host left; the room is closed, removed from the registry, and the
    /// listed participants must be notified.
    Closed { room: Room, notify: Vec<String> },
}

/// Directory of live rooms. Closed and completed rooms are removed, so a code
/// is unique among live rooms for as long as one of them holds it.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, RoomSession>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn get(&self, code: &RoomCode) -> Option<&RoomSession> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &RoomCode) -> Option<&mut RoomSession> {
        self.rooms.get_mut(code)
    }

    pub fn remove(&mut self, code: &RoomCode) -> Option<RoomSession> {
        self.rooms.remove(code)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &RoomSession> {
        self.rooms.values()
    }

    fn generate_code(&self, rng: &mut impl Rng) -> Result<RoomCode, RoomError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let raw: String = (0..ROOM_CODE_LEN)
                .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
                .collect();
            let Ok(code) = RoomCode::parse(&raw) else {
                continue;
            };
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(RoomError::DuplicateCode {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    /// Create a room with the caller as host.
    pub fn create_room(
        &mut self,
        rng: &mut impl Rng,
        host_id: &str,
        host_name: &str,
        room_name: &str,
        is_private: bool,
        stake_wei: Option<String>,
        created_at_ms: u64,
    ) -> Result<&mut RoomSession, RoomError> {
        let code = self.generate_code(rng)?;
        debug!(code = %code, host = host_id, "room created");
        let session = RoomSession::new(
            code.clone(),
            room_name,
            host_id,
            host_name,
            is_private,
            stake_wei,
            created_at_ms,
        );
        Ok(self.rooms.entry(code).or_insert(session))
    }

    /// Waiting rooms with an open slot, oldest first. Private rooms are
    /// join-by-code only and never listed.
    pub fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .values()
            .map(RoomSession::room)
            .filter(|room| {
                room.status == RoomStatus::Waiting && !room.is_full() && !room.is_private
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.code.cmp(&b.code))
        });
        rooms
    }

    /// Join a room as guest.
    pub fn join_room(
        &mut self,
        code: &RoomCode,
        caller_id: &str,
        name: &str,
    ) -> Result<(&mut RoomSession, Participant), RoomError> {
        let session = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
        if session.role_of(caller_id).is_some() {
            return Err(RoomError::AlreadyInRoom {
                code: code.clone(),
                player_id: caller_id.to_string(),
            });
        }
        if session.room().is_full() {
            return Err(RoomError::RoomFull { code: code.clone() });
        }
        let participant = session.add_guest(caller_id, name);
        debug!(code = %code, guest = caller_id, "guest joined");
        Ok((session, participant))
    }

    /// Remove a participant. A host leave closes the room; the outcome lists
    /// who must be told, because a silent host loss would strand the guest.
    pub fn leave_room(&mut self, code: &RoomCode, caller_id: &str) -> Result<LeaveOutcome, RoomError> {
        let session = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
        let Some(role) = session.role_of(caller_id) else {
            return Err(RoomError::NotInRoom {
                code: code.clone(),
                player_id: caller_id.to_string(),
            });
        };
        match role {
            Role::Guest => {
                session.remove_guest();
                Ok(LeaveOutcome::GuestLeft {
                    room: session.snapshot(),
                })
            }
            Role::Host => {
                session.close();
                let notify: Vec<String> = session
                    .participants()
                    .iter()
                    .filter(|p| p.id != caller_id)
                    .map(|p| p.id.clone())
                    .collect();
                let room = session.snapshot();
                self.rooms.remove(code);
                debug!(code = %code, "room closed on host leave");
                Ok(LeaveOutcome::Closed { room, notify })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_create_room_has_six_char_code_and_host_only() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let session = registry
            .create_room(&mut rng, "host-1", "Alice", "Alice's Room", false, None, 100)
            .unwrap();
        let room = session.room();
        assert_eq!(room.code.as_str().len(), ROOM_CODE_LEN);
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.players, vec!["host-1".to_string()]);
        assert_eq!(room.name, "Alice's Room");
        assert!(room.guest_id.is_none());
    }

    #[test]
    fn test_codes_unique_among_live_rooms() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let mut codes = HashSet::new();
        for i in 0..200 {
            let host = format!("host-{i}");
            let session = registry
                .create_room(&mut rng, &host, "n", "room", false, None, i)
                .unwrap();
            assert!(codes.insert(session.code().clone()));
        }
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn test_join_assigns_guest_and_full_room_rejects() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();

        let (session, participant) = registry.join_room(&code, "guest-1", "Bob").unwrap();
        assert_eq!(participant.role, Role::Guest);
        assert_eq!(session.room().guest_id.as_deref(), Some("guest-1"));

        // A third player must never overwrite the guest slot.
        assert_eq!(
            registry.join_room(&code, "guest-2", "Eve"),
            Err(RoomError::RoomFull { code: code.clone() })
        );
        let session = registry.get(&code).unwrap();
        assert_eq!(session.room().guest_id.as_deref(), Some("guest-1"));
    }

    #[test]
    fn test_join_unknown_room_and_double_join() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let missing = RoomCode::parse("ZZZZZ9").unwrap();
        assert_eq!(
            registry.join_room(&missing, "guest-1", "Bob"),
            Err(RoomError::RoomNotFound { code: missing })
        );

        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();
        assert_eq!(
            registry.join_room(&code, "host-1", "Alice"),
            Err(RoomError::AlreadyInRoom {
                code: code.clone(),
                player_id: "host-1".to_string(),
            })
        );
    }

    #[test]
    fn test_join_is_case_insensitive_via_code_parse() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();
        let typed = RoomCode::parse(&code.as_str().to_ascii_lowercase()).unwrap();
        assert!(registry.join_room(&typed, "guest-1", "Bob").is_ok());
    }

    #[test]
    fn test_listing_skips_full_private_and_non_waiting() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();

        let open = registry
            .create_room(&mut rng, "host-1", "a", "open", false, None, 1)
            .unwrap()
            .code()
            .clone();
        let private = registry
            .create_room(&mut rng, "host-2", "b", "private", true, None, 2)
            .unwrap()
            .code()
            .clone();
        let full = registry
            .create_room(&mut rng, "host-3", "c", "full", false, None, 3)
            .unwrap()
            .code()
            .clone();
        registry.join_room(&full, "guest-1", "Bob").unwrap();

        let listed = registry.list_rooms();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, open);
        assert!(listed.iter().all(|room| room.code != private));
    }

    #[test]
    fn test_listing_is_stable_within_a_snapshot() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        for i in 0..10 {
            let host = format!("host-{i}");
            registry
                .create_room(&mut rng, &host, "n", "room", false, None, i)
                .unwrap();
        }
        let first = registry.list_rooms();
        let second = registry.list_rooms();
        assert_eq!(first, second);
        // Oldest first.
        assert!(first.windows(2).all(|w| w[0].created_at_ms <= w[1].created_at_ms));
    }

    #[test]
    fn test_guest_leave_reopens_room() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();
        registry.join_room(&code, "guest-1", "Bob").unwrap();

        let outcome = registry.leave_room(&code, "guest-1").unwrap();
        match outcome {
            LeaveOutcome::GuestLeft { room } => {
                assert_eq!(room.status, RoomStatus::Waiting);
                assert_eq!(room.players, vec!["host-1".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The room is listable again.
        assert_eq!(registry.list_rooms().len(), 1);
    }

    #[test]
    fn test_host_leave_closes_room_and_reports_who_to_notify() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();
        registry.join_room(&code, "guest-1", "Bob").unwrap();

        let outcome = registry.leave_room(&code, "host-1").unwrap();
        match outcome {
            LeaveOutcome::Closed { room, notify } => {
                assert_eq!(room.status, RoomStatus::Closed);
                assert_eq!(notify, vec!["guest-1".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(registry.get(&code).is_none());
        // The code is free again once the room is gone.
        assert_eq!(
            registry.join_room(&code, "guest-2", "Eve"),
            Err(RoomError::RoomNotFound { code })
        );
    }

    #[test]
    fn test_leave_requires_membership() {
        let mut registry = RoomRegistry::new();
        let mut rng = rng();
        let code = registry
            .create_room(&mut rng, "host-1", "Alice", "r", false, None, 0)
            .unwrap()
            .code()
            .clone();
        assert_eq!(
            registry.leave_room(&code, "stranger"),
            Err(RoomError::NotInRoom {
                code,
                player_id: "stranger".to_string(),
            })
        );
    }
}
