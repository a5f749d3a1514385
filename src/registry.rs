//! Room registry (spec.md §4.1): process-wide code → Room mapping, creation,
//! lookup, and the departure/host-transfer/destruction sequence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::clock::Clock;
use crate::error::RelayError;
use crate::ids::{ParticipantId, RoomCode};
use crate::participant::Participant;
use crate::room::{Departure, Room};

const CODE_GENERATION_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRoom {
    pub id: RoomCode,
    pub user_count: usize,
    pub users: Vec<String>,
    pub video_title: Option<String>,
    pub video_url: String,
}

/// Concurrent-read, serialized-write room directory. Reads (lobby listing,
/// lookup, health counts) take a shared lock; creation/destruction take the
/// exclusive lock only long enough to mutate the map (spec.md §5).
pub struct Registry {
    rooms: RwLock<HashMap<RoomCode, Room>>,
    connections: RwLock<HashMap<ParticipantId, RoomCode>>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn allocate_code_locked(rooms: &HashMap<RoomCode, Room>) -> Result<RoomCode, RelayError> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let candidate = RoomCode::generate();
            if !rooms.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(RelayError::Conflict(
            "could not allocate a unique room code".to_owned(),
        ))
    }

    /// `create(displayName)` → new room, caller becomes host.
    ///
    /// Candidate sampling and insertion happen under the same `write()`
    /// guard so two concurrent creates can never sample and insert the same
    /// code (spec.md §4.1: "must be safe under concurrent creates").
    pub fn create(&self, display_name: &str) -> Result<(RoomCode, ParticipantId), RelayError> {
        let participant_id = ParticipantId::new();

        let code = {
            let mut rooms = self.rooms.write().unwrap();
            let code = Self::allocate_code_locked(&rooms)?;
            let room = Room::new(code.clone(), self.clock.clone());
            let participant = Participant::new(participant_id, code.clone(), display_name);
            room.add_participant(participant);
            rooms.insert(code.clone(), room);
            code
        };

        self.connections
            .write()
            .unwrap()
            .insert(participant_id, code.clone());

        log::info!("created room {code}");
        Ok((code, participant_id))
    }

    /// `join(roomCode, displayName)` → adds participant to an existing room.
    pub fn join(&self, code: &RoomCode, display_name: &str) -> Result<(Room, Participant), RelayError> {
        let room = self
            .lookup_by_code(code)
            .ok_or_else(|| RelayError::RoomNotFound(code.clone()))?;
        let participant_id = ParticipantId::new();
        let participant = Participant::new(participant_id, code.clone(), display_name);
        room.add_participant(participant.clone());
        self.connections
            .write()
            .unwrap()
            .insert(participant_id, code.clone());
        Ok((room, participant))
    }

    /// `leave(connectionId)` → removes participant; destroys the room if it
    /// emptied (I5).
    pub fn leave(&self, participant_id: ParticipantId) -> Option<(Room, Departure)> {
        let code = self.connections.write().unwrap().remove(&participant_id)?;
        let room = self.lookup_by_code(&code)?;
        let departure = room.remove_participant(participant_id)?;
        if departure.room_is_empty {
            self.rooms.write().unwrap().remove(&code);
            log::info!("destroyed room {code} (empty)");
        }
        Some((room, departure))
    }

    pub fn lookup(&self, participant_id: ParticipantId) -> Option<Room> {
        let code = self.connections.read().unwrap().get(&participant_id).cloned()?;
        self.lookup_by_code(&code)
    }

    pub fn room_code_of(&self, participant_id: ParticipantId) -> Option<RoomCode> {
        self.connections.read().unwrap().get(&participant_id).cloned()
    }

    pub fn lookup_by_code(&self, code: &RoomCode) -> Option<Room> {
        self.rooms.read().unwrap().get(code).cloned()
    }

    /// `enumerateVisible()` → lobby snapshot for rooms with `isHidden == false`.
    pub fn enumerate_visible(&self) -> Vec<LobbyRoom> {
        self.rooms
            .read()
            .unwrap()
            .values()
            .filter(|room| !room.is_hidden())
            .map(|room| {
                let snapshot = room.snapshot();
                LobbyRoom {
                    id: snapshot.room_code,
                    user_count: snapshot.participants.len(),
                    users: snapshot.participants.into_iter().map(|p| p.display_name).collect(),
                    video_title: snapshot.video_state.title,
                    video_url: snapshot.video_state.video_url,
                }
            })
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap().len()
    }

    pub fn user_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn all_rooms(&self) -> Vec<Room> {
        self.rooms.read().unwrap().values().cloned().collect()
    }

    /// Defensive sweep (SPEC_FULL.md §B): drop rooms whose participant map
    /// emptied without a clean `leave` reaching the registry (e.g. a crash
    /// mid-handshake left a zombie connection entry).
    pub fn reap_empty_rooms(&self) {
        let empty_codes: Vec<RoomCode> = self
            .rooms
            .read()
            .unwrap()
            .values()
            .filter(|room| room.is_empty())
            .map(|room| room.code())
            .collect();
        if empty_codes.is_empty() {
            return;
        }
        let mut rooms = self.rooms.write().unwrap();
        for code in empty_codes {
            if rooms.get(&code).map(|r| r.is_empty()).unwrap_or(false) {
                rooms.remove(&code);
                log::warn!("reaped zombie empty room {code}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn registry() -> Registry {
        Registry::new(Arc::new(TestClock::new(0)))
    }

    #[test]
    fn create_then_join_then_leave() {
        let reg = registry();
        let (code, alice_id) = reg.create("Alice").unwrap();
        let (_room, bob) = reg.join(&code, "Bob").unwrap();

        let room = reg.lookup_by_code(&code).unwrap();
        assert_eq!(room.participant_count(), 2);
        assert_eq!(room.host_id(), Some(alice_id));

        let (_, departure) = reg.leave(bob.id).unwrap();
        assert!(!departure.room_is_empty);
        assert!(reg.lookup_by_code(&code).is_some());

        let (_, departure) = reg.leave(alice_id).unwrap();
        assert!(departure.room_is_empty);
        assert!(reg.lookup_by_code(&code).is_none());
    }

    #[test]
    fn join_unknown_code_is_not_found() {
        let reg = registry();
        assert!(reg.join(&RoomCode::from("ZZZZZZ"), "Alice").is_err());
    }

    #[test]
    fn leave_then_join_gives_fresh_participant_id() {
        let reg = registry();
        let (code, alice_id) = reg.create("Alice").unwrap();
        reg.leave(alice_id).unwrap();
        let (_code2, new_id) = reg.create("Alice").unwrap();
        assert_ne!(alice_id, new_id);
        let _ = code;
    }

    #[test]
    fn hidden_rooms_excluded_from_lobby() {
        let reg = registry();
        let (code, _) = reg.create("Alice").unwrap();
        assert_eq!(reg.enumerate_visible().len(), 1);
        reg.lookup_by_code(&code).unwrap().set_hidden(true);
        assert_eq!(reg.enumerate_visible().len(), 0);
    }
}
