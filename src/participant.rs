//! Participant identity: one connection inside one room.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::ids::{ParticipantId, RoomCode};

const MAX_NAME_LEN: usize = 20;
const FALLBACK_NAMES: &[&str] = &[
    "Anonymous Otter",
    "Anonymous Fox",
    "Anonymous Panda",
    "Anonymous Koala",
    "Anonymous Badger",
];
const AVATARS: &[&str] = &[
    "🦊", "🐼", "🦦", "🐨", "🦁", "🐯", "🐸", "🐙", "🦉", "🐧", "🦄", "🐲",
];

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_code: RoomCode,
    pub display_name: String,
    pub avatar: &'static str,
}

impl Participant {
    pub fn new(id: ParticipantId, room_code: RoomCode, requested_name: &str) -> Self {
        let display_name = sanitize_name(requested_name);
        let avatar = avatar_for(&display_name);
        Self {
            id,
            room_code,
            display_name,
            avatar,
        }
    }
}

fn sanitize_name(requested: &str) -> String {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        let mut hasher = DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % FALLBACK_NAMES.len();
        return FALLBACK_NAMES[idx].to_owned();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

/// Deterministic avatar emoji derived from the display name so the same name
/// always maps to the same avatar within a process lifetime.
fn avatar_for(name: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    AVATARS[(hasher.finish() as usize) % AVATARS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_gets_fallback() {
        let p = Participant::new(ParticipantId::new(), "ABCDEF".into(), "   ");
        assert!(!p.display_name.is_empty());
    }

    #[test]
    fn name_is_truncated_and_trimmed() {
        let p = Participant::new(ParticipantId::new(), "ABCDEF".into(), "  this name is definitely too long for the cap  ");
        assert!(p.display_name.len() <= MAX_NAME_LEN);
        assert_eq!(p.display_name, p.display_name.trim());
    }

    #[test]
    fn avatar_is_deterministic_from_name() {
        let a = Participant::new(ParticipantId::new(), "ABCDEF".into(), "Alice");
        let b = Participant::new(ParticipantId::new(), "ABCDEF".into(), "Alice");
        assert_eq!(a.avatar, b.avatar);
    }
}
