//! Identifier mint: room codes and opaque participant/message/queue-item IDs.

use derive_more::Display;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A 6-char uppercase alphanumeric room code. Uniqueness is enforced by the
/// room registry (rejection sampling against currently live codes), not here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..ROOM_CODE_ALPHABET.len());
                ROOM_CODE_ALPHABET[idx] as char
            })
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomCode {
    fn from(s: String) -> Self {
        Self(s.to_uppercase())
    }
}
impl From<&str> for RoomCode {
    fn from(s: &str) -> Self {
        Self(s.to_uppercase())
    }
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }
        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

uuid_id!(ParticipantId);
uuid_id!(MessageId);
uuid_id!(QueueItemId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_is_six_uppercase_alphanumeric_chars() {
        let code = RoomCode::generate();
        assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
        assert!(code.as_str().chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn participant_ids_are_unique() {
        assert_ne!(ParticipantId::new(), ParticipantId::new());
    }
}
