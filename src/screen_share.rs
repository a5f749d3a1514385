//! Screen-share coordinator (spec.md §4.5): enforces the single-sharer
//! invariant and relays offer/answer/ICE between the sharer and each viewer.
//! The server never inspects the SDP/ICE payload, only routes it.

use serde::Serialize;

use crate::error::RelayError;
use crate::ids::ParticipantId;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScreenShareState {
    sharer_id: Option<ParticipantId>,
}

impl ScreenShareState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharer_id(&self) -> Option<ParticipantId> {
        self.sharer_id
    }

    pub fn is_active(&self) -> bool {
        self.sharer_id.is_some()
    }

    /// `screen:start`: fails if another sharer is already active (I3 is
    /// preserved trivially since we only ever set one `sharer_id`).
    pub fn start(&mut self, participant_id: ParticipantId) -> Result<(), RelayError> {
        if let Some(existing) = self.sharer_id {
            if existing != participant_id {
                return Err(RelayError::Conflict(
                    "another participant is already sharing their screen".to_owned(),
                ));
            }
            return Err(RelayError::Conflict("already sharing".to_owned()));
        }
        self.sharer_id = Some(participant_id);
        Ok(())
    }

    /// `screen:stop` or sharer disconnect. No-op if `participant_id` is not
    /// the current sharer (e.g. a stale stop from a former sharer).
    pub fn stop(&mut self, participant_id: ParticipantId) -> bool {
        if self.sharer_id == Some(participant_id) {
            self.sharer_id = None;
            true
        } else {
            false
        }
    }

    /// Validate that `from` is allowed to relay a signaling payload to `to`:
    /// either `from` is the active sharer, or `to` is (the two legal
    /// directions in the mesh).
    pub fn can_relay(&self, from: ParticipantId, to: ParticipantId) -> bool {
        match self.sharer_id {
            Some(sharer) => from == sharer || to == sharer,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_sets_sharer() {
        let mut s = ScreenShareState::new();
        let alice = ParticipantId::new();
        s.start(alice).unwrap();
        assert_eq!(s.sharer_id(), Some(alice));
    }

    #[test]
    fn second_concurrent_sharer_is_rejected() {
        let mut s = ScreenShareState::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();
        s.start(alice).unwrap();
        assert!(s.start(bob).is_err());
        assert_eq!(s.sharer_id(), Some(alice));
    }

    #[test]
    fn stop_by_non_sharer_is_noop() {
        let mut s = ScreenShareState::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();
        s.start(alice).unwrap();
        assert!(!s.stop(bob));
        assert_eq!(s.sharer_id(), Some(alice));
        assert!(s.stop(alice));
        assert!(s.sharer_id().is_none());
    }

    #[test]
    fn relay_requires_sharer_on_one_end() {
        let mut s = ScreenShareState::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();
        let carol = ParticipantId::new();
        assert!(!s.can_relay(alice, bob));
        s.start(alice).unwrap();
        assert!(s.can_relay(alice, bob));
        assert!(s.can_relay(bob, alice));
        assert!(!s.can_relay(bob, carol));
    }
}
