//! Connection hub (spec.md §4.6): the thin layer above the registry that
//! tracks live connections and turns a severed connection into an orderly
//! room departure. Broadcast/unicast/request-response delivery itself rides
//! on each room's `tokio::sync::broadcast` channel (`room.rs`) plus
//! subscriber-side filtering (`protocol::RoomEvent::visible_to`); this
//! module is what notices a connection is gone and tells the dispatcher.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::ids::ParticipantId;

pub struct ConnectionHub {
    dispatcher: Arc<Dispatcher>,
}

impl ConnectionHub {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Issued once a connection has authenticated (joined or created a
    /// room) and holds a `ConnectionGuard` for its lifetime. Dropping the
    /// guard -- which happens when the WebSocket closes, cleanly or not --
    /// runs the full disconnect sequence exactly once.
    pub fn guard_for(self: &Arc<Self>, participant_id: ParticipantId) -> ConnectionGuard {
        ConnectionGuard {
            hub: self.clone(),
            participant_id: Some(participant_id),
        }
    }

    async fn disconnect(&self, participant_id: ParticipantId) {
        self.dispatcher.handle_disconnect(participant_id).await;
    }
}

/// RAII handle for a live connection. The hub's "reports disconnect
/// promptly" requirement (§4.6) is satisfied by running cleanup from `Drop`
/// rather than relying on a client-sent `room:leave` that may never arrive.
pub struct ConnectionGuard {
    hub: Arc<ConnectionHub>,
    participant_id: Option<ParticipantId>,
}

impl ConnectionGuard {
    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.participant_id
    }

    /// Run the disconnect sequence immediately (e.g. on an explicit
    /// `room:leave`) instead of waiting for the connection to actually drop.
    pub async fn leave_now(&mut self) {
        if let Some(id) = self.participant_id.take() {
            self.hub.disconnect(id).await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(id) = self.participant_id.take() {
            let hub = self.hub.clone();
            tokio::spawn(async move {
                hub.disconnect(id).await;
            });
        }
    }
}
