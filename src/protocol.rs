//! Wire protocol: the outbound event enum pushed over each connection's
//! GraphQL subscription, and the room-facing snapshot types it carries.
//!
//! Every inbound event with an ack is a GraphQL mutation (see `schema.rs`);
//! every outbound event is a variant of [`ServerEvent`], broadcast on the
//! room's `tokio::sync::broadcast` channel and optionally addressed to a
//! single participant via [`RoomEvent::to`].

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::ids::{MessageId, ParticipantId, QueueItemId, RoomCode};
use crate::queue::QueueItem;
use crate::video_state::VideoSnapshot;

/// A view of a participant safe to hand to other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar: String,
}

impl From<&crate::participant::Participant> for ParticipantView {
    fn from(p: &crate::participant::Participant) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name.clone(),
            avatar: p.avatar.to_owned(),
        }
    }
}

/// Full room snapshot sent to a participant immediately after `room:join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_code: RoomCode,
    pub host_id: ParticipantId,
    pub participants: Vec<ParticipantView>,
    pub video_state: VideoSnapshot,
    pub chat_log: Vec<ChatMessage>,
    pub queue: Vec<QueueItem>,
    pub voice_members: Vec<ParticipantId>,
    pub screen_sharer_id: Option<ParticipantId>,
    pub is_hidden: bool,
}

/// SDP/ICE relay payloads for the screen-share mesh. The server never
/// inspects these beyond routing by `to`/`from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSignal {
    pub from: ParticipantId,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "room:state")]
    RoomState { room: RoomSnapshot },
    #[serde(rename = "room:user-joined")]
    RoomUserJoined { participant: ParticipantView },
    #[serde(rename = "room:user-left")]
    RoomUserLeft { participant_id: ParticipantId },
    #[serde(rename = "room:host-changed")]
    RoomHostChanged { host_id: ParticipantId },
    #[serde(rename = "room:hidden-changed")]
    RoomHiddenChanged { is_hidden: bool },

    #[serde(rename = "video:load")]
    VideoLoad { state: VideoSnapshot },
    #[serde(rename = "video:state-update")]
    VideoStateUpdate { state: VideoSnapshot },
    #[serde(rename = "video:heartbeat")]
    VideoHeartbeat { state: VideoSnapshot },

    #[serde(rename = "queue:update")]
    QueueUpdate { queue: Vec<QueueItem> },

    #[serde(rename = "chat:message")]
    ChatMessageEvent { message: ChatMessage },
    #[serde(rename = "chat:delete")]
    ChatDelete { message_id: MessageId },

    #[serde(rename = "voice:user-joined")]
    VoiceUserJoined { participant_id: ParticipantId },
    #[serde(rename = "voice:user-left")]
    VoiceUserLeft { participant_id: ParticipantId },
    #[serde(rename = "voice:new-producer")]
    VoiceNewProducer {
        participant_id: ParticipantId,
        producer_id: String,
    },
    #[serde(rename = "voice:producer-closed")]
    VoiceProducerClosed {
        participant_id: ParticipantId,
        producer_id: String,
    },

    #[serde(rename = "screen:started")]
    ScreenStarted { sharer_id: ParticipantId },
    #[serde(rename = "screen:stopped")]
    ScreenStopped,
    #[serde(rename = "screen:viewer-joined")]
    ScreenViewerJoined { viewer_id: ParticipantId },
    #[serde(rename = "screen:offer")]
    ScreenOffer(ScreenSignal),
    #[serde(rename = "screen:answer")]
    ScreenAnswer(ScreenSignal),
    #[serde(rename = "screen:ice-candidate")]
    ScreenIceCandidate(ScreenSignal),

    #[serde(rename = "error")]
    Error { message: String, code: &'static str },
}

/// A broadcast envelope. `to == None` means "every subscriber of this room
/// except `exclude`, if set"; `Some(id)` restricts delivery to exactly that
/// participant (the hub's unicast primitive, implemented as subscriber-side
/// filtering rather than a per-connection channel -- see `hub.rs`).
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub to: Option<ParticipantId>,
    pub exclude: Option<ParticipantId>,
    pub payload: ServerEvent,
}

impl RoomEvent {
    pub fn broadcast(payload: ServerEvent) -> Self {
        Self {
            to: None,
            exclude: None,
            payload,
        }
    }

    pub fn broadcast_except(exclude: ParticipantId, payload: ServerEvent) -> Self {
        Self {
            to: None,
            exclude: Some(exclude),
            payload,
        }
    }

    pub fn unicast(to: ParticipantId, payload: ServerEvent) -> Self {
        Self {
            to: Some(to),
            exclude: None,
            payload,
        }
    }

    pub fn visible_to(&self, participant_id: ParticipantId) -> bool {
        if let Some(excluded) = self.exclude {
            if excluded == participant_id {
                return false;
            }
        }
        match self.to {
            None => true,
            Some(target) => target == participant_id,
        }
    }
}
