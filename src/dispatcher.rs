//! Event dispatcher (spec.md §4.7): the per-room single-writer boundary.
//! Every inbound event passes through here; handlers mutate room state and
//! emit outbound `RoomEvent`s while still holding the room's exclusivity,
//! so a state change and its broadcast are indivisible (spec.md §5).
//!
//! "Single writer per room" here is enforced by `Room`'s internal
//! `Mutex<State>` rather than an explicit actor mailbox: every method below
//! takes the lock for the duration of one state transition and its
//! broadcast, which is sufficient because mediasoup calls that need to
//! suspend (transport/producer/consumer creation) happen *outside* that
//! critical section, in `sfu.rs`.

use mediasoup::consumer::{Consumer, ConsumerId};
use mediasoup::data_structures::DtlsParameters;
use mediasoup::producer::{Producer, ProducerId};
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::transport::TransportId;
use mediasoup::webrtc_transport::WebRtcTransport;

use crate::error::{RelayError, RelayResult};
use crate::ids::{MessageId, ParticipantId, QueueItemId, RoomCode};
use crate::protocol::{RoomEvent, ServerEvent};
use crate::queue::QueueItem;
use crate::registry::Registry;
use crate::room::Room;
use crate::sfu::Sfu;
use crate::video_state::VideoSnapshot;

pub struct Dispatcher {
    registry: std::sync::Arc<Registry>,
    sfu: Sfu,
}

impl Dispatcher {
    pub fn new(registry: std::sync::Arc<Registry>, sfu: Sfu) -> Self {
        Self { registry, sfu }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn room_for(&self, participant_id: ParticipantId) -> RelayResult<Room> {
        self.registry
            .lookup(participant_id)
            .ok_or(RelayError::ParticipantNotFound(participant_id))
    }

    // -- room lifecycle ----------------------------------------------------

    pub fn room_create(&self, display_name: &str) -> RelayResult<(RoomCode, ParticipantId)> {
        self.registry.create(display_name)
    }

    pub fn room_join(
        &self,
        code: &RoomCode,
        display_name: &str,
    ) -> RelayResult<(Room, ParticipantId)> {
        let (room, participant) = self.registry.join(code, display_name)?;
        room.emit(RoomEvent::broadcast_except(
            participant.id,
            ServerEvent::RoomUserJoined {
                participant: (&participant).into(),
            },
        ));
        let msg = room.post_system_message(format!("{} joined the room", participant.display_name));
        room.emit(RoomEvent::broadcast(ServerEvent::ChatMessageEvent { message: msg }));
        self.notify_sharer_of_new_viewer(&room, participant.id);
        Ok((room, participant.id))
    }

    /// Explicit `room:leave`, or the tail end of a disconnect. Runs voice
    /// teardown first, then room departure (host transfer, system message,
    /// broadcast) -- the ordering §5 requires.
    pub async fn room_leave(&self, participant_id: ParticipantId) {
        if let Some(code) = self.registry.room_code_of(participant_id) {
            self.teardown_voice(&code, participant_id).await;
        }

        let Some((room, departure)) = self.registry.leave(participant_id) else {
            return;
        };

        room.emit(RoomEvent::broadcast(ServerEvent::RoomUserLeft {
            participant_id,
        }));
        if !departure.room_is_empty {
            let msg = room.post_system_message(format!("{} left the room", departure.participant.display_name));
            room.emit(RoomEvent::broadcast(ServerEvent::ChatMessageEvent { message: msg }));
        }

        if let Some(new_host_id) = departure.new_host_id {
            room.emit(RoomEvent::broadcast(ServerEvent::RoomHostChanged {
                host_id: new_host_id,
            }));
            if let Some(new_host) = room.participant(new_host_id) {
                let msg = room.post_system_message(format!("{} is now the host", new_host.display_name));
                room.emit(RoomEvent::broadcast(ServerEvent::ChatMessageEvent { message: msg }));
            }
        }
    }

    /// Runs when a connection drops without a clean `room:leave`.
    pub async fn handle_disconnect(&self, participant_id: ParticipantId) {
        self.room_leave(participant_id).await;
    }

    pub fn room_set_hidden(&self, participant_id: ParticipantId, hidden: bool) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if room.host_id() != Some(participant_id) {
            return Err(RelayError::Conflict("only the host can change room visibility".to_owned()));
        }
        room.set_hidden(hidden);
        room.emit(RoomEvent::broadcast(ServerEvent::RoomHiddenChanged { is_hidden: hidden }));
        Ok(())
    }

    // -- video ---------------------------------------------------------

    pub fn video_load(&self, participant_id: ParticipantId, url: &str) -> RelayResult<VideoSnapshot> {
        let room = self.room_for(participant_id)?;
        let snapshot = room.load_video(url)?;
        room.emit(RoomEvent::broadcast(ServerEvent::VideoLoad { state: snapshot.clone() }));
        let msg = room.post_system_message(format!("video loaded: {}", snapshot.video_url));
        room.emit(RoomEvent::broadcast(ServerEvent::ChatMessageEvent { message: msg }));
        Ok(snapshot)
    }

    /// Best-effort oEmbed title backfill for a directly-loaded (not
    /// queue-sourced) video, run off the dispatch path.
    pub fn video_backfill_title(&self, room: &Room, title: String) {
        let snapshot = room.set_video_title(title);
        room.emit(RoomEvent::broadcast(ServerEvent::VideoStateUpdate { state: snapshot }));
    }

    pub fn video_play(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if let Some(snapshot) = room.play_video() {
            room.emit(RoomEvent::broadcast(ServerEvent::VideoStateUpdate { state: snapshot }));
        }
        Ok(())
    }

    pub fn video_pause(&self, participant_id: ParticipantId, current_time: f64) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if let Some(snapshot) = room.pause_video(current_time) {
            room.emit(RoomEvent::broadcast(ServerEvent::VideoStateUpdate { state: snapshot }));
        }
        Ok(())
    }

    pub fn video_seek(&self, participant_id: ParticipantId, current_time: f64) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        let snapshot = room.seek_video(current_time);
        room.emit(RoomEvent::broadcast(ServerEvent::VideoStateUpdate { state: snapshot }));
        Ok(())
    }

    pub fn video_rate(&self, participant_id: ParticipantId, rate: f64) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        let snapshot = room.set_video_rate(rate);
        room.emit(RoomEvent::broadcast(ServerEvent::VideoStateUpdate { state: snapshot }));
        Ok(())
    }

    /// `video:ended`: debounced by the room's ended-lock so the natural
    /// multi-client fan-in at end-of-video advances the queue exactly once
    /// (spec.md §4.2, scenario 4).
    pub fn video_ended(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if !room.try_enter_ended_lock() {
            return Ok(());
        }
        if let Some((_item, snapshot)) = room.advance_queue() {
            room.emit(RoomEvent::broadcast(ServerEvent::VideoLoad { state: snapshot }));
            room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
                queue: room.queue_snapshot(),
            }));
        }
        Ok(())
    }

    // -- queue -----------------------------------------------------------

    pub fn queue_add(&self, participant_id: ParticipantId, url: &str) -> RelayResult<QueueItem> {
        let room = self.room_for(participant_id)?;
        let display_name = room
            .participant(participant_id)
            .map(|p| p.display_name)
            .unwrap_or_else(|| "Anonymous".to_owned());
        let item = room.add_queue_item(url, display_name)?;
        room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
            queue: room.queue_snapshot(),
        }));
        Ok(item)
    }

    pub fn queue_remove(&self, participant_id: ParticipantId, item_id: QueueItemId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        room.remove_queue_item(item_id)?;
        room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
            queue: room.queue_snapshot(),
        }));
        Ok(())
    }

    pub fn queue_reorder(
        &self,
        participant_id: ParticipantId,
        item_id: QueueItemId,
        new_index: usize,
    ) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        room.reorder_queue_item(item_id, new_index)?;
        room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
            queue: room.queue_snapshot(),
        }));
        Ok(())
    }

    pub fn queue_play(&self, participant_id: ParticipantId, item_id: QueueItemId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        let snapshot = room.play_queue_item(item_id)?;
        room.emit(RoomEvent::broadcast(ServerEvent::VideoLoad { state: snapshot }));
        room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
            queue: room.queue_snapshot(),
        }));
        Ok(())
    }

    pub fn queue_play_next(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if let Some((_item, snapshot)) = room.advance_queue() {
            room.emit(RoomEvent::broadcast(ServerEvent::VideoLoad { state: snapshot }));
            room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
                queue: room.queue_snapshot(),
            }));
        }
        Ok(())
    }

    /// Best-effort oEmbed title backfill, run off the dispatch path.
    pub fn queue_backfill_title(&self, room: &Room, item_id: QueueItemId, title: String) {
        room.set_queue_item_title(item_id, title);
        room.emit(RoomEvent::broadcast(ServerEvent::QueueUpdate {
            queue: room.queue_snapshot(),
        }));
    }

    // -- chat --------------------------------------------------------------

    pub fn chat_message(&self, participant_id: ParticipantId, text: &str) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RelayError::InvalidInput("chat message must not be empty".to_owned()));
        }
        if trimmed.chars().count() > crate::chat::MAX_BODY_LEN {
            return Err(RelayError::InvalidInput(format!(
                "chat message exceeds {} characters",
                crate::chat::MAX_BODY_LEN
            )));
        }
        let display_name = room
            .participant(participant_id)
            .map(|p| p.display_name)
            .unwrap_or_else(|| "Anonymous".to_owned());
        let message = room.post_chat_message(participant_id, display_name, trimmed.to_owned());
        room.emit(RoomEvent::broadcast(ServerEvent::ChatMessageEvent { message }));
        Ok(())
    }

    /// Hard delete, restricted to the message's author or the room host
    /// (spec.md §3 ChatMessage: "Immutable except for hard delete by the
    /// author or the host").
    pub fn chat_delete(&self, participant_id: ParticipantId, message_id: MessageId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        let author_id = room
            .chat_message_author(message_id)
            .ok_or(RelayError::MessageNotFound(message_id))?;
        let is_author = author_id == Some(participant_id);
        let is_host = room.host_id() == Some(participant_id);
        if !is_author && !is_host {
            return Err(RelayError::Conflict(
                "only the message author or the host can delete this message".to_owned(),
            ));
        }
        if !room.delete_chat_message(message_id) {
            return Err(RelayError::MessageNotFound(message_id));
        }
        room.emit(RoomEvent::broadcast(ServerEvent::ChatDelete { message_id }));
        Ok(())
    }

    // -- voice / SFU ---------------------------------------------------

    pub async fn voice_join(
        &self,
        participant_id: ParticipantId,
    ) -> RelayResult<(mediasoup::rtp_parameters::RtpCapabilitiesFinalized, Vec<(ParticipantId, ProducerId)>)> {
        let room = self.room_for(participant_id)?;
        let code = room.code();
        self.sfu
            .ensure_room(&code)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))?;
        room.voice_join(participant_id);
        room.emit(RoomEvent::broadcast(ServerEvent::VoiceUserJoined { participant_id }));

        let caps = self
            .sfu
            .rtp_capabilities(&code)
            .ok_or_else(|| RelayError::Conflict("SFU room missing after ensure".to_owned()))?;
        let existing = self.sfu.existing_producers(&code, participant_id);
        Ok((caps, existing))
    }

    pub async fn voice_create_send_transport(&self, participant_id: ParticipantId) -> RelayResult<WebRtcTransport> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .create_send_transport(&code, participant_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_create_recv_transport(&self, participant_id: ParticipantId) -> RelayResult<WebRtcTransport> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .create_recv_transport(&code, participant_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub fn voice_set_rtp_capabilities(&self, participant_id: ParticipantId, caps: RtpCapabilities) -> RelayResult<()> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .set_rtp_capabilities(&code, participant_id, caps)
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_connect_transport(
        &self,
        participant_id: ParticipantId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> RelayResult<()> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .connect_transport(&code, participant_id, transport_id, dtls_parameters)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_produce(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        participant_id: ParticipantId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> RelayResult<Producer> {
        let room = self.room_for(participant_id)?;
        let code = room.code();
        let producer = self
            .sfu
            .produce(local_pool, &code, participant_id, kind, rtp_parameters)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))?;
        room.emit(RoomEvent::broadcast_except(
            participant_id,
            ServerEvent::VoiceNewProducer {
                participant_id,
                producer_id: producer.id().to_string(),
            },
        ));
        Ok(producer)
    }

    pub async fn voice_consume(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        participant_id: ParticipantId,
        producer_id: ProducerId,
    ) -> RelayResult<Consumer> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .consume(local_pool, &code, participant_id, producer_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_resume_consumer(&self, participant_id: ParticipantId, consumer_id: ConsumerId) -> RelayResult<()> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .resume_consumer(&code, participant_id, consumer_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_pause_producer(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .pause_producer(&code, participant_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_resume_producer(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let code = self.room_for(participant_id)?.code();
        self.sfu
            .resume_producer(&code, participant_id)
            .await
            .map_err(|e| RelayError::Conflict(e.to_string()))
    }

    pub async fn voice_leave(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        self.teardown_voice(&room.code(), participant_id).await;
        Ok(())
    }

    async fn teardown_voice(&self, code: &RoomCode, participant_id: ParticipantId) {
        if !self.registry.lookup_by_code(code).map(|r| r.voice_members().contains(&participant_id)).unwrap_or(false) {
            return;
        }
        let closed_producer_id = self.sfu.leave(code, participant_id);
        if let Some(room) = self.registry.lookup_by_code(code) {
            room.voice_leave(participant_id);
            room.emit(RoomEvent::broadcast(ServerEvent::VoiceUserLeft { participant_id }));
            if let Some(producer_id) = closed_producer_id {
                room.emit(RoomEvent::broadcast(ServerEvent::VoiceProducerClosed {
                    participant_id,
                    producer_id: producer_id.to_string(),
                }));
            }
        }
    }

    // -- screen share --------------------------------------------------

    pub fn screen_start(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        room.screen_start(participant_id)?;
        room.emit(RoomEvent::broadcast_except(
            participant_id,
            ServerEvent::ScreenStarted { sharer_id: participant_id },
        ));
        for other in room.participants() {
            if other.id != participant_id {
                room.emit(RoomEvent::unicast(
                    participant_id,
                    ServerEvent::ScreenViewerJoined { viewer_id: other.id },
                ));
            }
        }
        Ok(())
    }

    pub fn screen_stop(&self, participant_id: ParticipantId) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if room.screen_stop(participant_id) {
            room.emit(RoomEvent::broadcast_except(participant_id, ServerEvent::ScreenStopped));
        }
        Ok(())
    }

    /// Call when a new participant joins a room with an active share, so the
    /// sharer learns to open a connection to them too (spec.md §4.5).
    fn notify_sharer_of_new_viewer(&self, room: &Room, viewer_id: ParticipantId) {
        if let Some(sharer_id) = room.screen_sharer_id() {
            if sharer_id != viewer_id {
                room.emit(RoomEvent::unicast(
                    sharer_id,
                    ServerEvent::ScreenViewerJoined { viewer_id },
                ));
            }
        }
    }

    fn relay_screen_signal(
        &self,
        participant_id: ParticipantId,
        to: ParticipantId,
        wrap: impl FnOnce(crate::protocol::ScreenSignal) -> ServerEvent,
        payload: serde_json::Value,
    ) -> RelayResult<()> {
        let room = self.room_for(participant_id)?;
        if !room.screen_can_relay(participant_id, to) {
            return Err(RelayError::Conflict("no active screen share between these participants".to_owned()));
        }
        room.emit(RoomEvent::unicast(
            to,
            wrap(crate::protocol::ScreenSignal { from: participant_id, payload }),
        ));
        Ok(())
    }

    pub fn screen_offer(&self, participant_id: ParticipantId, to: ParticipantId, sdp: serde_json::Value) -> RelayResult<()> {
        self.relay_screen_signal(participant_id, to, ServerEvent::ScreenOffer, sdp)
    }

    pub fn screen_answer(&self, participant_id: ParticipantId, to: ParticipantId, sdp: serde_json::Value) -> RelayResult<()> {
        self.relay_screen_signal(participant_id, to, ServerEvent::ScreenAnswer, sdp)
    }

    pub fn screen_ice_candidate(
        &self,
        participant_id: ParticipantId,
        to: ParticipantId,
        candidate: serde_json::Value,
    ) -> RelayResult<()> {
        self.relay_screen_signal(participant_id, to, ServerEvent::ScreenIceCandidate, candidate)
    }
}
