//! The Room aggregate (spec.md §3): participants, shared video state, chat,
//! queue, voice membership, and the screen-share sharer. Single writer: the
//! event dispatcher (`dispatcher.rs`) serializes all mutation per room.
//!
//! Structurally this keeps the teacher's `Arc<Shared>` / `Weak<Shared>` +
//! `Mutex<State>` shape (see the old `room.rs`/`session.rs` pair) generalized
//! from "router + sessions" to the full watch-party aggregate, with the
//! teacher's abandoned `broadcast::Sender` draft completed as the wire
//! backbone (see `protocol::RoomEvent`).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::chat::{ChatLog, ChatMessage};
use crate::clock::Clock;
use crate::error::RelayError;
use crate::ids::{MessageId, ParticipantId, QueueItemId, RoomCode};
use crate::participant::Participant;
use crate::protocol::{ParticipantView, RoomEvent, RoomSnapshot, ServerEvent};
use crate::queue::{Queue, QueueItem};
use crate::screen_share::ScreenShareState;
use crate::video_state::{classify_url, VideoSnapshot, VideoState};

/// How long a successful `video:ended` suppresses further auto-advances
/// (spec.md §4.2 "ended-lock").
const ENDED_LOCK_HOLD: Duration = Duration::from_millis(2000);

/// Broadcast channel capacity. Generous relative to expected room activity;
/// a slow subscriber that falls this far behind is expected to reconnect
/// rather than stall the room (spec.md §5 backpressure policy).
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct WeakRoom {
    shared: Weak<Shared>,
}

struct Shared {
    code: RoomCode,
    created_at: i64,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<RoomEvent>,
    ended_lock: AtomicBool,
    state: Mutex<State>,
}

struct State {
    host_id: Option<ParticipantId>,
    join_order: Vec<ParticipantId>,
    participants: HashMap<ParticipantId, Participant>,
    video: VideoState,
    chat: ChatLog,
    queue: Queue,
    voice_members: HashSet<ParticipantId>,
    screen_share: ScreenShareState,
    is_hidden: bool,
}

/// Outcome of removing a participant: who left, and who the new host is if
/// host transfer occurred.
pub struct Departure {
    pub participant: Participant,
    pub new_host_id: Option<ParticipantId>,
    pub room_is_empty: bool,
}

impl Room {
    pub fn new(code: RoomCode, clock: Arc<dyn Clock>) -> Self {
        let created_at = clock.now_ms();
        Self {
            shared: Arc::new(Shared {
                code,
                created_at,
                event_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                ended_lock: AtomicBool::new(false),
                state: Mutex::new(State {
                    host_id: None,
                    join_order: Vec::new(),
                    participants: HashMap::new(),
                    video: VideoState::new(clock.clone()),
                    chat: ChatLog::new(),
                    queue: Queue::new(),
                    voice_members: HashSet::new(),
                    screen_share: ScreenShareState::new(),
                    is_hidden: false,
                }),
                clock,
            }),
        }
    }

    pub fn code(&self) -> RoomCode {
        self.shared.code.clone()
    }

    pub fn created_at(&self) -> i64 {
        self.shared.created_at
    }

    pub fn downgrade(&self) -> WeakRoom {
        WeakRoom {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().unwrap()
    }

    pub fn emit(&self, event: RoomEvent) {
        // No active subscribers is a normal, non-error condition (e.g. right
        // after room:create before anyone's subscription has attached).
        let _ = self.shared.event_tx.send(event);
    }

    /// A fresh snapshot event followed by live events -- the same
    /// "existing + new" shape as the teacher's `available_producers` stream,
    /// generalized from producer IDs to the full room event feed.
    pub fn events(&self) -> impl Stream<Item = RoomEvent> {
        let snapshot_event = RoomEvent::broadcast(ServerEvent::RoomState {
            room: self.snapshot(),
        });
        stream::select(
            stream::once(async move { snapshot_event }),
            BroadcastStream::new(self.shared.event_tx.subscribe()).filter_map(|x| async move { x.ok() }),
        )
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let state = self.state();
        RoomSnapshot {
            room_code: self.shared.code.clone(),
            host_id: state.host_id.unwrap_or_default(),
            participants: state.participants.values().map(ParticipantView::from).collect(),
            video_state: state.video.snapshot(),
            chat_log: state.chat.messages().cloned().collect(),
            queue: state.queue.items().to_vec(),
            voice_members: state.voice_members.iter().copied().collect(),
            screen_sharer_id: state.screen_share.sharer_id(),
            is_hidden: state.is_hidden,
        }
    }

    // -- participants -----------------------------------------------------

    pub fn host_id(&self) -> Option<ParticipantId> {
        self.state().host_id
    }

    pub fn participant_count(&self) -> usize {
        self.state().participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participant_count() == 0
    }

    pub fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.state().participants.get(&id).cloned()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.state().participants.values().cloned().collect()
    }

    /// Add a participant. The first participant in a room becomes host (I1).
    pub fn add_participant(&self, participant: Participant) {
        let mut state = self.state();
        let id = participant.id;
        if state.host_id.is_none() {
            state.host_id = Some(id);
        }
        state.join_order.push(id);
        state.participants.insert(id, participant);
    }

    /// Remove a participant, promoting the earliest-joined remaining
    /// participant to host if the departing participant was host (§4.1).
    pub fn remove_participant(&self, id: ParticipantId) -> Option<Departure> {
        let mut state = self.state();
        let participant = state.participants.remove(&id)?;
        state.join_order.retain(|p| *p != id);
        state.voice_members.remove(&id);
        state.screen_share.stop(id);

        let mut new_host_id = None;
        if state.host_id == Some(id) {
            new_host_id = state.join_order.first().copied();
            state.host_id = new_host_id;
        }

        Some(Departure {
            participant,
            new_host_id,
            room_is_empty: state.participants.is_empty(),
        })
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.state().is_hidden = hidden;
    }

    pub fn is_hidden(&self) -> bool {
        self.state().is_hidden
    }

    // -- video state --------------------------------------------------------

    pub fn load_video(&self, url: &str) -> Result<VideoSnapshot, RelayError> {
        let source = classify_url(url)?;
        Ok(self.state().video.load(source))
    }

    pub fn play_video(&self) -> Option<VideoSnapshot> {
        self.state().video.play()
    }

    pub fn pause_video(&self, position: f64) -> Option<VideoSnapshot> {
        self.state().video.pause(position)
    }

    pub fn seek_video(&self, position: f64) -> VideoSnapshot {
        self.state().video.seek(position)
    }

    pub fn set_video_rate(&self, rate: f64) -> VideoSnapshot {
        self.state().video.set_rate(rate)
    }

    pub fn video_snapshot(&self) -> VideoSnapshot {
        self.state().video.snapshot()
    }

    pub fn video_is_eligible_for_heartbeat(&self) -> bool {
        let state = self.state();
        state.participants.len() >= 2 && state.video.has_video() && state.video.is_playing()
    }

    /// Acquire the ended-lock for 2000ms, spawning a task on the provided
    /// runtime handle to release it. Returns `true` if this call acquired the
    /// lock (i.e. this is the "winning" `ended()` among concurrent duplicates).
    pub fn try_enter_ended_lock(&self) -> bool {
        let acquired = self
            .shared
            .ended_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if acquired {
            let weak = self.downgrade();
            tokio::spawn(async move {
                tokio::time::sleep(ENDED_LOCK_HOLD).await;
                if let Some(room) = weak.upgrade() {
                    room.shared.ended_lock.store(false, Ordering::SeqCst);
                }
            });
        }
        acquired
    }

    /// Pop the queue head and load it as the current video, for `video:ended`
    /// auto-advance. Returns `None` if the queue was empty.
    pub fn advance_queue(&self) -> Option<(QueueItem, VideoSnapshot)> {
        let mut state = self.state();
        let item = state.queue.take_next()?;
        let source = crate::video_state::VideoSource {
            video_id: item.source.video_id.clone(),
            video_url: item.source.video_url.clone(),
            video_type: item.source.video_type,
            title: item.title.clone(),
        };
        let snapshot = state.video.load(source);
        Some((item, snapshot))
    }

    pub fn queue_snapshot(&self) -> Vec<QueueItem> {
        self.state().queue.items().to_vec()
    }

    // -- chat ----------------------------------------------------------------

    pub fn post_chat_message(&self, author_id: ParticipantId, author_name: String, body: String) -> ChatMessage {
        let clock = self.shared.clock.clone();
        self.state().chat.post(clock.as_ref(), author_id, author_name, body)
    }

    pub fn post_system_message(&self, body: String) -> ChatMessage {
        let clock = self.shared.clock.clone();
        self.state().chat.system(clock.as_ref(), body)
    }

    pub fn chat_message_author(&self, message_id: MessageId) -> Option<Option<ParticipantId>> {
        self.state().chat.author_of(message_id)
    }

    pub fn delete_chat_message(&self, message_id: MessageId) -> bool {
        self.state().chat.delete(message_id)
    }

    // -- queue -----------------------------------------------------------

    pub fn add_queue_item(&self, url: &str, added_by: String) -> Result<QueueItem, RelayError> {
        self.state().queue.add(url, added_by)
    }

    pub fn remove_queue_item(&self, item_id: QueueItemId) -> Result<(), RelayError> {
        self.state().queue.remove(item_id)
    }

    pub fn reorder_queue_item(&self, item_id: QueueItemId, new_index: usize) -> Result<(), RelayError> {
        self.state().queue.reorder(item_id, new_index)
    }

    pub fn play_queue_item(&self, item_id: QueueItemId) -> Result<VideoSnapshot, RelayError> {
        let mut state = self.state();
        let item = state.queue.take(item_id)?;
        let source = crate::video_state::VideoSource {
            video_id: item.source.video_id,
            video_url: item.source.video_url,
            video_type: item.source.video_type,
            title: item.title,
        };
        Ok(state.video.load(source))
    }

    pub fn set_queue_item_title(&self, item_id: QueueItemId, title: String) {
        self.state().queue.set_title(item_id, title);
    }

    /// Best-effort oEmbed backfill for the video loaded directly via
    /// `video:load` (as opposed to one already titled from the queue).
    pub fn set_video_title(&self, title: String) -> VideoSnapshot {
        self.state().video.set_title(title)
    }

    // -- voice -------------------------------------------------------------

    pub fn voice_join(&self, id: ParticipantId) {
        self.state().voice_members.insert(id);
    }

    pub fn voice_leave(&self, id: ParticipantId) -> bool {
        self.state().voice_members.remove(&id)
    }

    pub fn voice_members(&self) -> Vec<ParticipantId> {
        self.state().voice_members.iter().copied().collect()
    }

    // -- screen share ------------------------------------------------------

    pub fn screen_start(&self, id: ParticipantId) -> Result<(), RelayError> {
        self.state().screen_share.start(id)
    }

    pub fn screen_stop(&self, id: ParticipantId) -> bool {
        self.state().screen_share.stop(id)
    }

    pub fn screen_sharer_id(&self) -> Option<ParticipantId> {
        self.state().screen_share.sharer_id()
    }

    pub fn screen_can_relay(&self, from: ParticipantId, to: ParticipantId) -> bool {
        self.state().screen_share.can_relay(from, to)
    }
}

impl WeakRoom {
    pub fn upgrade(&self) -> Option<Room> {
        let shared = self.shared.upgrade()?;
        Some(Room { shared })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        log::info!("destroyed room {}", self.code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn room() -> Room {
        Room::new(RoomCode::from("ABC123"), Arc::new(TestClock::new(0)))
    }

    #[test]
    fn first_participant_becomes_host() {
        let r = room();
        let alice = Participant::new(ParticipantId::new(), r.code(), "Alice");
        let alice_id = alice.id;
        r.add_participant(alice);
        assert_eq!(r.host_id(), Some(alice_id));
    }

    #[test]
    fn host_transfers_to_earliest_joined_remaining() {
        let r = room();
        let alice = Participant::new(ParticipantId::new(), r.code(), "Alice");
        let bob = Participant::new(ParticipantId::new(), r.code(), "Bob");
        let carol = Participant::new(ParticipantId::new(), r.code(), "Carol");
        let (alice_id, bob_id) = (alice.id, bob.id);
        r.add_participant(alice);
        r.add_participant(bob);
        r.add_participant(carol);

        let departure = r.remove_participant(alice_id).unwrap();
        assert_eq!(departure.new_host_id, Some(bob_id));
        assert_eq!(r.host_id(), Some(bob_id));
    }

    #[test]
    fn last_participant_leaving_empties_room() {
        let r = room();
        let alice = Participant::new(ParticipantId::new(), r.code(), "Alice");
        let alice_id = alice.id;
        r.add_participant(alice);
        let departure = r.remove_participant(alice_id).unwrap();
        assert!(departure.room_is_empty);
        assert!(r.is_empty());
    }

    #[tokio::test]
    async fn ended_lock_is_exclusive_until_released() {
        let r = room();
        assert!(r.try_enter_ended_lock());
        assert!(!r.try_enter_ended_lock());
    }
}
