//! GraphQL wire protocol (spec.md §6): every inbound event is a mutation on
//! [`MutationRoot`]; every outbound event rides the single [`SubscriptionRoot::events`]
//! subscription, filtered per-connection by `RoomEvent::visible_to`.
//!
//! This completes the teacher's own `signal_schema.rs` draft -- the scalar
//! wrappers around mediasoup's wire types, and the consume/produce/transport
//! handshake shape, are the same idiom, generalized from one hardcoded
//! session to the dispatcher's per-participant API.

use std::sync::Arc;

use async_graphql::{scalar, Context, Object, Schema, SimpleObject, Subscription};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::built_info;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::ids::{MessageId, ParticipantId, QueueItemId, RoomCode};
use crate::protocol::ServerEvent;

scalar!(crate::ids::ParticipantId, "ParticipantId");
scalar!(crate::ids::RoomCode, "RoomCode");
scalar!(crate::ids::MessageId, "MessageId");
scalar!(crate::ids::QueueItemId, "QueueItemId");

// -- mediasoup wire-type wrappers ------------------------------------------
//
// mediasoup's transport/producer/consumer IDs and RTP structures are foreign
// types, so (per the orphan rule) they need a local newtype before they can
// be handed a GraphQL scalar impl. Lifted directly from the draft in
// `signal_schema.rs`.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(mediasoup::transport::TransportId);
scalar!(TransportId);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(mediasoup::data_structures::DtlsParameters);
scalar!(DtlsParameters);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(mediasoup::data_structures::IceCandidate);
scalar!(IceCandidate);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceParameters(mediasoup::data_structures::IceParameters);
scalar!(IceParameters);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(mediasoup::consumer::ConsumerId);
scalar!(ConsumerId);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(mediasoup::producer::ProducerId);
scalar!(ProducerId);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaKind(mediasoup::rtp_parameters::MediaKind);
scalar!(MediaKind);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(mediasoup::rtp_parameters::RtpParameters);
scalar!(RtpParameters);

/// A client submits its own (non-finalized) capabilities; the server hands
/// back the router's finalized capabilities. Untagged so either shape
/// round-trips through the same scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RtpCapabilities {
    Normal(mediasoup::rtp_parameters::RtpCapabilities),
    Finalized(mediasoup::rtp_parameters::RtpCapabilitiesFinalized),
}
scalar!(RtpCapabilities);

#[derive(SimpleObject)]
struct TransportOptions {
    id: TransportId,
    dtls_parameters: DtlsParameters,
    ice_candidates: Vec<IceCandidate>,
    ice_parameters: IceParameters,
}

impl From<&mediasoup::webrtc_transport::WebRtcTransport> for TransportOptions {
    fn from(t: &mediasoup::webrtc_transport::WebRtcTransport) -> Self {
        use mediasoup::transport::Transport;
        Self {
            id: TransportId(t.id()),
            dtls_parameters: DtlsParameters(t.dtls_parameters()),
            ice_candidates: t.ice_candidates().iter().cloned().map(IceCandidate).collect(),
            ice_parameters: IceParameters(t.ice_parameters().clone()),
        }
    }
}

#[derive(SimpleObject)]
struct ConsumeParameters {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

impl From<&mediasoup::consumer::Consumer> for ConsumeParameters {
    fn from(c: &mediasoup::consumer::Consumer) -> Self {
        Self {
            id: ConsumerId(c.id()),
            producer_id: ProducerId(c.producer_id()),
            kind: MediaKind(c.kind()),
            rtp_parameters: RtpParameters(c.rtp_parameters().clone()),
        }
    }
}

#[derive(SimpleObject)]
struct ExistingProducer {
    participant_id: ParticipantId,
    producer_id: ProducerId,
}

#[derive(SimpleObject)]
struct VoiceJoinResult {
    rtp_capabilities: RtpCapabilities,
    existing_producers: Vec<ExistingProducer>,
}

#[derive(SimpleObject)]
struct RoomCreateResult {
    room_code: RoomCode,
    participant_id: ParticipantId,
}

fn field_result<T>(result: Result<T, RelayError>) -> async_graphql::Result<T> {
    use async_graphql::ErrorExtensions;
    result.map_err(|e| e.extend())
}

#[derive(Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Build/version info, for debugging deployed instances.
    async fn version(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            built_info::PKG_NAME,
            built_info::PKG_VERSION,
            built_info::TARGET,
            built_info::PROFILE
        )
    }
}

#[derive(Default)]
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    // -- room lifecycle --------------------------------------------------

    /// `room:create`.
    async fn room_create(&self, ctx: &Context<'_>, display_name: String) -> async_graphql::Result<RoomCreateResult> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let (room_code, participant_id) = field_result(dispatcher.room_create(&display_name))?;
        Ok(RoomCreateResult { room_code, participant_id })
    }

    /// `room:join`.
    async fn room_join(
        &self,
        ctx: &Context<'_>,
        room_code: RoomCode,
        display_name: String,
    ) -> async_graphql::Result<RoomCreateResult> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let (_room, participant_id) = field_result(dispatcher.room_join(&room_code, &display_name))?;
        Ok(RoomCreateResult { room_code, participant_id })
    }

    /// `room:leave`. Idempotent: a subsequent disconnect-triggered cleanup of
    /// the same connection is a no-op (see `hub::ConnectionGuard`).
    async fn room_leave(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> bool {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        dispatcher.room_leave(participant_id).await;
        true
    }

    /// Supplemented feature (SPEC_FULL.md §B): host-only lobby visibility toggle.
    async fn room_set_hidden(&self, ctx: &Context<'_>, participant_id: ParticipantId, hidden: bool) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.room_set_hidden(participant_id, hidden))?;
        Ok(true)
    }

    // -- video -------------------------------------------------------------

    async fn video_load(&self, ctx: &Context<'_>, participant_id: ParticipantId, url: String) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let snapshot = field_result(dispatcher.video_load(participant_id, &url))?;

        if snapshot.video_type == crate::video_state::VideoType::Youtube {
            let dispatcher = dispatcher.clone();
            let client = ctx.data_unchecked::<reqwest::Client>().clone();
            let video_url = snapshot.video_url.clone();
            tokio::spawn(async move {
                if let Some(room) = dispatcher.registry().lookup(participant_id) {
                    if let Some(title) = crate::queue::fetch_oembed_title(&client, &video_url).await {
                        dispatcher.video_backfill_title(&room, title);
                    }
                }
            });
        }
        Ok(true)
    }

    async fn video_play(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.video_play(participant_id))?;
        Ok(true)
    }

    async fn video_pause(&self, ctx: &Context<'_>, participant_id: ParticipantId, current_time: f64) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.video_pause(participant_id, current_time))?;
        Ok(true)
    }

    async fn video_seek(&self, ctx: &Context<'_>, participant_id: ParticipantId, current_time: f64) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.video_seek(participant_id, current_time))?;
        Ok(true)
    }

    async fn video_rate(&self, ctx: &Context<'_>, participant_id: ParticipantId, rate: f64) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.video_rate(participant_id, rate))?;
        Ok(true)
    }

    async fn video_ended(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.video_ended(participant_id))?;
        Ok(true)
    }

    // -- queue ---------------------------------------------------------

    async fn queue_add(&self, ctx: &Context<'_>, participant_id: ParticipantId, url: String) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let item = field_result(dispatcher.queue_add(participant_id, &url))?;

        if item.source.video_type == crate::video_state::VideoType::Youtube {
            let dispatcher = dispatcher.clone();
            let client = ctx.data_unchecked::<reqwest::Client>().clone();
            let video_url = item.source.video_url.clone();
            let item_id = item.id;
            tokio::spawn(async move {
                if let Some(room) = dispatcher.registry().lookup(participant_id) {
                    if let Some(title) = crate::queue::fetch_oembed_title(&client, &video_url).await {
                        dispatcher.queue_backfill_title(&room, item_id, title);
                    }
                }
            });
        }
        Ok(true)
    }

    async fn queue_remove(&self, ctx: &Context<'_>, participant_id: ParticipantId, item_id: QueueItemId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.queue_remove(participant_id, item_id))?;
        Ok(true)
    }

    async fn queue_reorder(
        &self,
        ctx: &Context<'_>,
        participant_id: ParticipantId,
        item_id: QueueItemId,
        new_index: i32,
    ) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.queue_reorder(participant_id, item_id, new_index.max(0) as usize))?;
        Ok(true)
    }

    async fn queue_play(&self, ctx: &Context<'_>, participant_id: ParticipantId, item_id: QueueItemId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.queue_play(participant_id, item_id))?;
        Ok(true)
    }

    async fn queue_play_next(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.queue_play_next(participant_id))?;
        Ok(true)
    }

    // -- chat ------------------------------------------------------------

    async fn chat_message(&self, ctx: &Context<'_>, participant_id: ParticipantId, text: String) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.chat_message(participant_id, &text))?;
        Ok(true)
    }

    async fn chat_delete(&self, ctx: &Context<'_>, participant_id: ParticipantId, message_id: MessageId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.chat_delete(participant_id, message_id))?;
        Ok(true)
    }

    // -- voice / SFU -------------------------------------------------------

    async fn voice_join(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<VoiceJoinResult> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let (caps, existing) = field_result(dispatcher.voice_join(participant_id).await)?;
        Ok(VoiceJoinResult {
            rtp_capabilities: RtpCapabilities::Finalized(caps),
            existing_producers: existing
                .into_iter()
                .map(|(participant_id, producer_id)| ExistingProducer {
                    participant_id,
                    producer_id: ProducerId(producer_id),
                })
                .collect(),
        })
    }

    async fn voice_create_send_transport(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<TransportOptions> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let transport = field_result(dispatcher.voice_create_send_transport(participant_id).await)?;
        Ok(TransportOptions::from(&transport))
    }

    async fn voice_create_recv_transport(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<TransportOptions> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let transport = field_result(dispatcher.voice_create_recv_transport(participant_id).await)?;
        Ok(TransportOptions::from(&transport))
    }

    async fn voice_connect_transport(
        &self,
        ctx: &Context<'_>,
        participant_id: ParticipantId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(
            dispatcher
                .voice_connect_transport(participant_id, transport_id.0, dtls_parameters.0)
                .await,
        )?;
        Ok(true)
    }

    async fn voice_produce(
        &self,
        ctx: &Context<'_>,
        participant_id: ParticipantId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> async_graphql::Result<ProducerId> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let local_pool = *ctx.data_unchecked::<&'static tokio_local::LocalPoolHandle>();
        let producer = field_result(
            dispatcher
                .voice_produce(local_pool, participant_id, kind.0, rtp_parameters.0)
                .await,
        )?;
        Ok(ProducerId(producer.id()))
    }

    /// `voice:consume`: the caller's RTP capabilities ride along with this
    /// call rather than a separate event, so we record them before asking
    /// the router whether it can consume for this participant.
    async fn voice_consume(
        &self,
        ctx: &Context<'_>,
        participant_id: ParticipantId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> async_graphql::Result<ConsumeParameters> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let local_pool = *ctx.data_unchecked::<&'static tokio_local::LocalPoolHandle>();
        let caps = match rtp_capabilities {
            RtpCapabilities::Normal(caps) => caps,
            RtpCapabilities::Finalized(_) => {
                return Err("rtpCapabilities must be the client's own (non-finalized) capabilities".into())
            }
        };
        field_result(dispatcher.voice_set_rtp_capabilities(participant_id, caps))?;
        let consumer = field_result(
            dispatcher
                .voice_consume(local_pool, participant_id, producer_id.0)
                .await,
        )?;
        Ok(ConsumeParameters::from(&consumer))
    }

    async fn voice_resume_consumer(&self, ctx: &Context<'_>, participant_id: ParticipantId, consumer_id: ConsumerId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.voice_resume_consumer(participant_id, consumer_id.0).await)?;
        Ok(true)
    }

    async fn voice_pause_producer(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.voice_pause_producer(participant_id).await)?;
        Ok(true)
    }

    async fn voice_resume_producer(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.voice_resume_producer(participant_id).await)?;
        Ok(true)
    }

    async fn voice_leave(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.voice_leave(participant_id).await)?;
        Ok(true)
    }

    // -- screen share --------------------------------------------------

    async fn screen_start(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.screen_start(participant_id))?;
        Ok(true)
    }

    async fn screen_stop(&self, ctx: &Context<'_>, participant_id: ParticipantId) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.screen_stop(participant_id))?;
        Ok(true)
    }

    async fn screen_offer(&self, ctx: &Context<'_>, participant_id: ParticipantId, to: ParticipantId, sdp: serde_json::Value) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.screen_offer(participant_id, to, sdp))?;
        Ok(true)
    }

    async fn screen_answer(&self, ctx: &Context<'_>, participant_id: ParticipantId, to: ParticipantId, sdp: serde_json::Value) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.screen_answer(participant_id, to, sdp))?;
        Ok(true)
    }

    async fn screen_ice_candidate(
        &self,
        ctx: &Context<'_>,
        participant_id: ParticipantId,
        to: ParticipantId,
        candidate: serde_json::Value,
    ) -> async_graphql::Result<bool> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        field_result(dispatcher.screen_ice_candidate(participant_id, to, candidate))?;
        Ok(true)
    }
}

#[derive(Default)]
pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// The single outbound firehose for a connection: a room snapshot
    /// followed by every `RoomEvent` visible to this participant, for as
    /// long as the underlying WebSocket stays open. The connection's
    /// `ConnectionGuard` (held by `main.rs` for the lifetime of the upgrade
    /// future) drops when this stream ends, which is what actually runs the
    /// disconnect sequence -- this resolver only has to pick the right room
    /// and the right filter.
    async fn events(&self, ctx: &Context<'_>) -> async_graphql::Result<impl Stream<Item = async_graphql::Json<ServerEvent>>> {
        let dispatcher = ctx.data_unchecked::<Arc<Dispatcher>>();
        let participant_id = *ctx.data::<ParticipantId>()?;
        let room = dispatcher
            .registry()
            .lookup(participant_id)
            .ok_or("participant is not in a room")?;
        Ok(room
            .events()
            .filter(move |event| {
                let visible = event.visible_to(participant_id);
                async move { visible }
            })
            .map(|event| async_graphql::Json(event.payload)))
    }
}

pub type RelaySchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

pub fn schema(dispatcher: Arc<Dispatcher>, local_pool: &'static tokio_local::LocalPoolHandle, http_client: reqwest::Client) -> RelaySchema {
    RelaySchema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(dispatcher)
        .data(local_pool)
        .data(http_client)
        .finish()
}
