//! SFU control plane (spec.md §4.4): worker pool, per-room router
//! allocation, and the handshake operations the dispatcher calls into.
//! Peer state itself lives in `peer.rs`; this module owns the router ↔
//! worker binding and the room → peer-set mapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mediasoup::consumer::{Consumer, ConsumerId};
use mediasoup::data_structures::{DtlsParameters, TransportListenIp};
use mediasoup::producer::{Producer, ProducerId};
use mediasoup::router::{Router, RouterOptions};
use mediasoup::rtp_parameters::{
    MediaKind, RtpCapabilities, RtpCapabilitiesFinalized, RtpCodecCapability,
    RtpCodecParametersParameters, RtpParameters,
};
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_transport::{TransportListenIps, WebRtcTransport};
use mediasoup::worker::{Worker, WorkerSettings};
use mediasoup::worker_manager::WorkerManager;

use crate::config::Config;
use crate::ids::{ParticipantId, RoomCode};
use crate::peer::Peer;

fn audio_codecs() -> Vec<RtpCodecCapability> {
    use mediasoup::rtp_parameters::{MimeTypeAudio, RtcpFeedback};
    use std::num::{NonZeroU32, NonZeroU8};

    vec![RtpCodecCapability::Audio {
        mime_type: MimeTypeAudio::Opus,
        preferred_payload_type: None,
        clock_rate: NonZeroU32::new(48000).unwrap(),
        channels: NonZeroU8::new(2).unwrap(),
        parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
        rtcp_feedback: vec![RtcpFeedback::TransportCc],
    }]
}

/// One room's slice of the SFU: a router bound to whichever worker it was
/// assigned at creation, and the peer set keyed by participant.
pub struct SfuRoom {
    router: Router,
    peers: Mutex<HashMap<ParticipantId, Arc<Peer>>>,
}

impl SfuRoom {
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        self.router.rtp_capabilities().clone()
    }

    pub fn ensure_peer(&self, participant_id: ParticipantId) -> Arc<Peer> {
        let mut peers = self.peers.lock().unwrap();
        peers
            .entry(participant_id)
            .or_insert_with(|| Peer::new(participant_id))
            .clone()
    }

    pub fn peer(&self, participant_id: ParticipantId) -> Option<Arc<Peer>> {
        self.peers.lock().unwrap().get(&participant_id).cloned()
    }

    pub fn remove_peer(&self, participant_id: ParticipantId) -> Option<Arc<Peer>> {
        self.peers.lock().unwrap().remove(&participant_id)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().unwrap().is_empty()
    }

    /// `{connectionId, producerId}` for every other participant currently
    /// producing -- the `existingProducers` field of the `voice:join` ack.
    pub fn existing_producers(&self, exclude: ParticipantId) -> Vec<(ParticipantId, ProducerId)> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .filter(|peer| peer.participant_id() != exclude)
            .filter_map(|peer| peer.producer().map(|p| (peer.participant_id(), p.id())))
            .collect()
    }
}

/// Top-level SFU control plane: the worker pool and the live room routers.
pub struct Sfu {
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    rooms: Mutex<HashMap<RoomCode, Arc<SfuRoom>>>,
    listen_ip: TransportListenIp,
}

impl Sfu {
    pub async fn new(config: &Config) -> Result<Self> {
        let worker_manager = WorkerManager::new();
        let mut workers = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            let mut settings = WorkerSettings::default();
            settings.rtc_ports_range = config.rtc_port..=config.rtc_port.saturating_add(999);
            let worker = worker_manager
                .create_worker(settings)
                .await
                .map_err(|e| anyhow!("failed to spawn mediasoup worker: {e}"))?;
            workers.push(worker);
        }
        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            rooms: Mutex::new(HashMap::new()),
            listen_ip: TransportListenIp {
                ip: config.rtc_ip,
                announced_ip: config.rtc_announce_ip,
            },
        })
    }

    fn next_worker(&self) -> Worker {
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].clone()
    }

    fn listen_ips(&self) -> TransportListenIps {
        TransportListenIps::new(self.listen_ip)
    }

    /// Lazily create the room's router (§4.4: "created lazily on the first
    /// `voice:join`"), round-robining across the worker pool.
    pub async fn ensure_room(&self, room_code: &RoomCode) -> Result<Arc<SfuRoom>> {
        if let Some(room) = self.rooms.lock().unwrap().get(room_code).cloned() {
            return Ok(room);
        }
        let worker = self.next_worker();
        let router = worker
            .create_router(RouterOptions::new(audio_codecs()))
            .await
            .map_err(|e| anyhow!("failed to create router for room {room_code}: {e}"))?;
        let room = Arc::new(SfuRoom {
            router,
            peers: Mutex::new(HashMap::new()),
        });
        self.rooms
            .lock()
            .unwrap()
            .insert(room_code.clone(), room.clone());
        log::debug!("created SFU router for room {room_code}");
        Ok(room)
    }

    pub fn room(&self, room_code: &RoomCode) -> Option<Arc<SfuRoom>> {
        self.rooms.lock().unwrap().get(room_code).cloned()
    }

    /// Destroy the room's router once its peer set has emptied.
    pub fn teardown_room_if_empty(&self, room_code: &RoomCode) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get(room_code) {
            if room.is_empty() {
                rooms.remove(room_code);
                log::debug!("tore down SFU router for room {room_code}");
            }
        }
    }

    pub async fn create_send_transport(
        &self,
        room_code: &RoomCode,
        participant_id: ParticipantId,
    ) -> Result<WebRtcTransport> {
        let room = self.ensure_room(room_code).await?;
        let peer = room.ensure_peer(participant_id);
        peer.create_send_transport(room.router(), self.listen_ips()).await
    }

    pub async fn create_recv_transport(
        &self,
        room_code: &RoomCode,
        participant_id: ParticipantId,
    ) -> Result<WebRtcTransport> {
        let room = self.ensure_room(room_code).await?;
        let peer = room.ensure_peer(participant_id);
        peer.create_recv_transport(room.router(), self.listen_ips()).await
    }

    pub fn set_rtp_capabilities(
        &self,
        room_code: &RoomCode,
        participant_id: ParticipantId,
        caps: RtpCapabilities,
    ) -> Result<()> {
        let room = self
            .room(room_code)
            .ok_or_else(|| anyhow!("no SFU room for {room_code}"))?;
        room.ensure_peer(participant_id).set_rtp_capabilities(caps);
        Ok(())
    }

    pub async fn connect_transport(
        &self,
        room_code: &RoomCode,
        participant_id: ParticipantId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let room = self
            .room(room_code)
            .ok_or_else(|| anyhow!("no SFU room for {room_code}"))?;
        let peer = room
            .peer(participant_id)
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.connect_transport(transport_id, dtls_parameters).await
    }

    pub async fn produce(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        room_code: &RoomCode,
        participant_id: ParticipantId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer> {
        let room = self
            .room(room_code)
            .ok_or_else(|| anyhow!("no SFU room for {room_code}"))?;
        let peer = room
            .peer(participant_id)
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.produce(local_pool, kind, rtp_parameters).await
    }

    pub async fn consume(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        room_code: &RoomCode,
        participant_id: ParticipantId,
        producer_id: ProducerId,
    ) -> Result<Consumer> {
        let room = self
            .room(room_code)
            .ok_or_else(|| anyhow!("no SFU room for {room_code}"))?;
        let peer = room
            .peer(participant_id)
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.consume(local_pool, producer_id).await
    }

    pub async fn resume_consumer(
        &self,
        room_code: &RoomCode,
        participant_id: ParticipantId,
        consumer_id: ConsumerId,
    ) -> Result<()> {
        let peer = self
            .room(room_code)
            .and_then(|room| room.peer(participant_id))
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.resume_consumer(consumer_id).await
    }

    pub async fn pause_producer(&self, room_code: &RoomCode, participant_id: ParticipantId) -> Result<()> {
        let peer = self
            .room(room_code)
            .and_then(|room| room.peer(participant_id))
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.pause_producer().await
    }

    pub async fn resume_producer(&self, room_code: &RoomCode, participant_id: ParticipantId) -> Result<()> {
        let peer = self
            .room(room_code)
            .and_then(|room| room.peer(participant_id))
            .ok_or_else(|| anyhow!("no SFU peer for {participant_id}"))?;
        peer.resume_producer().await
    }

    /// Leave voice / disconnect: close (consumers, producer, transports) in
    /// order, then drop the router if the room's peer set is now empty.
    /// Returns the closed producer ID, if any, for `voice:producer-closed`.
    pub fn leave(&self, room_code: &RoomCode, participant_id: ParticipantId) -> Option<ProducerId> {
        let room = self.room(room_code)?;
        let peer = room.remove_peer(participant_id)?;
        let closed_producer_id = peer.close();
        self.teardown_room_if_empty(room_code);
        closed_producer_id
    }

    pub fn existing_producers(
        &self,
        room_code: &RoomCode,
        exclude: ParticipantId,
    ) -> Vec<(ParticipantId, ProducerId)> {
        self.room(room_code)
            .map(|room| room.existing_producers(exclude))
            .unwrap_or_default()
    }

    pub fn rtp_capabilities(&self, room_code: &RoomCode) -> Option<RtpCapabilitiesFinalized> {
        self.room(room_code).map(|room| room.rtp_capabilities())
    }
}
