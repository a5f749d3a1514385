//! SFU peer: the per-participant slice of the voice data path (spec.md §4.4,
//! §3 "SFU Peer"). One send transport, one receive transport, at most one
//! producer, N consumers. Grounded directly on the teacher's `session.rs`
//! `Arc<Shared>` + `Mutex<State>` pattern, narrowed to audio-only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mediasoup::consumer::{Consumer, ConsumerId, ConsumerOptions};
use mediasoup::data_structures::DtlsParameters;
use mediasoup::producer::{Producer, ProducerId, ProducerOptions};
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_transport::{
    TransportListenIps, WebRtcTransport, WebRtcTransportOptions, WebRtcTransportRemoteParameters,
};

use crate::ids::ParticipantId;

/// mediasoup recommends starting new send transports with a generous initial
/// outgoing bitrate allowance; this is the ceiling, not a guarantee.
const INITIAL_AVAILABLE_OUTGOING_BITRATE: u32 = 600_000;

#[derive(Default)]
struct State {
    client_rtp_capabilities: Option<RtpCapabilities>,
    send_transport: Option<WebRtcTransport>,
    recv_transport: Option<WebRtcTransport>,
    producer: Option<Producer>,
    consumers: HashMap<ConsumerId, Consumer>,
}

/// One participant's SFU-facing state within a single room's router.
pub struct Peer {
    participant_id: ParticipantId,
    state: Mutex<State>,
}

impl Peer {
    pub fn new(participant_id: ParticipantId) -> Arc<Self> {
        Arc::new(Self {
            participant_id,
            state: Mutex::new(State::default()),
        })
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn set_rtp_capabilities(&self, caps: RtpCapabilities) {
        self.state.lock().unwrap().client_rtp_capabilities = Some(caps);
    }

    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.state.lock().unwrap().client_rtp_capabilities.clone()
    }

    /// Allocate (replacing any existing) send transport.
    pub async fn create_send_transport(
        &self,
        router: &mediasoup::router::Router,
        listen_ips: TransportListenIps,
    ) -> Result<WebRtcTransport> {
        let mut options = WebRtcTransportOptions::new(listen_ips);
        options.initial_available_outgoing_bitrate = INITIAL_AVAILABLE_OUTGOING_BITRATE;
        let transport = router.create_webrtc_transport(options).await?;
        log::trace!(
            "+send-transport {} (peer {})",
            transport.id(),
            self.participant_id
        );
        self.state.lock().unwrap().send_transport = Some(transport.clone());
        Ok(transport)
    }

    pub async fn create_recv_transport(
        &self,
        router: &mediasoup::router::Router,
        listen_ips: TransportListenIps,
    ) -> Result<WebRtcTransport> {
        let mut options = WebRtcTransportOptions::new(listen_ips);
        options.initial_available_outgoing_bitrate = INITIAL_AVAILABLE_OUTGOING_BITRATE;
        let transport = router.create_webrtc_transport(options).await?;
        log::trace!(
            "+recv-transport {} (peer {})",
            transport.id(),
            self.participant_id
        );
        self.state.lock().unwrap().recv_transport = Some(transport.clone());
        Ok(transport)
    }

    fn transport_by_id(&self, id: TransportId) -> Option<WebRtcTransport> {
        let state = self.state.lock().unwrap();
        [&state.send_transport, &state.recv_transport]
            .into_iter()
            .flatten()
            .find(|t| t.id() == id)
            .cloned()
    }

    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let transport = self
            .transport_by_id(transport_id)
            .ok_or_else(|| anyhow!("transport {} does not exist on this peer", transport_id))?;
        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await?;
        log::trace!(
            "<-> transport {} (peer {})",
            transport_id,
            self.participant_id
        );
        Ok(())
    }

    /// Create the (singular) outbound audio producer on the send transport.
    pub async fn produce(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer> {
        let transport = {
            let state = self.state.lock().unwrap();
            state
                .send_transport
                .clone()
                .ok_or_else(|| anyhow!("no send transport for peer {}", self.participant_id))?
        };
        let producer = local_pool
            .spawn_pinned(move || async move {
                transport
                    .produce(ProducerOptions::new(kind, rtp_parameters))
                    .await
            })
            .await
            .map_err(|e| anyhow!("producer spawn panicked: {e}"))??;
        log::trace!("+producer {} (peer {})", producer.id(), self.participant_id);
        self.state.lock().unwrap().producer = Some(producer.clone());
        Ok(producer)
    }

    pub fn producer(&self) -> Option<Producer> {
        self.state.lock().unwrap().producer.clone()
    }

    pub async fn pause_producer(&self) -> Result<()> {
        let producer = self
            .producer()
            .ok_or_else(|| anyhow!("no producer for peer {}", self.participant_id))?;
        producer.pause().await?;
        Ok(())
    }

    pub async fn resume_producer(&self) -> Result<()> {
        let producer = self
            .producer()
            .ok_or_else(|| anyhow!("no producer for peer {}", self.participant_id))?;
        producer.resume().await?;
        Ok(())
    }

    /// Create a paused consumer on the receive transport for a remote producer.
    pub async fn consume(
        &self,
        local_pool: &tokio_local::LocalPoolHandle,
        producer_id: ProducerId,
    ) -> Result<Consumer> {
        let (transport, rtp_capabilities) = {
            let state = self.state.lock().unwrap();
            let transport = state
                .recv_transport
                .clone()
                .ok_or_else(|| anyhow!("no recv transport for peer {}", self.participant_id))?;
            let rtp_capabilities = state
                .client_rtp_capabilities
                .clone()
                .ok_or_else(|| anyhow!("missing rtp capabilities for peer {}", self.participant_id))?;
            (transport, rtp_capabilities)
        };

        let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = true;
        let consumer = local_pool
            .spawn_pinned(|| async move { transport.consume(options).await })
            .await
            .map_err(|e| anyhow!("consumer spawn panicked: {e}"))??;

        log::trace!("+consumer {} (peer {})", consumer.id(), self.participant_id);
        self.state
            .lock()
            .unwrap()
            .consumers
            .insert(consumer.id(), consumer.clone());
        Ok(consumer)
    }

    pub fn consumer(&self, id: ConsumerId) -> Option<Consumer> {
        self.state.lock().unwrap().consumers.get(&id).cloned()
    }

    pub async fn resume_consumer(&self, id: ConsumerId) -> Result<()> {
        let consumer = self
            .consumer(id)
            .ok_or_else(|| anyhow!("consumer {} does not exist", id))?;
        consumer.resume().await?;
        Ok(())
    }

    /// Close producer, consumers, and both transports, in that order (§4.4
    /// close propagation). Returns the producer ID that was closed, if any,
    /// so the caller can fan out `voice:producer-closed`.
    pub fn close(&self) -> Option<ProducerId> {
        let mut state = self.state.lock().unwrap();
        let closed_producer_id = state.producer.as_ref().map(|p| p.id());
        state.consumers.clear();
        state.producer = None;
        state.send_transport = None;
        state.recv_transport = None;
        log::debug!("closed peer {}", self.participant_id);
        closed_producer_id
    }
}
