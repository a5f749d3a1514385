//! Shared test fixtures: a real (local) `Sfu` worker plus the mediasoup wire
//! values exercised in a produce/consume handshake. These device parameters
//! are the same handshake shapes the teacher's own `tests/session.rs` drove
//! a bare `RelayServer` with; here they drive the full `Dispatcher`.

use std::num::{NonZeroU32, NonZeroU8};
use std::sync::Arc;

use mediasoup::data_structures::{DtlsFingerprint, DtlsParameters, DtlsRole};
use mediasoup::rtp_parameters::{
    MediaKind, MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpHeaderExtension, RtpHeaderExtensionDirection,
    RtpHeaderExtensionParameters, RtpHeaderExtensionUri, RtpParameters,
};
use mediasoup::sctp_parameters::SctpStreamParameters;

use watchparty_relay::clock::TestClock;
use watchparty_relay::config::{Config, IceServerConfig};
use watchparty_relay::dispatcher::Dispatcher;
use watchparty_relay::registry::Registry;
use watchparty_relay::sfu::Sfu;

/// A `Config` sized for tests: one mediasoup worker bound to loopback, no
/// TURN/TLS, a single fixed Invidious instance.
pub fn test_config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_owned(),
        cert_path: None,
        key_path: None,
        cors_origin: None,
        rtc_ip: "127.0.0.1".parse().unwrap(),
        rtc_announce_ip: None,
        rtc_port: 0,
        num_workers: 1,
        ice: IceServerConfig {
            stun_urls: vec![],
            turn_url: None,
            turn_username: None,
            turn_credential: None,
        },
        invidious_instances: vec!["https://invidious.example".to_owned()],
    }
}

/// A `Dispatcher` wired to a fresh `Registry` and a real local `Sfu` (one
/// mediasoup worker). Every integration test gets its own, so rooms/codes
/// never collide across tests.
pub async fn dispatcher() -> Arc<Dispatcher> {
    let config = test_config();
    let registry = Arc::new(Registry::new(Arc::new(TestClock::new(0))));
    let sfu = Sfu::new(&config).await.expect("failed to start mediasoup worker for test");
    Arc::new(Dispatcher::new(registry, sfu))
}

pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint::Sha256 {
            value: [
                0x82, 0x5A, 0x68, 0x3D, 0x36, 0xC3, 0x0A, 0xDE, 0xAF, 0xE7, 0x32, 0x43, 0xD2, 0x88,
                0x83, 0x57, 0xAC, 0x2D, 0x65, 0xE5, 0x80, 0xC4, 0xB6, 0xFB, 0xAF, 0x1A, 0xA0, 0x21,
                0x9F, 0x6D, 0x0C, 0xAD,
            ],
        }],
    }
}

pub fn sctp_stream_parameters() -> SctpStreamParameters {
    SctpStreamParameters::new_unordered_with_life_time(12345, 5000)
}

pub fn audio_producer_device_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("AUDIO".to_string()),
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type: 111,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("useinbandfec", 1u32.into()),
                ("usedtx", 1u32.into()),
            ]),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![RtpHeaderExtensionParameters {
            uri: RtpHeaderExtensionUri::Mid,
            id: 10,
            encrypt: false,
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(11111111),
            ..RtpEncodingParameters::default()
        }],
        rtcp: RtcpParameters {
            cname: Some("FOOBAR".to_string()),
            ..RtcpParameters::default()
        },
    }
}

pub fn video_producer_device_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("VIDEO".to_string()),
        codecs: vec![
            RtpCodecParameters::Video {
                mime_type: MimeTypeVideo::H264,
                payload_type: 112,
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::from([
                    ("packetization-mode", 1u32.into()),
                    ("profile-level-id", "4d0032".into()),
                ]),
                rtcp_feedback: vec![RtcpFeedback::Nack, RtcpFeedback::NackPli, RtcpFeedback::GoogRemb],
            },
            RtpCodecParameters::Video {
                mime_type: MimeTypeVideo::Rtx,
                payload_type: 113,
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::from([("apt", 112u32.into())]),
                rtcp_feedback: vec![],
            },
        ],
        header_extensions: vec![RtpHeaderExtensionParameters {
            uri: RtpHeaderExtensionUri::Mid,
            id: 10,
            encrypt: false,
        }],
        encodings: vec![
            RtpEncodingParameters {
                ssrc: Some(22222222),
                rtx: Some(RtpEncodingParametersRtx { ssrc: 22222223 }),
                ..RtpEncodingParameters::default()
            },
        ],
        rtcp: RtcpParameters {
            cname: Some("FOOBAR".to_string()),
            ..RtcpParameters::default()
        },
    }
}

pub fn consumer_device_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: Some(100),
                clock_rate: NonZeroU32::new(48000).unwrap(),
                channels: NonZeroU8::new(2).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::H264,
                preferred_payload_type: Some(101),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::from([
                    ("level-asymmetry-allowed", 1u32.into()),
                    ("packetization-mode", 1u32.into()),
                    ("profile-level-id", "4d0032".into()),
                ]),
                rtcp_feedback: vec![
                    RtcpFeedback::Nack,
                    RtcpFeedback::NackPli,
                    RtcpFeedback::CcmFir,
                    RtcpFeedback::GoogRemb,
                ],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Rtx,
                preferred_payload_type: Some(102),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::from([("apt", 101u32.into())]),
                rtcp_feedback: vec![],
            },
        ],
        header_extensions: vec![
            RtpHeaderExtension {
                kind: Some(MediaKind::Audio),
                uri: RtpHeaderExtensionUri::Mid,
                preferred_id: 1,
                preferred_encrypt: false,
                direction: RtpHeaderExtensionDirection::default(),
            },
            RtpHeaderExtension {
                kind: Some(MediaKind::Video),
                uri: RtpHeaderExtensionUri::Mid,
                preferred_id: 1,
                preferred_encrypt: false,
                direction: RtpHeaderExtensionDirection::default(),
            },
            RtpHeaderExtension {
                kind: Some(MediaKind::Audio),
                uri: RtpHeaderExtensionUri::AbsSendTime,
                preferred_id: 4,
                preferred_encrypt: false,
                direction: RtpHeaderExtensionDirection::default(),
            },
            RtpHeaderExtension {
                kind: Some(MediaKind::Video),
                uri: RtpHeaderExtensionUri::AbsSendTime,
                preferred_id: 4,
                preferred_encrypt: false,
                direction: RtpHeaderExtensionDirection::default(),
            },
        ],
        fec_mechanisms: vec![],
    }
}
