//! webrtc-rs backed transport provider
//!
//! One shared [`API`] builds a peer connection per participant. Inbound tracks
//! and ICE connectivity changes are forwarded to the session's observer.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use sfu_relay_protocol::{MediaKind, SdpKind, SessionDescription};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use super::{
    expect_kind, CodecInfo, ConnectivityState, FeedbackReader, InboundTrack, OutboundAttachment,
    OutboundTrack, Result, SessionObserver, TrackInfo, TransportError, TransportProvider,
    TransportSession,
};

/// Codecs registered with the media engine. Outbound tracks must use one of
/// these capabilities verbatim or `add_track` fails with "no codecs".
struct CodecTable {
    codecs: Vec<(RTCRtpCodecParameters, RTPCodecType)>,
}

impl CodecTable {
    fn supported() -> Self {
        let codecs = vec![
            (
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: "audio/opus".to_string(),
                        clock_rate: 48000,
                        channels: 2,
                        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            ),
            (
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: "video/VP8".to_string(),
                        clock_rate: 90000,
                        channels: 0,
                        sdp_fmtp_line: String::new(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 96,
                    ..Default::default()
                },
                RTPCodecType::Video,
            ),
            (
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: "video/H264".to_string(),
                        clock_rate: 90000,
                        channels: 0,
                        // Baseline profile, level 3.1, non-interleaved packetization
                        sdp_fmtp_line:
                            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                                .to_string(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 102,
                    ..Default::default()
                },
                RTPCodecType::Video,
            ),
        ];

        Self { codecs }
    }

    fn register(&self, media_engine: &mut MediaEngine) -> webrtc::error::Result<()> {
        for (params, kind) in &self.codecs {
            media_engine.register_codec(params.clone(), *kind)?;
        }
        Ok(())
    }

    /// Exact mime + fmtp match first, then mime only, then the source's own
    /// capability
    fn resolve(&self, source: &CodecInfo) -> RTCRtpCodecCapability {
        let same_mime = |c: &RTCRtpCodecCapability| c.mime_type.eq_ignore_ascii_case(&source.mime_type);

        self.codecs
            .iter()
            .map(|(params, _)| &params.capability)
            .find(|c| same_mime(c) && c.sdp_fmtp_line == source.fmtp_line)
            .or_else(|| {
                self.codecs
                    .iter()
                    .map(|(params, _)| &params.capability)
                    .find(|c| same_mime(c))
            })
            .cloned()
            .unwrap_or_else(|| RTCRtpCodecCapability {
                mime_type: source.mime_type.clone(),
                clock_rate: source.clock_rate,
                channels: source.channels,
                sdp_fmtp_line: source.fmtp_line.clone(),
                rtcp_feedback: vec![],
            })
    }
}

/// Transport provider backed by webrtc-rs peer connections
pub struct WebRtcProvider {
    api: Arc<API>,
    codecs: Arc<CodecTable>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcProvider {
    pub fn new(
        stun_servers: Vec<String>,
        turn_servers: Vec<(String, String, String)>,
    ) -> AnyResult<Self> {
        let codecs = CodecTable::supported();

        let mut media_engine = MediaEngine::default();
        codecs.register(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let mut ice_servers = vec![];

        for stun_url in stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url],
                ..Default::default()
            });
        }

        for (url, username, credential) in turn_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![url],
                username,
                credential,
                ..Default::default()
            });
        }

        Ok(Self {
            api: Arc::new(api),
            codecs: Arc::new(codecs),
            ice_servers,
        })
    }
}

#[async_trait]
impl TransportProvider for WebRtcProvider {
    async fn open_session(
        &self,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let track_observer = observer.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let observer = track_observer.clone();

            Box::pin(async move {
                match RemoteTrack::new(track) {
                    Some(inbound) => observer.on_inbound_track(Arc::new(inbound)).await,
                    None => tracing::warn!("Ignoring track with unspecified media kind"),
                }
            })
        }));

        let state_observer = observer;
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let observer = state_observer.clone();

            Box::pin(async move {
                observer.on_connectivity_change(map_ice_state(state)).await;
            })
        }));

        Ok(Arc::new(WebRtcSession {
            pc,
            codecs: self.codecs.clone(),
        }))
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> ConnectivityState {
    match state {
        RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => ConnectivityState::New,
        RTCIceConnectionState::Checking => ConnectivityState::Checking,
        RTCIceConnectionState::Connected => ConnectivityState::Connected,
        RTCIceConnectionState::Completed => ConnectivityState::Completed,
        RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCIceConnectionState::Failed => ConnectivityState::Failed,
        RTCIceConnectionState::Closed => ConnectivityState::Closed,
    }
}

fn to_wire(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::InvalidDescription(
                "local description has no type".to_string(),
            ));
        }
    };

    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    codecs: Arc<CodecTable>,
}

impl WebRtcSession {
    async fn local_description(&self) -> Result<SessionDescription> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or(TransportError::NoLocalDescription)?;
        to_wire(desc)
    }
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        expect_kind(&offer, SdpKind::Offer)?;

        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;

        // No trickle endpoint exists, so the answer must carry every candidate
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        self.local_description().await
    }

    async fn add_outbound_track(&self, source: &TrackInfo) -> Result<OutboundAttachment> {
        let capability = self.codecs.resolve(&source.codec);

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            source.track_id.clone(),
            source.stream_id.clone(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        Ok(OutboundAttachment {
            track: Arc::new(LocalTrack { track }),
            feedback: Box::new(SenderFeedback { sender }),
        })
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        self.local_description().await
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        expect_kind(&answer, SdpKind::Answer)?;

        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn selected_remote_address(&self) -> Option<SocketAddrV4> {
        let stats = self.pc.get_stats().await;

        let remote_id = stats.reports.values().find_map(|report| match report {
            StatsReportType::CandidatePair(pair) if pair.nominated => {
                Some(pair.remote_candidate_id.clone())
            }
            _ => None,
        })?;

        match stats.reports.get(&remote_id)? {
            StatsReportType::RemoteCandidate(candidate) => {
                let ip: Ipv4Addr = candidate.ip.parse().ok()?;
                Some(SocketAddrV4::new(ip, candidate.port))
            }
            _ => None,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

struct RemoteTrack {
    track: Arc<TrackRemote>,
    info: TrackInfo,
}

impl RemoteTrack {
    fn new(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = match track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            RTPCodecType::Video => MediaKind::Video,
            RTPCodecType::Unspecified => return None,
        };

        let codec = track.codec().capability;
        let info = TrackInfo {
            kind,
            track_id: track.id().to_string(),
            stream_id: track.stream_id().to_string(),
            codec: CodecInfo {
                mime_type: codec.mime_type,
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                fmtp_line: codec.sdp_fmtp_line,
            },
        };

        Some(Self { track, info })
    }
}

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let (packet, _attributes) = self.track.read_rtp().await?;
        Ok(packet.marshal_to(buf)?)
    }
}

struct LocalTrack {
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl OutboundTrack for LocalTrack {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        Ok(self.track.write(packet).await?)
    }
}

struct SenderFeedback {
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl FeedbackReader for SenderFeedback {
    async fn read_feedback(&self, buf: &mut [u8]) -> Result<()> {
        self.sender.read(buf).await?;
        Ok(())
    }
}
