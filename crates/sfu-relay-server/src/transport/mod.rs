//! Media transport seam
//!
//! The relay never touches ICE, DTLS or SRTP directly. It drives a participant's
//! session through these traits, and the provider reports inbound tracks and
//! connectivity changes back through a [`SessionObserver`].

pub mod webrtc_provider;

use async_trait::async_trait;
use sfu_relay_protocol::{MediaKind, SdpKind, SessionDescription};
use std::net::SocketAddrV4;
use std::sync::Arc;
use thiserror::Error;

pub use webrtc_provider::WebRtcProvider;

/// Largest RTP packet read or forwarded in one call
pub const MTU: usize = 1500;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("expected a session description of type {expected}, got {actual}")]
    UnexpectedSdpKind { expected: SdpKind, actual: SdpKind },

    #[error("no local description available")]
    NoLocalDescription,

    #[error("track closed")]
    Closed,

    #[error(transparent)]
    Rtc(#[from] webrtc::Error),

    #[error("packet marshal failed: {0}")]
    Marshal(#[from] webrtc::util::Error),
}

impl TransportError {
    /// True when the remote side sent something unusable, as opposed to the
    /// local stack failing to apply it
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidDescription(_) | TransportError::UnexpectedSdpKind { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Connectivity of the underlying ICE transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Codec parameters carried over from an inbound track to its mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp_line: String,
}

/// Identity and codec of an inbound track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: MediaKind,
    pub track_id: String,
    pub stream_id: String,
    pub codec: CodecInfo,
}

/// A media path flowing into the relay. Owned by the provider; the relay
/// reads it for as long as reads succeed.
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn info(&self) -> &TrackInfo;

    /// Read one RTP packet into `buf`, returning its length
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize>;
}

/// A media path flowing out of the relay towards one participant
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    /// Write one RTP packet exactly as received
    async fn write_packet(&self, packet: &[u8]) -> Result<usize>;
}

/// Receiver-side feedback (RTCP) for an outbound track
#[async_trait]
pub trait FeedbackReader: Send + Sync {
    async fn read_feedback(&self, buf: &mut [u8]) -> Result<()>;
}

/// Everything produced when an outbound track is attached to a session
pub struct OutboundAttachment {
    pub track: Arc<dyn OutboundTrack>,
    /// Must be drained for the outbound path to stay usable
    pub feedback: Box<dyn FeedbackReader>,
}

/// One participant's transport session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Apply the remote offer, create and apply the answer, and return the
    /// session's local description
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    /// Attach a new outbound track mirroring `source`
    async fn add_outbound_track(&self, source: &TrackInfo) -> Result<OutboundAttachment>;

    /// Create and apply a fresh local offer, returning the local description
    async fn create_local_offer(&self) -> Result<SessionDescription>;

    /// Apply the remote answer to an earlier local offer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    /// Remote address of the selected candidate pair, if one is selected and
    /// it is IPv4
    async fn selected_remote_address(&self) -> Option<SocketAddrV4>;

    async fn close(&self) -> Result<()>;
}

/// Callbacks a provider invokes for one session. Invocations may run
/// concurrently with each other and with anything else in the relay.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_inbound_track(&self, track: Arc<dyn InboundTrack>);

    async fn on_connectivity_change(&self, state: ConnectivityState);
}

/// Factory for transport sessions
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn open_session(
        &self,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>>;
}

/// Reject a description whose `type` is not the one the exchange expects
pub fn expect_kind(desc: &SessionDescription, expected: SdpKind) -> Result<()> {
    if desc.kind == expected {
        Ok(())
    } else {
        Err(TransportError::UnexpectedSdpKind {
            expected,
            actual: desc.kind,
        })
    }
}
