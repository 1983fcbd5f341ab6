use serde::{Deserialize, Serialize};

use crate::types::{MediaKind, PeerId, SessionDescription, SessionState};

/// Response to `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    /// The relay's answer
    pub sdp: SessionDescription,
    /// Identity to use on `/renegotiate/{peer_id}` and `/answer/{peer_id}`
    pub peer_id: PeerId,
}

/// Error body returned on any non-2xx status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Snapshot of one participant for `GET /peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub peer_id: PeerId,
    pub state: SessionState,
    /// Kinds with a live inbound path
    pub inbound: Vec<MediaKind>,
    /// Kinds with an outbound path created by the relay
    pub outbound: Vec<MediaKind>,
}

/// One occupied slot of the kernel participant registry for `GET /registry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySlotView {
    pub index: u32,
    pub address: String,
    pub port: u16,
}
