//! SFU (Selective Forwarding Unit) core
//!
//! Every participant sends its audio/video to the relay once, and the relay
//! forwards each RTP packet unchanged to every other participant. Outbound
//! tracks are created lazily, and each creation queues a renegotiation
//! offer that the participant collects by polling.

mod mailbox;
mod participant;
mod registry;
mod session;
mod track_router;

pub use mailbox::RenegotiationMailbox;
pub use participant::{Participant, TrackTables};
pub use registry::{PeerRegistry, RegistryError};
pub use session::{SessionError, SessionRouter, DEFAULT_RENEGOTIATE_TIMEOUT};
pub use track_router::TrackRouter;
