//! One connected party and the tracks the relay keeps for it

use sfu_relay_protocol::{MediaKind, PeerId, PeerView, SessionState};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::RenegotiationMailbox;
use crate::transport::{InboundTrack, OutboundTrack, TransportSession};

/// Per-kind track maps, guarded together by the participant's lock
#[derive(Default)]
pub struct TrackTables {
    /// Outbound paths created by the relay towards this participant
    pub outbound: HashMap<MediaKind, Arc<dyn OutboundTrack>>,
    /// Inbound paths owned by the transport. Dangling once the provider
    /// drops the track.
    pub inbound: HashMap<MediaKind, Weak<dyn InboundTrack>>,
}

pub struct Participant {
    id: PeerId,
    session: Arc<dyn TransportSession>,
    tracks: Mutex<TrackTables>,
    mailbox: RenegotiationMailbox,
    state: RwLock<SessionState>,
}

impl Participant {
    pub fn new(id: PeerId, session: Arc<dyn TransportSession>) -> Self {
        Self {
            id,
            session,
            tracks: Mutex::new(TrackTables::default()),
            mailbox: RenegotiationMailbox::new(),
            state: RwLock::new(SessionState::Created),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn session(&self) -> &Arc<dyn TransportSession> {
        &self.session
    }

    pub fn mailbox(&self) -> &RenegotiationMailbox {
        &self.mailbox
    }

    /// Lock the track maps. Hold only for map inspection, track creation and
    /// offer creation, never across a packet write.
    pub async fn tracks(&self) -> MutexGuard<'_, TrackTables> {
        self.tracks.lock().await
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: SessionState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::debug!("[{}] Session state {:?} -> {:?}", self.id, *current, state);
            *current = state;
        }
    }

    /// Record an inbound track without taking ownership of it
    pub async fn register_inbound(&self, kind: MediaKind, track: &Arc<dyn InboundTrack>) {
        self.tracks().await.inbound.insert(kind, Arc::downgrade(track));
    }

    pub async fn view(&self) -> PeerView {
        let state = self.state().await;
        let tracks = self.tracks().await;

        let mut inbound: Vec<MediaKind> = tracks
            .inbound
            .iter()
            .filter(|(_, track)| track.strong_count() > 0)
            .map(|(kind, _)| *kind)
            .collect();
        inbound.sort();

        let mut outbound: Vec<MediaKind> = tracks.outbound.keys().copied().collect();
        outbound.sort();

        PeerView {
            peer_id: self.id.clone(),
            state,
            inbound,
            outbound,
        }
    }
}
