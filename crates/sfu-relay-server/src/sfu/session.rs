//! SFU Session Router
//!
//! Owns the participant registry and ties transport sessions, track routers
//! and the kernel registry together.

use sfu_relay_protocol::{MediaKind, PeerId, PeerView, SessionDescription, SessionState};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use super::{Participant, PeerRegistry, RegistryError, TrackRouter};
use crate::kernel::KernelRegistrySync;
use crate::transport::{
    ConnectivityState, InboundTrack, SessionObserver, TransportError, TransportProvider,
};

/// How long `GET /renegotiate/{peer_id}` waits for an offer by default
pub const DEFAULT_RENEGOTIATE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Forwarding tasks are keyed by the path they serve
type RouterKey = (PeerId, MediaKind, String);

pub struct SessionRouter {
    registry: Arc<PeerRegistry>,
    provider: Arc<dyn TransportProvider>,
    kernel: Option<Arc<KernelRegistrySync>>,
    routers: RwLock<HashMap<RouterKey, Arc<TrackRouter>>>,
    renegotiate_timeout: Duration,
}

impl SessionRouter {
    pub fn new(
        provider: Arc<dyn TransportProvider>,
        kernel: Option<Arc<KernelRegistrySync>>,
        renegotiate_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(PeerRegistry::new()),
            provider,
            kernel,
            routers: RwLock::new(HashMap::new()),
            renegotiate_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn kernel(&self) -> Option<&Arc<KernelRegistrySync>> {
        self.kernel.as_ref()
    }

    /// Open a transport session under a fresh identity and register it.
    pub async fn open_participant(self: &Arc<Self>) -> Result<Arc<Participant>, SessionError> {
        let peer_id = PeerId::generate();

        let observer = Arc::new(PeerObserver {
            peer_id: peer_id.clone(),
            router: Arc::downgrade(self),
        });
        let session = self.provider.open_session(observer).await?;

        Ok(self.registry.create(peer_id, session).await?)
    }

    /// Answer a participant's initial offer. On failure the participant stays
    /// registered.
    pub async fn accept_offer(
        &self,
        participant: &Participant,
        offer: SessionDescription,
    ) -> Result<SessionDescription, SessionError> {
        participant.set_state(SessionState::Negotiating).await;

        let answer = participant.session().accept_offer(offer).await?;
        tracing::info!("Sent answer to peer {}", participant.id());
        Ok(answer)
    }

    /// [`open_participant`](Self::open_participant) followed by
    /// [`accept_offer`](Self::accept_offer)
    pub async fn negotiate(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<(PeerId, SessionDescription), SessionError> {
        let participant = self.open_participant().await?;
        let answer = self.accept_offer(&participant, offer).await?;
        Ok((participant.id().clone(), answer))
    }

    pub async fn lookup(&self, peer_id: &PeerId) -> Result<Arc<Participant>, RegistryError> {
        self.registry.lookup(peer_id).await
    }

    /// Take the participant's pending offer, waiting up to the configured
    /// timeout. `Ok(None)` means nothing arrived in time.
    pub async fn poll_renegotiation(
        &self,
        peer_id: &PeerId,
    ) -> Result<Option<SessionDescription>, RegistryError> {
        let participant = self.registry.lookup(peer_id).await?;
        Ok(participant.mailbox().await_offer(self.renegotiate_timeout).await)
    }

    /// Apply the participant's answer to the last renegotiation offer
    pub async fn apply_answer(
        &self,
        participant: &Participant,
        answer: SessionDescription,
    ) -> Result<(), SessionError> {
        participant.session().apply_answer(answer).await?;
        tracing::info!("Applied renegotiation answer from peer {}", participant.id());
        Ok(())
    }

    pub async fn peers(&self) -> Vec<PeerView> {
        let mut views = Vec::new();
        for participant in self.registry.snapshot().await {
            views.push(participant.view().await);
        }
        views.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        views
    }

    pub async fn active_routers(&self) -> usize {
        self.routers
            .read()
            .await
            .values()
            .filter(|r| r.is_active())
            .count()
    }

    /// Stop every forwarding task and close every transport session
    pub async fn shutdown(&self) {
        for router in self.routers.write().await.drain().map(|(_, r)| r) {
            router.stop();
        }

        for participant in self.registry.snapshot().await {
            if let Err(e) = participant.session().close().await {
                tracing::warn!("Error closing session for peer {}: {}", participant.id(), e);
            }
        }

        if let Some(kernel) = &self.kernel {
            kernel.flush().await;
        }

        tracing::info!("Session router shut down");
    }

    async fn handle_inbound_track(
        self: &Arc<Self>,
        peer_id: &PeerId,
        track: Arc<dyn InboundTrack>,
    ) {
        let info = track.info().clone();
        tracing::info!(
            "[{}] Received {} track {} (stream {}, codec {})",
            peer_id,
            info.kind,
            info.track_id,
            info.stream_id,
            info.codec.mime_type
        );

        let participant = match self.registry.lookup(peer_id).await {
            Ok(participant) => participant,
            Err(e) => {
                tracing::warn!("Dropping inbound track: {}", e);
                return;
            }
        };
        participant.register_inbound(info.kind, &track).await;

        let router = Arc::new(TrackRouter::new(
            track,
            peer_id.clone(),
            self.registry.clone(),
        ));

        let key = (peer_id.clone(), info.kind, info.track_id);
        self.routers.write().await.insert(key.clone(), router.clone());

        let session_router = Arc::downgrade(self);
        tokio::spawn(async move {
            router.clone().start_forwarding().await;
            if let Some(session_router) = session_router.upgrade() {
                session_router.retire_router(&key, &router).await;
            }
        });
    }

    /// Forget a router whose loop has ended. Once the last reference goes the
    /// source track is released and the publisher's inbound handle dangles.
    async fn retire_router(&self, key: &RouterKey, router: &Arc<TrackRouter>) {
        let mut routers = self.routers.write().await;
        if routers.get(key).is_some_and(|current| Arc::ptr_eq(current, router)) {
            routers.remove(key);
        }
    }

    async fn handle_connectivity_change(&self, peer_id: &PeerId, state: ConnectivityState) {
        tracing::info!("[{}] ICE state: {:?}", peer_id, state);

        let participant = match self.registry.lookup(peer_id).await {
            Ok(participant) => participant,
            Err(e) => {
                tracing::warn!("Ignoring connectivity change: {}", e);
                return;
            }
        };

        match state {
            ConnectivityState::Connected => participant.set_state(SessionState::Connected).await,
            ConnectivityState::Disconnected => {
                participant.set_state(SessionState::Disconnected).await
            }
            _ => {}
        }

        // Handled inline so transitions stay ordered; table writes themselves
        // are queued and never awaited here
        if let Some(kernel) = &self.kernel {
            kernel
                .on_connectivity_change(participant.id(), participant.session().as_ref(), state)
                .await;
        }
    }
}

/// Provider callbacks for one participant. Holds the router weakly since the
/// router transitively owns the session that holds this observer.
struct PeerObserver {
    peer_id: PeerId,
    router: Weak<SessionRouter>,
}

#[async_trait::async_trait]
impl SessionObserver for PeerObserver {
    async fn on_inbound_track(&self, track: Arc<dyn InboundTrack>) {
        if let Some(router) = self.router.upgrade() {
            router.handle_inbound_track(&self.peer_id, track).await;
        }
    }

    async fn on_connectivity_change(&self, state: ConnectivityState) {
        if let Some(router) = self.router.upgrade() {
            router.handle_connectivity_change(&self.peer_id, state).await;
        }
    }
}
