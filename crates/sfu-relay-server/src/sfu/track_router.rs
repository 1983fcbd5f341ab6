//! Track Router for RTP forwarding
//!
//! Routes RTP packets from one participant's inbound track to the matching
//! outbound track of every other participant, creating that outbound track
//! (and renegotiating) the first time a destination is seen.

use sfu_relay_protocol::{MediaKind, PeerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use super::{Participant, PeerRegistry};
use crate::transport::{FeedbackReader, InboundTrack, OutboundTrack, MTU};

/// Forwards a single inbound track for as long as it can be read
pub struct TrackRouter {
    /// The source track from the publisher
    source: Arc<dyn InboundTrack>,
    /// ID of the participant publishing this track
    publisher_id: PeerId,
    /// Where destinations are discovered, once per packet
    registry: Arc<PeerRegistry>,
    /// Whether the router is active
    active: AtomicBool,
    stop: Notify,
}

impl TrackRouter {
    pub fn new(
        source: Arc<dyn InboundTrack>,
        publisher_id: PeerId,
        registry: Arc<PeerRegistry>,
    ) -> Self {
        Self {
            source,
            publisher_id,
            registry,
            active: AtomicBool::new(true),
            stop: Notify::new(),
        }
    }

    pub fn publisher_id(&self) -> &PeerId {
        &self.publisher_id
    }

    pub fn kind(&self) -> MediaKind {
        self.source.info().kind
    }

    pub fn track_id(&self) -> &str {
        &self.source.info().track_id
    }

    /// Run the forwarding loop until the source fails or [`stop`](Self::stop)
    /// is called. A read error ends the loop for good.
    pub async fn start_forwarding(self: Arc<Self>) {
        tracing::info!(
            "Starting RTP forwarding for {} track {} from peer {}",
            self.kind(),
            self.track_id(),
            self.publisher_id
        );

        let mut buf = vec![0u8; MTU];
        let mut packet_count = 0u64;

        loop {
            if !self.active.load(Ordering::Acquire) {
                tracing::info!("Track router {} stopped", self.track_id());
                break;
            }

            let read = tokio::select! {
                biased;
                _ = self.stop.notified() => continue,
                read = self.source.read_packet(&mut buf) => read,
            };

            match read {
                Ok(n) => {
                    packet_count += 1;
                    self.forward_packet(&buf[..n], packet_count).await;
                }
                Err(e) => {
                    tracing::info!(
                        "[{}] Error reading {} track {}: {}",
                        self.publisher_id,
                        self.kind(),
                        self.track_id(),
                        e
                    );
                    break;
                }
            }
        }

        self.active.store(false, Ordering::Release);
    }

    /// Deliver one packet to every other participant before returning
    async fn forward_packet(&self, packet: &[u8], packet_count: u64) {
        let destinations = self.registry.snapshot().await;

        if packet_count % 100 == 1 {
            tracing::debug!(
                "Forwarding packet {} from {} ({} bytes) to {} peers",
                packet_count,
                self.publisher_id,
                packet.len(),
                destinations.len().saturating_sub(1)
            );
        }

        for destination in destinations {
            if destination.id() == &self.publisher_id {
                continue;
            }

            let Some(local_track) = self.outbound_for(&destination).await else {
                continue;
            };

            if let Err(e) = local_track.write_packet(packet).await {
                tracing::warn!("Failed to forward RTP to peer {}: {}", destination.id(), e);
            }
        }
    }

    /// The destination's outbound track of this kind, created on first use.
    /// Creating one triggers a renegotiation offer into the destination's
    /// mailbox while its track lock is still held.
    async fn outbound_for(&self, destination: &Participant) -> Option<Arc<dyn OutboundTrack>> {
        let kind = self.kind();
        let mut tracks = destination.tracks().await;

        if let Some(track) = tracks.outbound.get(&kind) {
            return Some(track.clone());
        }

        let attachment = match destination
            .session()
            .add_outbound_track(self.source.info())
            .await
        {
            Ok(attachment) => attachment,
            Err(e) => {
                tracing::warn!(
                    "Failed to add {} track to peer {}: {}",
                    kind,
                    destination.id(),
                    e
                );
                return None;
            }
        };

        spawn_feedback_drain(destination.id().clone(), kind, attachment.feedback);
        tracks.outbound.insert(kind, attachment.track.clone());

        tracing::info!(
            "Added {} track from {} to peer {}",
            kind,
            self.publisher_id,
            destination.id()
        );

        match destination.session().create_local_offer().await {
            Ok(offer) => {
                if !destination.mailbox().deposit(offer) {
                    tracing::debug!(
                        "[{}] Renegotiation offer already pending, dropping new one",
                        destination.id()
                    );
                }
            }
            Err(e) => tracing::warn!(
                "Failed to create renegotiation offer for peer {}: {}",
                destination.id(),
                e
            ),
        }

        Some(attachment.track)
    }

    /// Stop the forwarding loop, interrupting a pending read
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.stop.notify_one();
        tracing::info!("Track router {} marked for stop", self.track_id());
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Outbound tracks stall unless their feedback is read. The drain ends
/// silently on the first error.
fn spawn_feedback_drain(peer: PeerId, kind: MediaKind, feedback: Box<dyn FeedbackReader>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MTU];
        while feedback.read_feedback(&mut buf).await.is_ok() {}
        tracing::debug!("[{}] Feedback channel for {} track closed", peer, kind);
    });
}
