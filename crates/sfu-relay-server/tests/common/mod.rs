//! In-process transport used by the integration tests
//!
//! Sessions never touch the network. Inbound tracks are fed through channels
//! and outbound tracks record what the relay wrote to them.

#![allow(dead_code)]

use async_trait::async_trait;
use sfu_relay_protocol::{MediaKind, SdpKind, SessionDescription};
use sfu_relay_server::transport::{
    expect_kind, CodecInfo, ConnectivityState, FeedbackReader, InboundTrack, OutboundAttachment,
    OutboundTrack, Result, SessionObserver, TrackInfo, TransportError, TransportProvider,
    TransportSession,
};
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct FakeProvider {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions in the order they were opened
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportProvider for FakeProvider {
    async fn open_session(
        &self,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>> {
        let session = Arc::new(FakeSession::new(observer));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct FakeSession {
    observer: Arc<dyn SessionObserver>,
    offers: AtomicUsize,
    selected: Mutex<Option<SocketAddrV4>>,
    fail_writes: Arc<AtomicBool>,
    outbound: Mutex<Vec<(MediaKind, Arc<FakeOutbound>)>>,
    answers: Mutex<Vec<SessionDescription>>,
    closed: AtomicBool,
}

impl FakeSession {
    fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            observer,
            offers: AtomicUsize::new(0),
            selected: Mutex::new(None),
            fail_writes: Arc::new(AtomicBool::new(false)),
            outbound: Mutex::new(vec![]),
            answers: Mutex::new(vec![]),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_selected_address(&self, addr: SocketAddrV4) {
        *self.selected.lock().unwrap() = Some(addr);
    }

    /// Make every write to this session's outbound tracks fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Publish a new inbound track; packets sent on the returned channel are
    /// read by the relay. Dropping the sender ends the track.
    pub async fn emit_track(&self, kind: MediaKind) -> mpsc::Sender<Vec<u8>> {
        let (tx, rx) = mpsc::channel(64);
        let track = Arc::new(FakeInbound {
            info: track_info(kind),
            rx: tokio::sync::Mutex::new(rx),
        });
        self.observer.on_inbound_track(track).await;
        tx
    }

    pub async fn emit_state(&self, state: ConnectivityState) {
        self.observer.on_connectivity_change(state).await;
    }

    pub fn outbound(&self, kind: MediaKind) -> Vec<Arc<FakeOutbound>> {
        self.outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, track)| track.clone())
            .collect()
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.lock().unwrap().len()
    }

    /// Packets written to the outbound tracks of `kind`, in order
    pub fn received(&self, kind: MediaKind) -> Vec<Vec<u8>> {
        self.outbound(kind)
            .iter()
            .flat_map(|track| track.packets())
            .collect()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.answers.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        expect_kind(&offer, SdpKind::Offer)?;
        if offer.sdp.trim().is_empty() {
            return Err(TransportError::InvalidDescription("empty sdp".to_string()));
        }
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn add_outbound_track(&self, source: &TrackInfo) -> Result<OutboundAttachment> {
        let track = Arc::new(FakeOutbound {
            packets: Mutex::new(vec![]),
            fail: self.fail_writes.clone(),
        });
        self.outbound
            .lock()
            .unwrap()
            .push((source.kind, track.clone()));

        Ok(OutboundAttachment {
            track,
            feedback: Box::new(ClosedFeedback),
        })
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("v=0 fake-offer-{n}")))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        expect_kind(&answer, SdpKind::Answer)?;
        self.answers.lock().unwrap().push(answer);
        Ok(())
    }

    async fn selected_remote_address(&self) -> Option<SocketAddrV4> {
        *self.selected.lock().unwrap()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeInbound {
    info: TrackInfo,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

#[async_trait]
impl InboundTrack for FakeInbound {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let packet = self.rx.lock().await.recv().await.ok_or(TransportError::Closed)?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }
}

pub struct FakeOutbound {
    packets: Mutex<Vec<Vec<u8>>>,
    fail: Arc<AtomicBool>,
}

impl FakeOutbound {
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.packets.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundTrack for FakeOutbound {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.packets.lock().unwrap().push(packet.to_vec());
        Ok(packet.len())
    }
}

struct ClosedFeedback;

#[async_trait]
impl FeedbackReader for ClosedFeedback {
    async fn read_feedback(&self, _buf: &mut [u8]) -> Result<()> {
        Err(TransportError::Closed)
    }
}

pub fn track_info(kind: MediaKind) -> TrackInfo {
    let codec = match kind {
        MediaKind::Audio => CodecInfo {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        },
        MediaKind::Video => CodecInfo {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            fmtp_line: String::new(),
        },
    };

    TrackInfo {
        kind,
        track_id: format!("{kind}-track"),
        stream_id: "stream".to_string(),
        codec,
    }
}

pub fn offer() -> SessionDescription {
    SessionDescription::offer("v=0 fake-offer")
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
