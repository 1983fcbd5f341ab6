//! Forwarding and renegotiation through the session router
//!
//! Run with: cargo test -p sfu-relay-server --test fanout

mod common;

use common::{eventually, offer, FakeProvider};
use sfu_relay_protocol::{MediaKind, PeerId, SdpKind, SessionState};
use sfu_relay_server::sfu::SessionRouter;
use std::sync::Arc;
use std::time::Duration;

async fn setup(peers: usize) -> (Arc<FakeProvider>, Arc<SessionRouter>, Vec<PeerId>) {
    let provider = FakeProvider::new();
    let router = SessionRouter::new(provider.clone(), None, Duration::from_millis(100));

    let mut ids = vec![];
    for _ in 0..peers {
        let (peer_id, answer) = router.negotiate(offer()).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        ids.push(peer_id);
    }

    (provider, router, ids)
}

#[tokio::test]
async fn test_packet_reaches_every_other_peer_once() {
    let (provider, router, _ids) = setup(3).await;
    let (p1, p2, p3) = (provider.session(0), provider.session(1), provider.session(2));

    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"X".to_vec()).await.unwrap();

    assert!(
        eventually(|| {
            p2.received(MediaKind::Audio).len() == 1 && p3.received(MediaKind::Audio).len() == 1
        })
        .await
    );
    assert_eq!(p2.received(MediaKind::Audio), vec![b"X".to_vec()]);
    assert_eq!(p3.received(MediaKind::Audio), vec![b"X".to_vec()]);

    // The publisher never gets its own media back
    assert_eq!(p1.outbound_count(), 0);
    assert_eq!(router.active_routers().await, 1);
}

#[tokio::test]
async fn test_packets_keep_their_order() {
    let (provider, _router, _ids) = setup(2).await;
    let (p1, p2) = (provider.session(0), provider.session(1));

    let video = p1.emit_track(MediaKind::Video).await;
    for i in 0..20u8 {
        video.send(vec![i; 4]).await.unwrap();
    }

    assert!(eventually(|| p2.received(MediaKind::Video).len() == 20).await);
    let expected: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 4]).collect();
    assert_eq!(p2.received(MediaKind::Video), expected);

    // One outbound path per kind, however many packets flow
    assert_eq!(p2.outbound(MediaKind::Video).len(), 1);
}

#[tokio::test]
async fn test_first_outbound_track_deposits_one_offer() {
    let (provider, router, ids) = setup(2).await;
    let (p1, p2) = (provider.session(0), provider.session(1));

    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"first".to_vec()).await.unwrap();
    audio.send(b"second".to_vec()).await.unwrap();
    assert!(eventually(|| p2.received(MediaKind::Audio).len() == 2).await);

    let pending = router.poll_renegotiation(&ids[1]).await.unwrap();
    let pending = pending.expect("offer should be waiting");
    assert_eq!(pending.kind, SdpKind::Offer);
    assert_eq!(p2.offers_created(), 1);

    // Taken once; the second packet did not renegotiate again
    assert!(router.poll_renegotiation(&ids[1]).await.unwrap().is_none());

    // Nothing pending for the publisher
    assert!(router.poll_renegotiation(&ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_late_joiner_is_discovered_on_next_packet() {
    let (provider, router, _ids) = setup(2).await;
    let p1 = provider.session(0);

    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"before".to_vec()).await.unwrap();
    assert!(eventually(|| provider.session(1).received(MediaKind::Audio).len() == 1).await);

    router.negotiate(offer()).await.unwrap();
    let late = provider.session(2);

    audio.send(b"after".to_vec()).await.unwrap();
    assert!(eventually(|| late.received(MediaKind::Audio).len() == 1).await);
    assert_eq!(late.received(MediaKind::Audio), vec![b"after".to_vec()]);
}

#[tokio::test]
async fn test_failed_write_does_not_stop_other_destinations() {
    let (provider, router, _ids) = setup(3).await;
    let (p1, p2, p3) = (provider.session(0), provider.session(1), provider.session(2));
    p2.fail_writes(true);

    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"one".to_vec()).await.unwrap();
    audio.send(b"two".to_vec()).await.unwrap();

    assert!(eventually(|| p3.received(MediaKind::Audio).len() == 2).await);
    assert!(p2.received(MediaKind::Audio).is_empty());
    assert_eq!(router.active_routers().await, 1);
}

#[tokio::test]
async fn test_read_error_ends_forwarding() {
    let (provider, router, _ids) = setup(2).await;
    let p1 = provider.session(0);

    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"X".to_vec()).await.unwrap();
    assert!(eventually(|| provider.session(1).received(MediaKind::Audio).len() == 1).await);

    drop(audio);

    let mut stopped = false;
    for _ in 0..200 {
        if router.active_routers().await == 0 {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stopped, "router should stop after the source closes");
}

#[tokio::test]
async fn test_closed_source_is_no_longer_reported_inbound() {
    let (provider, router, ids) = setup(2).await;

    let audio = provider.session(0).emit_track(MediaKind::Audio).await;
    let _video = provider.session(0).emit_track(MediaKind::Video).await;
    audio.send(b"X".to_vec()).await.unwrap();
    assert!(eventually(|| provider.session(1).received(MediaKind::Audio).len() == 1).await);

    drop(audio);

    let mut inbound = vec![];
    for _ in 0..200 {
        let peers = router.peers().await;
        inbound = peers
            .into_iter()
            .find(|p| p.peer_id == ids[0])
            .unwrap()
            .inbound;
        if inbound == vec![MediaKind::Video] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The live video track is still reported; the closed audio one is gone
    assert_eq!(inbound, vec![MediaKind::Video]);
    assert_eq!(router.active_routers().await, 1);

    // The subscriber keeps the outbound path it was given
    let subscriber = router.lookup(&ids[1]).await.unwrap();
    assert_eq!(subscriber.view().await.outbound, vec![MediaKind::Audio]);
}

#[tokio::test]
async fn test_peers_reflect_tracks_and_state() {
    let (provider, router, ids) = setup(2).await;
    let p1 = provider.session(0);

    p1.emit_state(sfu_relay_server::transport::ConnectivityState::Connected)
        .await;
    let audio = p1.emit_track(MediaKind::Audio).await;
    audio.send(b"X".to_vec()).await.unwrap();
    assert!(eventually(|| provider.session(1).received(MediaKind::Audio).len() == 1).await);

    let peers = router.peers().await;
    assert_eq!(peers.len(), 2);

    let publisher = peers.iter().find(|p| p.peer_id == ids[0]).unwrap();
    assert_eq!(publisher.state, SessionState::Connected);
    assert_eq!(publisher.inbound, vec![MediaKind::Audio]);
    assert!(publisher.outbound.is_empty());

    let subscriber = peers.iter().find(|p| p.peer_id == ids[1]).unwrap();
    assert_eq!(subscriber.state, SessionState::Negotiating);
    assert_eq!(subscriber.outbound, vec![MediaKind::Audio]);
}

#[tokio::test]
async fn test_shutdown_stops_routers_and_closes_sessions() {
    let (provider, router, _ids) = setup(2).await;
    let _audio = provider.session(0).emit_track(MediaKind::Audio).await;
    assert_eq!(router.active_routers().await, 1);

    router.shutdown().await;

    assert_eq!(router.active_routers().await, 0);
    for i in 0..provider.session_count() {
        assert!(provider.session(i).is_closed());
    }
}
