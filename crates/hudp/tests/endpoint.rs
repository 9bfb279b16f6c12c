//! Two real Endpoints talking over loopback UDP, exercising the handshake,
//! delivery ordering, and teardown scenarios end to end.

use bytes::Bytes;
use hudp::{DeliveryChannel, Endpoint, EndpointConfig, Received, SendError};
use std::net::SocketAddr;
use std::time::Duration;

async fn bind_pair(
    config: EndpointConfig,
) -> (
    std::sync::Arc<Endpoint>,
    tokio::sync::mpsc::UnboundedReceiver<Received>,
    std::sync::Arc<Endpoint>,
    tokio::sync::mpsc::UnboundedReceiver<Received>,
) {
    let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (a, a_rx) = Endpoint::bind(local, None, config).await.unwrap();
    let (b, b_rx) = Endpoint::bind(local, None, config).await.unwrap();

    a.set_peer(b.local_addr().unwrap());
    b.set_peer(a.local_addr().unwrap());

    (a, a_rx, b, b_rx)
}

async fn recv_timeout(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("channel closed unexpectedly")
}

#[tokio::test]
async fn registration_gates_reliable_sends() {
    let (a, _a_rx, b, _b_rx) = bind_pair(EndpointConfig::default()).await;

    let before = a.send_reliable(Bytes::from_static(b"too early")).await;
    assert!(matches!(before, Err(SendError::NotRegistered(_))));

    a.register_peer().await.expect("registration should succeed");

    let after = a.send_reliable(Bytes::from_static(b"now allowed")).await;
    assert!(after.is_ok());

    let _ = b; // keep b's background tasks alive for the duration of the test
}

#[tokio::test]
async fn clean_exchange_delivers_reliable_frames_in_order() {
    let (a, _a_rx, b, mut b_rx) = bind_pair(EndpointConfig::default()).await;
    a.register_peer().await.expect("registration should succeed");

    for i in 0u8..5 {
        a.send_reliable(Bytes::copy_from_slice(&[i])).await.unwrap();
    }

    for expected in 0u8..5 {
        let received = recv_timeout(&mut b_rx).await;
        assert_eq!(received.channel, DeliveryChannel::Reliable);
        assert_eq!(received.payload.as_ref(), &[expected]);
    }
}

#[tokio::test]
async fn unreliable_delivery_does_not_require_registration() {
    let (a, _a_rx, _b, mut b_rx) = bind_pair(EndpointConfig::default()).await;

    a.send_unreliable(Bytes::from_static(b"ping")).await.unwrap();

    let received = recv_timeout(&mut b_rx).await;
    assert_eq!(received.channel, DeliveryChannel::Unreliable);
    assert_eq!(received.payload.as_ref(), b"ping");
}

#[tokio::test]
async fn graceful_deregister_revokes_the_peers_registration() {
    let (a, _a_rx, b, _b_rx) = bind_pair(EndpointConfig::default()).await;
    a.register_peer().await.expect("registration should succeed");
    b.register_peer().await.expect("registration should succeed");

    a.stop().await.expect("deregister handshake should succeed");

    // Give b's reader task a moment to process the DEREGISTER frame.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let peer_a = a.local_addr().unwrap();
    let result = b.send_reliable(Bytes::from_static(b"after dereg")).await;
    assert!(matches!(result, Err(SendError::NotRegistered(addr)) if addr == peer_a));
}

#[tokio::test]
async fn metrics_count_sent_and_received_frames() {
    let (a, _a_rx, b, mut b_rx) = bind_pair(EndpointConfig::default()).await;
    a.register_peer().await.expect("registration should succeed");
    a.send_reliable(Bytes::from_static(b"counted")).await.unwrap();
    let _ = recv_timeout(&mut b_rx).await;

    let a_metrics = a.metrics();
    assert_eq!(a_metrics.sent_reg, 1);
    assert_eq!(a_metrics.reg_acks_recv, 1);
    assert_eq!(a_metrics.sent_reliable, 1);

    let b_metrics = b.metrics();
    assert_eq!(b_metrics.recv_reg, 1);
    assert_eq!(b_metrics.recv_reliable, 1);
}
