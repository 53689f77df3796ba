//! Transport lifecycle over real loopback sockets: pool and cooperative
//! modes, the protocol-state gate, option toggles, capacity bounds, and
//! shutdown.

use rpc_transport::config::TransportConfig;
use rpc_transport::core::packet::{kind, Packet};
use rpc_transport::error::TransportError;
use rpc_transport::protocol::state::ProtocolState;
use rpc_transport::transport::{
    EndpointId, EventKind, Transport, TransportOption, TransportOptionKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn pooled_config() -> TransportConfig {
    TransportConfig::default_with_overrides(|c| {
        c.worker_tasks = 2;
    })
}

fn cooperative_config() -> TransportConfig {
    TransportConfig::default_with_overrides(|c| {
        c.worker_tasks = 0;
    })
}

/// Walk an endpoint through the legal chain to `Ready`.
fn advance_to_ready(transport: &Transport, id: EndpointId) {
    transport
        .set_protocol_state(id, ProtocolState::Auth)
        .unwrap();
    transport
        .set_protocol_state(id, ProtocolState::Ready)
        .unwrap();
}

#[tokio::test]
async fn cooperative_mode_has_no_workers_and_never_blocks() {
    let transport = Transport::create(cooperative_config()).unwrap();
    assert_eq!(transport.worker_count(), 0);

    let start = Instant::now();
    let processed = transport.process_events(Duration::ZERO).await.unwrap();
    assert_eq!(processed, 0);
    assert!(start.elapsed() < Duration::from_millis(100));

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn pooled_mode_rejects_cooperative_draining() {
    let transport = Transport::create(pooled_config()).unwrap();
    assert_eq!(transport.worker_count(), 2);
    assert!(matches!(
        transport.process_events(Duration::ZERO).await,
        Err(TransportError::UnsupportedOperation(_))
    ));
    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn tls_toggle_without_material_fails_and_stays_disabled() {
    let transport = Transport::create(cooperative_config()).unwrap();

    let result = transport.set_option(TransportOption::TlsEnabled(true));
    assert!(matches!(
        result,
        Err(TransportError::InitializationFailed(_))
    ));
    match transport.get_option(TransportOptionKind::TlsEnabled).unwrap() {
        TransportOption::TlsEnabled(enabled) => assert!(!enabled),
        other => panic!("unexpected option: {other:?}"),
    }

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn argument_validation_happens_before_state_changes() {
    let transport = Transport::create(cooperative_config()).unwrap();

    assert!(matches!(
        transport.connect("", 9000, Duration::from_secs(1)).await,
        Err(TransportError::InvalidParameters(_))
    ));
    assert!(matches!(
        transport.listen(0, 0).await,
        Err(TransportError::InvalidParameters(_))
    ));
    assert!(matches!(
        transport.set_option(TransportOption::IoBufferSize(0)),
        Err(TransportError::InvalidParameters(_))
    ));
    assert_eq!(transport.endpoint_count(), 0);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn request_response_round_trip_with_worker_pool() {
    let transport = Transport::create(pooled_config()).unwrap();
    transport
        .register_message_handler(kind::DATA, |_, request| {
            let mut reply = Packet::from_slice(request.payload())?;
            reply.kind = kind::RESPONSE;
            Ok(Some(reply))
        })
        .unwrap();

    let server = transport.listen(0, 64).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();

    // Still in handshake: the gate must deny application data.
    let request = Packet::from_slice(b"echo me").unwrap();
    assert!(matches!(
        transport
            .send_message(peer, request.clone(), Duration::from_secs(1))
            .await,
        Err(TransportError::AccessDenied)
    ));

    advance_to_ready(&transport, peer);
    let response = transport
        .send_message(peer, request, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response");
    assert_eq!(response.payload(), b"echo me");
    assert_eq!(response.kind, kind::RESPONSE);

    let stats = transport.get_stats().unwrap();
    assert!(stats.connections >= 2);
    assert!(stats.packets_sent >= 2);
    assert!(stats.packets_received >= 1);
    assert!(stats.bytes_sent > 0);
    assert!(stats.bytes_received > 0);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn request_response_round_trip_in_cooperative_mode() {
    let transport = Transport::create(cooperative_config()).unwrap();
    transport
        .register_message_handler(kind::DATA, |_, request| {
            let mut reply = Packet::from_slice(request.payload())?;
            reply.kind = kind::RESPONSE;
            Ok(Some(reply))
        })
        .unwrap();

    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    advance_to_ready(&transport, peer);

    let send = transport.send_message(
        peer,
        Packet::from_slice(b"cooperative").unwrap(),
        Duration::from_secs(5),
    );
    tokio::pin!(send);

    // No background workers: this loop is the event pump.
    let response = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                let _ = transport.process_events(Duration::ZERO).await;
            }
        }
    };
    assert_eq!(response.unwrap().expect("response").payload(), b"cooperative");

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn handcrafted_wire_frame_is_accepted() {
    use tokio::io::AsyncWriteExt;

    let transport = Transport::create(pooled_config()).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    transport
        .register_message_handler(kind::DATA, move |_, packet| {
            sink.lock().unwrap().extend_from_slice(packet.payload());
            Ok(None)
        })
        .unwrap();

    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();

    // Frame built byte-by-byte against the wire layout, independent of the
    // codec, to pin cross-implementation compatibility.
    let payload = b"ping";
    let checksum = Packet::from_slice(payload).unwrap().checksum();
    let mut frame = Vec::new();
    frame.extend_from_slice(&kind::DATA.to_be_bytes()); // kind
    frame.extend_from_slice(&5u32.to_be_bytes()); // id
    frame.extend_from_slice(&0u32.to_be_bytes()); // sequence
    frame.extend_from_slice(&0u64.to_be_bytes()); // timestamp
    frame.push(0); // flags
    frame.extend_from_slice(&checksum.to_be_bytes()); // checksum
    frame.push(0); // priority
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    let mut wire = Vec::new();
    wire.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    wire.extend_from_slice(&frame);

    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    raw.write_all(&wire).await.unwrap();
    raw.flush().await.unwrap();

    // Give the acceptor and a drain pass time to run.
    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received.lock().unwrap().as_slice(), payload);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn endpoint_capacity_is_enforced_on_connect() {
    let transport = Transport::create(TransportConfig::default_with_overrides(|c| {
        c.worker_tasks = 2;
        c.max_endpoints = 2;
    }))
    .unwrap();

    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();

    let _first = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    // Wait for the accepted endpoint to register; the arena is then full.
    for _ in 0..50 {
        if transport.endpoint_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(transport.endpoint_count(), 2);

    let second = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await;
    assert!(matches!(
        second,
        Err(TransportError::CapacityExceeded(_))
    ));
    assert!(transport.endpoint_count() <= 2);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_is_not_repeatable() {
    let transport = Transport::create(pooled_config()).unwrap();
    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();

    transport.disconnect(peer).await.unwrap();
    assert!(matches!(
        transport.endpoint(peer),
        Err(TransportError::NotFound)
    ));
    assert!(matches!(
        transport.disconnect(peer).await,
        Err(TransportError::NotFound)
    ));

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_events_fire_for_both_sides() {
    let transport = Transport::create(pooled_config()).unwrap();
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&connects);
    transport
        .register_event_handler(EventKind::Connect, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let seen = Arc::clone(&disconnects);
    transport
        .register_event_handler(EventKind::Disconnect, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();

    for _ in 0..50 {
        if connects.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // One Connect per side of the loopback pair.
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    transport.disconnect(peer).await.unwrap();
    assert!(disconnects.load(Ordering::SeqCst) >= 1);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_reaches_ready_endpoints_best_effort() {
    let transport = Transport::create(pooled_config()).unwrap();
    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();

    let a = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    let b = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    advance_to_ready(&transport, a);
    advance_to_ready(&transport, b);

    let packet = Packet::from_slice(b"fan-out").unwrap();
    let delivered = transport
        .broadcast(&packet, Duration::from_secs(1))
        .await
        .unwrap();
    // The two ready clients receive it; accepted server-side endpoints are
    // still in handshake and are skipped by the gate.
    assert_eq!(delivered, 2);

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn zero_timeout_send_message_is_fire_and_forget() {
    let transport = Transport::create(pooled_config()).unwrap();
    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    advance_to_ready(&transport, peer);

    let result = transport
        .send_message(peer, Packet::from_slice(b"no reply wanted").unwrap(), Duration::ZERO)
        .await
        .unwrap();
    assert!(result.is_none());

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_terminal() {
    let transport = Transport::create(pooled_config()).unwrap();
    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();
    let _peer = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(transport.client_count(), 1);
    assert_eq!(transport.server_count(), 1);

    transport.shutdown().await.unwrap();
    assert_eq!(transport.worker_count(), 0);
    assert_eq!(transport.endpoint_count(), 0);
    assert_eq!(transport.client_count(), 0);
    assert_eq!(transport.server_count(), 0);
    assert!(matches!(
        transport.shutdown().await,
        Err(TransportError::NotInitialized)
    ));
    assert!(matches!(
        transport.get_stats(),
        Err(TransportError::NotInitialized)
    ));
    assert!(matches!(
        transport.connect("127.0.0.1", port, Duration::from_secs(1)).await,
        Err(TransportError::NotInitialized)
    ));
}

#[tokio::test]
async fn stale_endpoint_id_fails_after_slot_reuse() {
    let transport = Transport::create(pooled_config()).unwrap();
    let server = transport.listen(0, 16).await.unwrap();
    let port = transport.server_addr(server).unwrap().port();

    let old = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    transport.disconnect(old).await.unwrap();

    let _new = transport
        .connect("127.0.0.1", port, Duration::from_secs(5))
        .await
        .unwrap();
    // The slot may be reused, but the stale id must not resolve.
    assert!(matches!(
        transport.endpoint(old),
        Err(TransportError::NotFound)
    ));
    assert!(matches!(
        transport
            .send_packet(old, Packet::from_slice(b"x").unwrap(), Duration::from_secs(1))
            .await,
        Err(TransportError::NotFound)
    ));

    transport.shutdown().await.unwrap();
}
