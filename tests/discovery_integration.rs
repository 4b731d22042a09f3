#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! UDP discovery tests against loopback responders.
//!
//! Run with: cargo test --test discovery_integration

use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::net::UdpSocket;

use hifi_bridge::adapters::hqp::discovery::discover_on;

/// Responder answering every probe with an OK announcement.
async fn spawn_responder(reply: &'static str) -> SocketAddrV4 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = match socket.local_addr().unwrap() {
        std::net::SocketAddr::V4(addr) => addr,
        other => panic!("expected v4 addr, got {other}"),
    };

    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let probe = String::from_utf8_lossy(&buf[..len]);
            if probe.contains("<discover>hqplayer</discover>") {
                let _ = socket.send_to(reply.as_bytes(), src).await;
            }
        }
    });

    addr
}

#[tokio::test]
async fn discovery_finds_responder() {
    let target = spawn_responder(
        "<?xml version=\"1.0\"?><discover result=\"OK\" name=\"Music Room\" version=\"5.3.1\" product=\"HQPlayer Embedded\"/>",
    )
    .await;

    let found = discover_on(target, Duration::from_millis(400)).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].host, "127.0.0.1");
    assert_eq!(found[0].port, 4321);
    assert_eq!(found[0].name, "Music Room");
    assert_eq!(found[0].product.as_deref(), Some("HQPlayer Embedded"));
}

#[tokio::test]
async fn discovery_is_idempotent_and_deduplicates_by_host() {
    let target = spawn_responder(
        "<?xml version=\"1.0\"?><discover result=\"OK\" name=\"Desk\" version=\"5.3.1\"/>",
    )
    .await;

    let first = discover_on(target, Duration::from_millis(400)).await.unwrap();
    let second = discover_on(target, Duration::from_millis(400)).await.unwrap();

    // Same network, same answer set (keyed by host)
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
}

#[tokio::test]
async fn non_ok_responder_is_ignored() {
    let target =
        spawn_responder("<?xml version=\"1.0\"?><discover result=\"DENIED\" name=\"x\"/>").await;

    let found = discover_on(target, Duration::from_millis(300)).await.unwrap();
    assert!(found.is_empty());
}
