//! UDP multicast discovery of DSP engine instances.
//!
//! Sends `<discover>hqplayer</discover>` to the well-known multicast group
//! and collects `<discover result="OK" .../>` replies for a bounded window.
//! Results are deduplicated by source host, so repeated runs on the same
//! network return the same set.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapters::hqp::types::DiscoveredInstance;
use crate::adapters::hqp::wire;
use crate::error::BridgeError;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 199);
const DISCOVERY_PORT: u16 = 4321;
const DEFAULT_WINDOW: Duration = Duration::from_secs(3);

const PROBE: &[u8] = b"<?xml version=\"1.0\"?><discover>hqplayer</discover>";

/// Probe the local network; `window` defaults to 3 seconds.
pub async fn discover(window: Option<Duration>) -> Result<Vec<DiscoveredInstance>, BridgeError> {
    discover_on(
        SocketAddrV4::new(MULTICAST_GROUP, DISCOVERY_PORT),
        window.unwrap_or(DEFAULT_WINDOW),
    )
    .await
}

/// Discovery against an explicit target address (tests use loopback).
pub async fn discover_on(
    target: SocketAddrV4,
    window: Duration,
) -> Result<Vec<DiscoveredInstance>, BridgeError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(PROBE, target).await?;
    debug!(%target, "sent DSP discovery probe");

    let mut found: HashMap<String, DiscoveredInstance> = HashMap::new();
    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                let reply = String::from_utf8_lossy(&buf[..len]);
                match parse_reply(&reply, addr.ip().to_string()) {
                    Some(instance) => {
                        found.insert(instance.host.clone(), instance);
                    }
                    None => debug!(%addr, "ignoring non-OK discovery reply"),
                }
            }
            Ok(Err(e)) => {
                warn!("discovery recv error: {e}");
                break;
            }
            Err(_) => break, // window elapsed
        }
    }

    let mut instances: Vec<DiscoveredInstance> = found.into_values().collect();
    instances.sort_by(|a, b| a.host.cmp(&b.host));
    info!(count = instances.len(), "DSP discovery finished");
    Ok(instances)
}

/// Parse one `<discover result="OK" name=… version=… product=…/>` reply.
/// The sender's source IP is the instance host.
fn parse_reply(xml: &str, host: String) -> Option<DiscoveredInstance> {
    let doc = wire::parse_doc(xml.trim()).ok()?;
    if doc.root != "discover" || doc.attr("result") != Some("OK") {
        return None;
    }

    Some(DiscoveredInstance {
        host,
        port: DISCOVERY_PORT,
        name: doc
            .attr("name")
            .filter(|n| !n.is_empty())
            .unwrap_or("HQPlayer")
            .to_string(),
        version: doc.attr_string("version"),
        product: doc.attr("product").map(str::to_string),
    })
}
