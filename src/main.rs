//! hifi-bridge runner: wires config, bus, aggregator and coordinator, then
//! waits for a termination signal and shuts down with acknowledged stops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hifi_bridge::adapters::hqp::{HqpAdapter, ZoneLinkStore};
use hifi_bridge::aggregator::ZoneAggregator;
use hifi_bridge::bus;
use hifi_bridge::config;
use hifi_bridge::coordinator::AdapterCoordinator;
use hifi_bridge::service::Bridge;

#[tokio::main]
async fn main() -> Result<()> {
    // Priority: RUST_LOG > LOG_LEVEL (legacy) > default
    let log_filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "hifi_bridge=info".into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting hifi-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config()?;

    let bus = bus::create_bus();

    let aggregator = Arc::new(ZoneAggregator::new(bus.clone()));
    {
        let aggregator = aggregator.clone();
        tokio::spawn(async move { aggregator.run().await });
    }

    let coordinator = Arc::new(
        AdapterCoordinator::new(bus.clone())
            .with_grace_timeout(Duration::from_secs(config.shutdown_grace_secs)),
    );

    let hqp = Arc::new(
        HqpAdapter::from_config(bus.clone(), &config.hqp)
            .await
            .with_poll_interval(Duration::from_secs(config.hqp_poll_secs)),
    );
    coordinator.register(hqp.clone(), config.adapters.hqp).await;

    let links = Arc::new(ZoneLinkStore::from_entries(
        config
            .links
            .iter()
            .map(|l| (l.zone_id.clone(), l.instance.clone())),
    ));

    let mut bridge = Bridge::new(
        bus.clone(),
        aggregator,
        coordinator.clone(),
        hqp,
        links,
    );
    for prefix in ["roon", "lms", "upnp", "openhome"] {
        if let Some((username, password)) = config.basic_auth_for(prefix) {
            bridge = bridge.with_basic_auth(prefix, username, password);
        }
    }
    // The HTTP layer takes ownership of `bridge` here; the core only keeps
    // it alive for the lifetime of the process.
    let _bridge = bridge;

    coordinator.start_enabled().await;
    tracing::info!("adapters started; waiting for termination signal");

    wait_for_signal().await;

    tracing::info!("termination signal received");
    coordinator.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("cannot install SIGTERM handler: {e}");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
