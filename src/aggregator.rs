//! ZoneAggregator - single source of truth for zone listings.
//!
//! Subscribes to the bus and folds zone lifecycle events into one map.
//! Queries return snapshots; the aggregator never calls adapters.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bus::{BusEvent, SharedBus, Zone};

pub struct ZoneAggregator {
    zones: Arc<RwLock<HashMap<String, Zone>>>,
    bus: SharedBus,
}

impl ZoneAggregator {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            zones: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// Event processing loop. Spawn as a task; returns after ShuttingDown.
    ///
    /// Write critical sections hold no suspension points beyond the lock
    /// acquisition itself: mutate, release, then publish.
    pub async fn run(&self) {
        let mut rx = self.bus.subscribe();

        info!("zone aggregator started");

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!("aggregator lagged, skipped {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            match event {
                BusEvent::ZoneDiscovered { zone } | BusEvent::ZoneUpdated { zone } => {
                    debug!(zone_id = %zone.zone_id, "zone upserted");
                    self.zones.write().await.insert(zone.zone_id.clone(), zone);
                }

                BusEvent::ZoneRemoved { zone_id } => {
                    debug!(%zone_id, "zone removed");
                    self.zones.write().await.remove(zone_id.as_str());
                }

                BusEvent::AdapterStopping { adapter } => {
                    let flushed = self.flush_prefix(&adapter).await;
                    info!(adapter, count = flushed.len(), "flushed zones");
                    self.bus.publish(BusEvent::ZonesFlushed {
                        adapter,
                        zone_ids: flushed,
                    });
                }

                BusEvent::ShuttingDown => {
                    info!("zone aggregator shutting down");
                    self.drain(rx).await;
                    break;
                }

                _ => {}
            }
        }
    }

    /// After ShuttingDown, adapters still publish `AdapterStopping` on
    /// their way out; keep flushing until the bus goes quiet so the final
    /// zone state is empty when the process exits.
    async fn drain(&self, mut rx: tokio::sync::broadcast::Receiver<BusEvent>) {
        const QUIET: std::time::Duration = std::time::Duration::from_secs(1);
        loop {
            match tokio::time::timeout(QUIET, rx.recv()).await {
                Ok(Ok(BusEvent::AdapterStopping { adapter })) => {
                    let flushed = self.flush_prefix(&adapter).await;
                    self.bus.publish(BusEvent::ZonesFlushed {
                        adapter,
                        zone_ids: flushed,
                    });
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    }

    /// Atomically drop every zone whose id starts with `prefix:`.
    async fn flush_prefix(&self, prefix: &str) -> Vec<String> {
        let needle = format!("{}:", prefix);
        let mut zones = self.zones.write().await;

        let flushed: Vec<String> = zones
            .keys()
            .filter(|k| k.starts_with(&needle))
            .cloned()
            .collect();
        for zone_id in &flushed {
            zones.remove(zone_id);
        }
        flushed
    }

    /// Snapshot of all zones.
    pub async fn list_zones(&self) -> Vec<Zone> {
        self.zones.read().await.values().cloned().collect()
    }

    pub async fn get_zone(&self, zone_id: &str) -> Option<Zone> {
        self.zones.read().await.get(zone_id).cloned()
    }

    pub async fn zones_for_adapter(&self, prefix: &str) -> Vec<Zone> {
        let needle = format!("{}:", prefix);
        self.zones
            .read()
            .await
            .values()
            .filter(|z| z.zone_id.starts_with(&needle))
            .cloned()
            .collect()
    }

    pub async fn zone_count(&self) -> usize {
        self.zones.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::bus::{create_bus, PlaybackState, PrefixedZoneId};
    use std::time::Duration;

    fn zone(id: &str, name: &str) -> Zone {
        Zone {
            zone_id: id.to_string(),
            zone_name: name.to_string(),
            output_name: name.to_string(),
            device_name: String::new(),
            state: PlaybackState::Stopped,
            volume: None,
            dsp: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn upsert_and_remove() {
        let bus = create_bus();
        let agg = Arc::new(ZoneAggregator::new(bus.clone()));
        let agg2 = agg.clone();
        tokio::spawn(async move { agg2.run().await });
        settle().await;

        bus.publish(BusEvent::ZoneDiscovered {
            zone: zone("hqp:main", "Main"),
        });
        settle().await;
        assert_eq!(agg.zone_count().await, 1);

        bus.publish(BusEvent::ZoneUpdated {
            zone: zone("hqp:main", "Renamed"),
        });
        settle().await;
        assert_eq!(agg.get_zone("hqp:main").await.unwrap().zone_name, "Renamed");

        bus.publish(BusEvent::ZoneRemoved {
            zone_id: PrefixedZoneId::hqp("main"),
        });
        settle().await;
        assert!(agg.get_zone("hqp:main").await.is_none());
    }

    #[tokio::test]
    async fn adapter_stop_flushes_only_its_prefix() {
        let bus = create_bus();
        let agg = Arc::new(ZoneAggregator::new(bus.clone()));
        let agg2 = agg.clone();
        tokio::spawn(async move { agg2.run().await });
        settle().await;

        for id in ["hqp:a", "hqp:b", "lms:kitchen"] {
            bus.publish(BusEvent::ZoneDiscovered {
                zone: zone(id, id),
            });
        }
        settle().await;
        assert_eq!(agg.zone_count().await, 3);

        let mut rx = bus.subscribe();
        bus.publish(BusEvent::AdapterStopping {
            adapter: "hqp".to_string(),
        });
        settle().await;

        let remaining = agg.list_zones().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].zone_id, "lms:kitchen");

        // Flush is acknowledged on the bus
        let mut saw_flush = false;
        while let Ok(event) = rx.try_recv() {
            if let BusEvent::ZonesFlushed { adapter, zone_ids } = event {
                assert_eq!(adapter, "hqp");
                let mut ids = zone_ids;
                ids.sort();
                assert_eq!(ids, vec!["hqp:a".to_string(), "hqp:b".to_string()]);
                saw_flush = true;
            }
        }
        assert!(saw_flush);
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let bus = create_bus();
        let agg = Arc::new(ZoneAggregator::new(bus.clone()));
        let agg2 = agg.clone();
        let task = tokio::spawn(async move { agg2.run().await });
        settle().await;

        bus.publish(BusEvent::ShuttingDown);
        // Includes the post-shutdown drain window
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn flushes_stops_arriving_after_shutdown() {
        let bus = create_bus();
        let agg = Arc::new(ZoneAggregator::new(bus.clone()));
        let agg2 = agg.clone();
        let task = tokio::spawn(async move { agg2.run().await });
        settle().await;

        bus.publish(BusEvent::ZoneDiscovered {
            zone: zone("hqp:a", "A"),
        });
        settle().await;

        bus.publish(BusEvent::ShuttingDown);
        bus.publish(BusEvent::AdapterStopping {
            adapter: "hqp".to_string(),
        });
        settle().await;

        assert_eq!(agg.zone_count().await, 0);
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
    }
}
