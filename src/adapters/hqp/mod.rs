//! DSP engine adapter (prefix `hqp`).
//!
//! One [`HqpClient`] per configured instance. The adapter polls each
//! instance, folds Status snapshots into zone events, and routes transport
//! and volume commands back over the control connection.

pub mod client;
pub mod discovery;
pub mod links;
pub mod pipeline;
pub mod types;
pub mod wire;

pub use client::{ConnState, Enumerations, HqpClient, DEFAULT_PORT};
pub use links::ZoneLinkStore;
pub use pipeline::{PipelineSetting, PipelineView, PipelineVolume};
pub use types::{
    DiscoveredInstance, DspInfo, DspState, DspStatus, FilterItem, ListItem, MatrixProfile,
    RateItem, VolumeRange,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::adapters::traits::{
    AdapterContext, AdapterLogic, AdapterStatus, Capabilities, ControlAction,
};
use crate::bus::{
    BusEvent, NowPlaying, PlaybackState, PrefixedZoneId, SharedBus, VolumeControl, VolumeKind,
    Zone,
};
use crate::config::HqpInstanceConfig;
use crate::error::BridgeError;

pub const PREFIX: &str = "hqp";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

fn playback_state(raw: u8) -> PlaybackState {
    match raw {
        0 => PlaybackState::Stopped,
        1 => PlaybackState::Paused,
        2 => PlaybackState::Playing,
        _ => PlaybackState::Unknown,
    }
}

/// Last successful poll of one instance, kept for change detection.
struct Snapshot {
    zone: Zone,
    status: DspStatus,
}

pub struct HqpAdapter {
    clients: RwLock<HashMap<String, Arc<HqpClient>>>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
    bus: SharedBus,
    poll_interval: Duration,
}

impl HqpAdapter {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            bus,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn from_config(bus: SharedBus, instances: &[HqpInstanceConfig]) -> Self {
        let adapter = Self::new(bus);
        for cfg in instances {
            adapter
                .add_instance(&cfg.name, Some((cfg.host.clone(), cfg.port)))
                .await;
        }
        adapter
    }

    /// Register a named instance; replaces any previous client of that name.
    pub async fn add_instance(
        &self,
        name: &str,
        target: Option<(String, u16)>,
    ) -> Arc<HqpClient> {
        let client = Arc::new(HqpClient::new(name, target, self.bus.clone()));
        self.clients
            .write()
            .await
            .insert(name.to_string(), client.clone());
        info!(instance = name, "DSP instance registered");
        client
    }

    pub async fn remove_instance(&self, name: &str) -> bool {
        let client = self.clients.write().await.remove(name);
        match client {
            Some(client) => {
                client.disconnect().await;
                if self.snapshots.write().await.remove(name).is_some() {
                    self.bus.publish(BusEvent::ZoneRemoved {
                        zone_id: PrefixedZoneId::hqp(name),
                    });
                }
                true
            }
            None => false,
        }
    }

    pub async fn client(&self, name: &str) -> Option<Arc<HqpClient>> {
        self.clients.read().await.get(name).cloned()
    }

    /// Instance used when a caller names none: "default" if present,
    /// otherwise the sole configured instance.
    pub async fn default_client(&self) -> Option<Arc<HqpClient>> {
        let clients = self.clients.read().await;
        if let Some(client) = clients.get("default") {
            return Some(client.clone());
        }
        if clients.len() == 1 {
            return clients.values().next().cloned();
        }
        None
    }

    pub async fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the named instance reports switchable matrix profiles.
    pub async fn supports_profiles(&self, name: &str) -> bool {
        match self.client(name).await {
            Some(client) => !client.enumerations().await.matrix_profiles.is_empty(),
            None => false,
        }
    }

    fn build_zone(name: &str, enums: &Enumerations, status: &DspStatus, host: Option<&str>) -> Zone {
        let info = enums.info.clone().unwrap_or_default();
        let zone_name = if info.name.is_empty() {
            match host {
                Some(host) => format!("HQPlayer @ {}", host),
                None => format!("HQPlayer {}", name),
            }
        } else {
            info.name
        };
        let device_name = if info.product.is_empty() {
            "HQPlayer".to_string()
        } else {
            info.product
        };

        let volume = enums.volume_range.as_ref().map(|range| VolumeControl {
            kind: if range.enabled {
                VolumeKind::Decibel
            } else {
                VolumeKind::Fixed
            },
            value: status.volume_db as f32,
            min: range.min as f32,
            max: range.max as f32,
            step: range.step as f32,
            is_muted: false, // not reported on the control port
        });

        Zone {
            zone_id: PrefixedZoneId::hqp(name).into(),
            zone_name,
            output_name: name.to_string(),
            device_name,
            state: playback_state(status.state),
            volume,
            dsp: None,
        }
    }

    async fn poll_instance(&self, name: &str, client: &Arc<HqpClient>) {
        let status = match client.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!(instance = name, "poll failed: {e}");
                let had_zone = self.snapshots.write().await.remove(name).is_some();
                if had_zone {
                    self.bus.publish(BusEvent::ZoneRemoved {
                        zone_id: PrefixedZoneId::hqp(name),
                    });
                }
                return;
            }
        };

        let enums = client.enumerations().await;
        let zone = Self::build_zone(name, &enums, &status, client.host());
        let zone_id = PrefixedZoneId::hqp(name);

        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(name) {
            None => {
                self.bus.publish(BusEvent::ZoneDiscovered { zone: zone.clone() });
                self.bus.publish(BusEvent::DspStateChanged {
                    instance: name.to_string(),
                    state: zone.state,
                });
            }
            Some(prev) => {
                if prev.zone != zone {
                    self.bus.publish(BusEvent::ZoneUpdated { zone: zone.clone() });
                }
                if prev.zone.state != zone.state {
                    self.bus.publish(BusEvent::DspStateChanged {
                        instance: name.to_string(),
                        state: zone.state,
                    });
                    self.bus.publish(BusEvent::NowPlayingChanged {
                        zone_id: zone_id.clone(),
                    });
                }
                if prev.status.track_id != status.track_id {
                    self.bus.publish(BusEvent::NowPlayingChanged {
                        zone_id: zone_id.clone(),
                    });
                }
                if prev.status.position != status.position {
                    self.bus.publish(BusEvent::SeekPositionChanged {
                        zone_id: zone_id.clone(),
                        position: status.position as f64,
                    });
                }
                if prev.status.volume_db != status.volume_db {
                    self.bus.publish(BusEvent::VolumeChanged {
                        zone_id: zone_id.clone(),
                    });
                }
                if prev.status.active_filter != status.active_filter
                    || prev.status.active_shaper != status.active_shaper
                    || prev.status.active_mode != status.active_mode
                    || prev.status.active_rate != status.active_rate
                {
                    self.bus.publish(BusEvent::DspPipelineChanged {
                        instance: name.to_string(),
                    });
                }
            }
        }
        snapshots.insert(name.to_string(), Snapshot { zone, status });
    }

    async fn client_for_zone(&self, zone_id: &str) -> Result<Arc<HqpClient>, BridgeError> {
        let id = PrefixedZoneId::parse(zone_id)
            .filter(|id| id.prefix() == PREFIX)
            .ok_or_else(|| BridgeError::NotFound(format!("zone '{}'", zone_id)))?;
        self.client(id.raw_id())
            .await
            .ok_or_else(|| BridgeError::NotFound(format!("DSP instance '{}'", id.raw_id())))
    }
}

#[async_trait]
impl AdapterLogic for HqpAdapter {
    fn prefix(&self) -> &'static str {
        PREFIX
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            images: false,
            grouping: false,
            seek: true,
            volume: true,
        }
    }

    async fn run(&self, ctx: AdapterContext) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("DSP adapter polling started");
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let clients: Vec<(String, Arc<HqpClient>)> = self
                        .clients
                        .read()
                        .await
                        .iter()
                        .map(|(name, client)| (name.clone(), client.clone()))
                        .collect();

                    for (name, client) in clients {
                        if client.is_configured() {
                            self.poll_instance(&name, &client).await;
                        }
                    }
                }
            }
        }
    }

    async fn stop(&self) {
        let clients: Vec<Arc<HqpClient>> =
            self.clients.read().await.values().cloned().collect();
        for client in clients {
            client.disconnect().await;
        }
        self.snapshots.write().await.clear();
    }

    async fn get_zones(&self) -> Vec<Zone> {
        self.snapshots
            .read()
            .await
            .values()
            .map(|snapshot| snapshot.zone.clone())
            .collect()
    }

    async fn get_now_playing(&self, zone_id: &str) -> Result<NowPlaying, BridgeError> {
        let client = self.client_for_zone(zone_id).await?;
        let status = client.status().await?;
        let enums = client.enumerations().await;

        let volume = enums.volume_range.as_ref().map(|range| VolumeControl {
            kind: if range.enabled {
                VolumeKind::Decibel
            } else {
                VolumeKind::Fixed
            },
            value: status.volume_db as f32,
            min: range.min as f32,
            max: range.max as f32,
            step: range.step as f32,
            is_muted: false,
        });

        // The control port carries no track text; lines stay empty and
        // clients fall back to the source zone's metadata.
        Ok(NowPlaying {
            zone_id: zone_id.to_string(),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            is_playing: status.state == 2,
            volume,
            seek_position: Some(status.position as f64),
            length: Some(status.length as f64),
            image_key: None,
            artwork_url: None,
        })
    }

    async fn control(&self, zone_id: &str, action: ControlAction) -> Result<(), BridgeError> {
        let client = self.client_for_zone(zone_id).await?;

        match action {
            ControlAction::PlayPause => {
                let status = client.status().await?;
                if status.state == 2 {
                    client.pause().await
                } else {
                    client.play().await
                }
            }
            ControlAction::Play => client.play().await,
            ControlAction::Pause => client.pause().await,
            ControlAction::Stop => client.stop_playback().await,
            ControlAction::Next => client.next().await,
            ControlAction::Previous => client.previous().await,
            ControlAction::VolumeAbsolute(value) => {
                let range = client.volume_range().await?;
                let clamped = (value.round() as i32).clamp(range.min, range.max);
                client.set_volume_db(clamped).await
            }
            ControlAction::VolumeRelative(delta) => {
                let range = client.volume_range().await?;
                let status = client.status().await?;
                let target =
                    (status.volume_db + delta.round() as i32).clamp(range.min, range.max);
                client.set_volume_db(target).await
            }
            ControlAction::Seek(position) => client.seek(position.max(0.0) as u32).await,
        }
    }

    async fn get_status(&self) -> AdapterStatus {
        let clients = self.clients.read().await;
        let mut connected = Vec::new();
        for (name, client) in clients.iter() {
            if client.is_connected().await {
                connected.push(name.clone());
            }
        }
        connected.sort();
        AdapterStatus {
            connected: !connected.is_empty(),
            detail: (!connected.is_empty()).then(|| connected.join(", ")),
        }
    }
}
