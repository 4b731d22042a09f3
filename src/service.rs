//! Command/query surface consumed by the HTTP layer.
//!
//! A thin facade over the aggregator (reads), the coordinator's router
//! (commands), the DSP link store (pipeline access) and the bus (event
//! streaming). HTTP handlers translate these results to status codes; the
//! 4xx/5xx split follows `BridgeError::is_client_error`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::adapters::hqp::{HqpAdapter, HqpClient, PipelineSetting, PipelineView, ZoneLinkStore};
use crate::adapters::traits::ControlAction;
use crate::aggregator::ZoneAggregator;
use crate::bus::{BusEvent, ImageData, NowPlaying, SharedBus, Zone};
use crate::coordinator::AdapterCoordinator;
use crate::error::BridgeError;

pub struct Bridge {
    bus: SharedBus,
    aggregator: Arc<ZoneAggregator>,
    coordinator: Arc<AdapterCoordinator>,
    hqp: Arc<HqpAdapter>,
    links: Arc<ZoneLinkStore>,
    http: reqwest::Client,
    /// Basic auth per adapter prefix, applied to absolute artwork URLs.
    basic_auth: HashMap<String, (String, String)>,
}

impl Bridge {
    pub fn new(
        bus: SharedBus,
        aggregator: Arc<ZoneAggregator>,
        coordinator: Arc<AdapterCoordinator>,
        hqp: Arc<HqpAdapter>,
        links: Arc<ZoneLinkStore>,
    ) -> Self {
        Self {
            bus,
            aggregator,
            coordinator,
            hqp,
            links,
            http: reqwest::Client::new(),
            basic_auth: HashMap::new(),
        }
    }

    pub fn with_basic_auth(
        mut self,
        prefix: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.basic_auth
            .insert(prefix.into(), (username.into(), password.into()));
        self
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn coordinator(&self) -> &Arc<AdapterCoordinator> {
        &self.coordinator
    }

    pub fn links(&self) -> &Arc<ZoneLinkStore> {
        &self.links
    }

    // =========================================================================
    // Zone queries
    // =========================================================================

    /// All zones, with the `dsp` descriptor attached to linked ones.
    pub async fn zones(&self) -> Vec<Zone> {
        let mut zones = self.aggregator.list_zones().await;
        for zone in &mut zones {
            zone.dsp = self.dsp_descriptor(&zone.zone_id).await;
        }
        zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        zones
    }

    pub async fn zone(&self, zone_id: &str) -> Result<Zone, BridgeError> {
        let mut zone = self
            .aggregator
            .get_zone(zone_id)
            .await
            .ok_or_else(|| BridgeError::NotFound(format!("zone '{}'", zone_id)))?;
        zone.dsp = self.dsp_descriptor(zone_id).await;
        Ok(zone)
    }

    async fn dsp_descriptor(&self, zone_id: &str) -> Option<crate::bus::DspLink> {
        let instance = self.links.instance_for(zone_id).await?;
        let supports_profiles = self.hqp.supports_profiles(&instance).await;
        self.links.descriptor(zone_id, supports_profiles).await
    }

    /// Fresh now-playing snapshot from the owning adapter.
    pub async fn now_playing(&self, zone_id: &str) -> Result<NowPlaying, BridgeError> {
        let adapter = self.coordinator.route(zone_id).await?;
        adapter.get_now_playing(zone_id).await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn control(
        &self,
        zone_id: &str,
        action: &str,
        value: Option<f64>,
    ) -> Result<(), BridgeError> {
        let action = ControlAction::parse(action, value)?;
        let adapter = self.coordinator.route(zone_id).await?;
        debug!(%zone_id, ?action, "dispatching control");
        adapter.control(zone_id, action).await
    }

    // =========================================================================
    // Artwork
    // =========================================================================

    /// Fetch artwork. Absolute URLs are fetched directly (with the owning
    /// adapter's basic auth when configured); opaque keys are delegated to
    /// the adapter identified by the zone's prefix.
    pub async fn get_image(
        &self,
        image_key: &str,
        zone_id: &str,
    ) -> Result<ImageData, BridgeError> {
        if let Ok(parsed) = url::Url::parse(image_key) {
            if matches!(parsed.scheme(), "http" | "https") {
                return self.fetch_image_url(image_key, zone_id).await;
            }
        }

        let adapter = self.coordinator.route(zone_id).await?;
        adapter.get_image(image_key).await
    }

    async fn fetch_image_url(&self, url: &str, zone_id: &str) -> Result<ImageData, BridgeError> {
        let prefix = zone_id.split(':').next().unwrap_or("");
        let mut request = self.http.get(url);
        if let Some((username, password)) = self.basic_auth.get(prefix) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response.bytes().await?.to_vec();
        Ok(ImageData { content_type, data })
    }

    // =========================================================================
    // DSP pipeline
    // =========================================================================

    async fn pipeline_client(&self, zone_id: Option<&str>) -> Result<Arc<HqpClient>, BridgeError> {
        if !self.coordinator.is_enabled("hqp").await {
            return Err(BridgeError::NotConfigured("hqp adapter".to_string()));
        }
        match zone_id {
            Some(zone_id) => {
                let instance = self.links.require_instance(zone_id).await?;
                self.hqp.client(&instance).await.ok_or_else(|| {
                    BridgeError::NotFound(format!("DSP instance '{}'", instance))
                })
            }
            None => self
                .hqp
                .default_client()
                .await
                .ok_or_else(|| BridgeError::NotConfigured("no default DSP instance".to_string())),
        }
    }

    /// Pipeline view of the default instance, or of the instance linked to
    /// `zone_id` when given.
    pub async fn pipeline(&self, zone_id: Option<&str>) -> Result<PipelineView, BridgeError> {
        self.pipeline_client(zone_id).await?.get_pipeline().await
    }

    /// Apply a pipeline setting by domain name (Hz for `samplerate`).
    pub async fn set_pipeline(
        &self,
        setting: &str,
        value: &str,
        zone_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        let setting = PipelineSetting::parse(setting)?;
        self.pipeline_client(zone_id)
            .await?
            .set_pipeline(setting, value)
            .await
    }

    /// Switchable profiles of the zone's linked instance (or the default).
    pub async fn profiles(
        &self,
        zone_id: Option<&str>,
    ) -> Result<Vec<crate::adapters::hqp::MatrixProfile>, BridgeError> {
        self.pipeline_client(zone_id).await?.matrix_profiles().await
    }

    /// Load a profile by name on the zone's linked instance.
    pub async fn load_profile(
        &self,
        name: &str,
        zone_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        let client = self.pipeline_client(zone_id).await?;
        let known = client.matrix_profiles().await?;
        if !known.iter().any(|p| p.name == name) {
            return Err(BridgeError::NotFound(format!("profile '{}'", name)));
        }
        client.set_matrix_profile(name).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Async stream of bus events, ending after `ShuttingDown` is yielded.
    /// Lagged intermediate events are skipped.
    pub fn subscribe_events(&self) -> impl Stream<Item = BusEvent> {
        BroadcastStream::new(self.bus.subscribe())
            .filter_map(|result| futures::future::ready(result.ok()))
            .scan(false, |finished, event| {
                let emit = if *finished {
                    None
                } else {
                    if matches!(event, BusEvent::ShuttingDown) {
                        *finished = true;
                    }
                    Some(event)
                };
                futures::future::ready(emit)
            })
    }
}
