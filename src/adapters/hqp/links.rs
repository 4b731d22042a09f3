//! Zone-to-DSP-instance links.
//!
//! A zone from any adapter can route its digital path through a DSP
//! instance; linked zones carry the `dsp` descriptor in their JSON shape.
//! Links are fed from configuration - the core owns no persisted state.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use crate::bus::DspLink;
use crate::error::BridgeError;

pub struct ZoneLinkStore {
    /// zone_id -> instance name
    links: RwLock<HashMap<String, String>>,
}

impl ZoneLinkStore {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            links: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Link a zone to a named instance. The caller validates the instance.
    pub async fn link(&self, zone_id: impl Into<String>, instance: impl Into<String>) {
        let (zone_id, instance) = (zone_id.into(), instance.into());
        info!(%zone_id, %instance, "zone linked to DSP instance");
        self.links.write().await.insert(zone_id, instance);
    }

    pub async fn unlink(&self, zone_id: &str) -> bool {
        let removed = self.links.write().await.remove(zone_id).is_some();
        if removed {
            info!(%zone_id, "zone unlinked from DSP");
        }
        removed
    }

    pub async fn instance_for(&self, zone_id: &str) -> Option<String> {
        self.links.read().await.get(zone_id).cloned()
    }

    pub async fn links(&self) -> Vec<(String, String)> {
        self.links
            .read()
            .await
            .iter()
            .map(|(z, i)| (z.clone(), i.clone()))
            .collect()
    }

    /// Drop every link pointing at a removed instance.
    pub async fn remove_instance(&self, instance: &str) -> usize {
        let mut links = self.links.write().await;
        let before = links.len();
        links.retain(|_, i| i != instance);
        before - links.len()
    }

    /// Build the `dsp` descriptor for a zone, or None when unlinked.
    /// `supports_profiles` reflects whether the linked instance reports
    /// switchable profiles.
    pub async fn descriptor(
        &self,
        zone_id: &str,
        supports_profiles: bool,
    ) -> Option<DspLink> {
        let instance = self.instance_for(zone_id).await?;
        Some(DspLink {
            kind: "hqplayer".to_string(),
            instance,
            pipeline: format!("/hqp/pipeline?zone_id={}", urlencoding::encode(zone_id)),
            profiles: supports_profiles.then(|| "/hqp/profiles".to_string()),
        })
    }

    /// Resolve a zone to its linked instance or a NotFound error.
    pub async fn require_instance(&self, zone_id: &str) -> Result<String, BridgeError> {
        self.instance_for(zone_id)
            .await
            .ok_or_else(|| BridgeError::NotFound(format!("zone '{}' has no DSP link", zone_id)))
    }
}

impl Default for ZoneLinkStore {
    fn default() -> Self {
        Self::new()
    }
}
