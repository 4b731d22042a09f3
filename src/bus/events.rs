//! Event and zone types flowing on the bus.
//!
//! Zones from every adapter are folded into one model keyed by a prefixed
//! zone id; the prefix is authoritative for routing commands back to the
//! adapter that created the zone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter prefixes that may appear in a zone id.
pub const VALID_PREFIXES: &[&str] = &["roon", "lms", "hqp", "upnp", "openhome"];

/// A zone identifier enforcing the `prefix:opaque` format.
///
/// Adapters that emit bus events with raw ids instead of prefixed ids would
/// make the aggregator silently drop updates; this type keeps that from
/// compiling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixedZoneId(String);

impl PrefixedZoneId {
    pub fn new(prefix: &str, raw_id: impl AsRef<str>) -> Option<Self> {
        if VALID_PREFIXES.contains(&prefix) {
            Some(Self(format!("{}:{}", prefix, raw_id.as_ref())))
        } else {
            None
        }
    }

    pub fn hqp(raw_id: impl AsRef<str>) -> Self {
        Self(format!("hqp:{}", raw_id.as_ref()))
    }

    /// Parse a prefixed zone id; None if the prefix is unknown.
    pub fn parse(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref();
        let prefix = s.split(':').next()?;
        if VALID_PREFIXES.contains(&prefix) && s.len() > prefix.len() + 1 {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The adapter prefix (e.g. "hqp").
    pub fn prefix(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }

    /// The opaque part after the prefix.
    pub fn raw_id(&self) -> &str {
        self.0.split_once(':').map(|(_, r)| r).unwrap_or(&self.0)
    }
}

impl fmt::Display for PrefixedZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PrefixedZoneId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<PrefixedZoneId> for String {
    fn from(id: PrefixedZoneId) -> Self {
        id.0
    }
}

/// Playback state of a zone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Paused,
    Playing,
    #[default]
    Unknown,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Playing => write!(f, "playing"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for PlaybackState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "playing" | "play" => Self::Playing,
            "paused" | "pause" => Self::Paused,
            "stopped" | "stop" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Kind of scale a zone's volume control uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Unitless number within [min, max] (Roon "number", LMS 0-100).
    #[default]
    Number,
    /// Decibels, typically negative up to 0.
    Decibel,
    /// Volume is fixed; relative/absolute changes are rejected.
    Fixed,
}

/// Volume control descriptor attached to a zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeControl {
    pub kind: VolumeKind,
    pub value: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub is_muted: bool,
}

/// DSP link descriptor; present iff the zone is linked to a DSP instance.
///
/// The `pipeline` and `profiles` fields are paths into the HTTP surface,
/// kept bit-compatible with existing clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DspLink {
    #[serde(rename = "type")]
    pub kind: String,
    pub instance: String,
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,
}

/// Unified zone representation across all adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    /// Prefixed zone identifier (e.g. "hqp:living-room", "lms:00:04:20:...")
    pub zone_id: String,
    pub zone_name: String,
    pub output_name: String,
    pub device_name: String,
    pub state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsp: Option<DspLink>,
}

impl Zone {
    /// The adapter prefix of this zone's id.
    pub fn prefix(&self) -> &str {
        self.zone_id.split(':').next().unwrap_or("")
    }
}

/// Now-playing snapshot for a zone. Derived on demand from the owning
/// adapter; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    pub zone_id: String,
    /// Three display lines: title / artist / album.
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeControl>,
    /// Seek position in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_position: Option<f64>,
    /// Track length in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Opaque artwork key: an absolute URL or a backend-specific id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    /// Direct artwork URL where the adapter already knows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// Image bytes returned from adapters or artwork URLs.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Events flowing on the bus, serialized as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[allow(clippy::large_enum_variant)] // Zone-carrying variants are the hot path
pub enum BusEvent {
    // Zone lifecycle
    /// A new zone was discovered by an adapter.
    ZoneDiscovered { zone: Zone },
    /// Zone attributes changed; carries the full replacement state.
    ZoneUpdated { zone: Zone },
    /// A zone went away (offline, unlinked, adapter disconnect).
    ZoneRemoved { zone_id: PrefixedZoneId },

    // Playback notifications (consumers re-query the owning adapter)
    NowPlayingChanged { zone_id: PrefixedZoneId },
    VolumeChanged { zone_id: PrefixedZoneId },
    SeekPositionChanged { zone_id: PrefixedZoneId, position: f64 },

    // Adapter lifecycle
    AdapterConnected { adapter: String },
    AdapterDisconnected { adapter: String },
    /// Adapter is about to stop; the aggregator flushes its zones.
    AdapterStopping { adapter: String },
    /// Stop acknowledgement: the adapter's I/O resources are released.
    AdapterStopped { adapter: String },
    /// All zones of an adapter were flushed from the aggregator.
    ZonesFlushed { adapter: String, zone_ids: Vec<String> },

    // System
    ShuttingDown,

    // Adapter-specific state changes
    DspStateChanged { instance: String, state: PlaybackState },
    DspPipelineChanged { instance: String },
    LmsPlayerStateChanged { player_id: String, state: String },
}

impl BusEvent {
    /// Event type string, matching the serialized `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ZoneDiscovered { .. } => "ZoneDiscovered",
            Self::ZoneUpdated { .. } => "ZoneUpdated",
            Self::ZoneRemoved { .. } => "ZoneRemoved",
            Self::NowPlayingChanged { .. } => "NowPlayingChanged",
            Self::VolumeChanged { .. } => "VolumeChanged",
            Self::SeekPositionChanged { .. } => "SeekPositionChanged",
            Self::AdapterConnected { .. } => "AdapterConnected",
            Self::AdapterDisconnected { .. } => "AdapterDisconnected",
            Self::AdapterStopping { .. } => "AdapterStopping",
            Self::AdapterStopped { .. } => "AdapterStopped",
            Self::ZonesFlushed { .. } => "ZonesFlushed",
            Self::ShuttingDown => "ShuttingDown",
            Self::DspStateChanged { .. } => "DspStateChanged",
            Self::DspPipelineChanged { .. } => "DspPipelineChanged",
            Self::LmsPlayerStateChanged { .. } => "LmsPlayerStateChanged",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_zone_id_parse() {
        assert!(PrefixedZoneId::parse("hqp:main").is_some());
        assert!(PrefixedZoneId::parse("lms:00:04:20:16:9a:aa").is_some());
        assert!(PrefixedZoneId::parse("roon:1601bb42").is_some());
        assert!(PrefixedZoneId::parse("sonos:abc").is_none());
        assert!(PrefixedZoneId::parse("noprefix").is_none());
        assert!(PrefixedZoneId::parse("hqp:").is_none());
    }

    #[test]
    fn prefixed_zone_id_accessors() {
        let id = PrefixedZoneId::hqp("living-room");
        assert_eq!(id.as_str(), "hqp:living-room");
        assert_eq!(id.prefix(), "hqp");
        assert_eq!(id.raw_id(), "living-room");

        // Raw ids may themselves contain colons (LMS player MACs)
        let lms = PrefixedZoneId::parse("lms:00:04:20:16:9a:aa").unwrap();
        assert_eq!(lms.prefix(), "lms");
        assert_eq!(lms.raw_id(), "00:04:20:16:9a:aa");
    }

    #[test]
    fn playback_state_round_trip() {
        assert_eq!(PlaybackState::from("Playing"), PlaybackState::Playing);
        assert_eq!(PlaybackState::from("stop"), PlaybackState::Stopped);
        assert_eq!(PlaybackState::from("buffering"), PlaybackState::Unknown);
        assert_eq!(PlaybackState::Paused.to_string(), "paused");
    }

    #[test]
    fn event_serializes_tagged() {
        let event = BusEvent::SeekPositionChanged {
            zone_id: PrefixedZoneId::hqp("main"),
            position: 42.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SeekPositionChanged");
        assert_eq!(json["payload"]["zone_id"], "hqp:main");
        assert_eq!(event.event_type(), "SeekPositionChanged");
    }

    #[test]
    fn zone_json_omits_absent_dsp() {
        let zone = Zone {
            zone_id: "lms:player".into(),
            zone_name: "Kitchen".into(),
            output_name: "Kitchen".into(),
            device_name: "Squeezebox".into(),
            state: PlaybackState::Stopped,
            volume: None,
            dsp: None,
        };
        let json = serde_json::to_value(&zone).unwrap();
        assert!(json.get("dsp").is_none());
        assert!(json.get("volume").is_none());
    }

    #[test]
    fn dsp_link_json_shape() {
        let link = DspLink {
            kind: "hqplayer".into(),
            instance: "main".into(),
            pipeline: "/hqp/pipeline?zone_id=roon%3Aabc".into(),
            profiles: Some("/hqp/profiles".into()),
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["type"], "hqplayer");
        assert_eq!(json["pipeline"], "/hqp/pipeline?zone_id=roon%3Aabc");
    }
}
