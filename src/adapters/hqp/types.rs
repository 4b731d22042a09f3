//! Protocol data model for the DSP control port.
//!
//! The central contract: `<State/>` returns list positions ("_idx" fields),
//! and Set commands carry that same position back in their `value`
//! attribute. A list item's `value` field is a stable identifier for
//! clients caching lists across restarts; it never travels on live Set
//! commands.

use serde::{Deserialize, Serialize};

/// Engine identity from `<GetInfo/>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DspInfo {
    pub name: String,
    pub product: String,
    pub version: String,
    pub platform: String,
    pub engine: String,
}

/// Full settings snapshot from `<State/>`.
///
/// Fields suffixed `_idx` are 0-based positions into the corresponding
/// cached list; `active_rate_hz` is Hz, not an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DspState {
    /// 0=stopped, 1=paused, 2=playing
    pub state: u8,
    pub mode_idx: u32,
    pub filter_idx: u32,
    pub filter1x_idx: Option<u32>,
    pub filter_nx_idx: Option<u32>,
    pub shaper_idx: u32,
    pub rate_idx: u32,
    pub volume_db: i32,
    pub active_mode_idx: u32,
    pub active_rate_hz: u32,
    pub invert: bool,
    pub convolution: bool,
    /// 0=off, 1=track, 2=all
    pub repeat: u8,
    pub random: bool,
    pub adaptive: bool,
    pub filter_20k: bool,
    pub matrix_profile: String,
}

/// Playback status from `<Status/>`.
///
/// `active_mode` here is a display string only; the authoritative active
/// mode is `DspState::active_mode_idx`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DspStatus {
    pub state: u8,
    pub track: u32,
    pub track_id: String,
    /// Seconds into the current track.
    pub position: u32,
    /// Track length in seconds.
    pub length: u32,
    pub volume_db: i32,
    pub active_mode: String,
    pub active_filter: String,
    pub active_shaper: String,
    pub active_rate: u32,
    pub active_bits: u32,
    pub active_channels: u32,
}

/// Volume capabilities from `<VolumeRange/>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VolumeRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub enabled: bool,
    pub adaptive: bool,
}

/// Mode/shaper enumeration entry: `index` is the wire position, `value`
/// the stable identifier (they need not agree).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListItem {
    pub index: u32,
    /// Can be negative (e.g. -1 for the source-follow mode).
    pub value: i32,
    pub name: String,
}

/// Filter enumeration entry; carries an extra engine argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterItem {
    pub index: u32,
    pub value: i32,
    pub name: String,
    pub arg: u32,
}

/// Sample-rate enumeration entry: rates carry no separate value, just Hz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateItem {
    pub index: u32,
    pub rate: u32,
}

/// Matrix (convolution/routing) profile entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixProfile {
    pub index: u32,
    pub name: String,
}

/// Instance discovered via UDP multicast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredInstance {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}
