//! Adapter capability seam.
//!
//! An adapter implements [`AdapterLogic`]; lifecycle (startup, crash
//! restarts, shutdown ACK) belongs to `AdapterHandle`, never to the logic.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bus::{ImageData, NowPlaying, SharedBus, Zone};
use crate::error::BridgeError;

/// Context passed to adapter logic for the duration of one run.
pub struct AdapterContext {
    /// Bus for publishing zone and state events.
    pub bus: SharedBus,
    /// Cancelled when the adapter must wind down.
    pub shutdown: CancellationToken,
}

/// Commands routable to any adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    PlayPause,
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    /// Signed delta in the zone's volume scale.
    VolumeRelative(f32),
    /// Absolute level in the zone's volume scale.
    VolumeAbsolute(f32),
    /// Seek to a position in seconds.
    Seek(f64),
}

impl ControlAction {
    /// Parse the wire-level `(action, value)` pair used by external callers.
    pub fn parse(action: &str, value: Option<f64>) -> Result<Self, BridgeError> {
        let needs_value = || {
            value.ok_or_else(|| {
                BridgeError::Unsupported(format!("action '{}' requires a value", action))
            })
        };
        match action {
            "play_pause" => Ok(Self::PlayPause),
            "play" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            "next" => Ok(Self::Next),
            "previous" => Ok(Self::Previous),
            "vol_rel" => Ok(Self::VolumeRelative(needs_value()? as f32)),
            "vol_abs" => Ok(Self::VolumeAbsolute(needs_value()? as f32)),
            "seek" => Ok(Self::Seek(needs_value()?)),
            other => Err(BridgeError::Unsupported(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

/// What an adapter can do beyond basic transport control.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub images: bool,
    pub grouping: bool,
    pub seek: bool,
    pub volume: bool,
}

/// Connection diagnostics exposed per adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Adapter-specific logic: discovery, protocol handling, command execution.
#[async_trait]
pub trait AdapterLogic: Send + Sync + 'static {
    /// Zone id prefix this adapter owns (e.g. "hqp", "lms").
    fn prefix(&self) -> &'static str;

    /// Capability flags; callers check these or receive `Unsupported`.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Main loop: poll/subscribe, publish zone events to `ctx.bus`.
    /// Returns Ok on cooperative shutdown (`ctx.shutdown` fired), Err on
    /// unexpected failure (the handle applies its restart policy).
    async fn run(&self, ctx: AdapterContext) -> Result<()>;

    /// Release all I/O resources. The handle publishes `AdapterStopped`
    /// only after this returns; it must complete within bounded time.
    async fn stop(&self);

    /// Zones this adapter currently exposes.
    async fn get_zones(&self) -> Vec<Zone>;

    /// Fresh now-playing snapshot for one of this adapter's zones.
    async fn get_now_playing(&self, zone_id: &str) -> Result<NowPlaying, BridgeError>;

    /// Execute a transport/volume command for one of this adapter's zones.
    async fn control(&self, zone_id: &str, action: ControlAction) -> Result<(), BridgeError>;

    /// Fetch artwork by backend-specific key.
    async fn get_image(&self, _image_key: &str) -> Result<ImageData, BridgeError> {
        Err(BridgeError::Unsupported(format!(
            "{} adapter does not serve images",
            self.prefix()
        )))
    }

    /// Connection diagnostics.
    async fn get_status(&self) -> AdapterStatus {
        AdapterStatus::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_transport() {
        assert_eq!(
            ControlAction::parse("play_pause", None).unwrap(),
            ControlAction::PlayPause
        );
        assert_eq!(
            ControlAction::parse("next", Some(3.0)).unwrap(),
            ControlAction::Next
        );
    }

    #[test]
    fn action_parse_valued() {
        assert_eq!(
            ControlAction::parse("vol_rel", Some(-2.0)).unwrap(),
            ControlAction::VolumeRelative(-2.0)
        );
        assert_eq!(
            ControlAction::parse("seek", Some(90.5)).unwrap(),
            ControlAction::Seek(90.5)
        );
        assert!(ControlAction::parse("vol_abs", None).is_err());
        assert!(ControlAction::parse("group", None).is_err());
    }
}
