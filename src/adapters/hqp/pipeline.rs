//! Domain-named view over the DSP pipeline.
//!
//! Callers see enumeration names and Hz; every translation to and from the
//! wire protocol's positional indices happens here, against the cached
//! enumerations, and nowhere else.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::hqp::client::{Enumerations, HqpClient};
use crate::adapters::hqp::types::DspState;
use crate::bus::BusEvent;
use crate::error::BridgeError;

/// Pipeline settings addressable through [`HqpClient::set_pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSetting {
    Mode,
    Filter1x,
    FilterNx,
    Shaper,
    Samplerate,
}

impl PipelineSetting {
    /// Parse the external setting name. `dither` addresses the noise
    /// shaper: the engine has a single shaping enumeration and Set command
    /// for it.
    pub fn parse(name: &str) -> Result<Self, BridgeError> {
        match name {
            "mode" => Ok(Self::Mode),
            "filter1x" => Ok(Self::Filter1x),
            "filterNx" | "filternx" => Ok(Self::FilterNx),
            "shaper" | "dither" => Ok(Self::Shaper),
            "samplerate" | "rate" => Ok(Self::Samplerate),
            other => Err(BridgeError::Unsupported(format!(
                "unknown pipeline setting '{}'",
                other
            ))),
        }
    }
}

/// Volume descriptor accompanying the pipeline view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineVolume {
    pub value_db: i32,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub is_fixed: bool,
}

/// High-level pipeline snapshot.
///
/// The `mode`/`filter1x`/`filter_nx`/`shaper`/`samplerate` fields are the
/// configured settings; a Set accepted mid-playback may only take effect on
/// the next track. "What is actually playing" is `active_mode` (resolved
/// from the State snapshot's active mode index, which is authoritative) and
/// `active_rate_hz`; `active_filter`/`active_shaper` are display strings
/// reported by Status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineView {
    pub mode: String,
    pub filter1x: String,
    #[serde(rename = "filterNx")]
    pub filter_nx: String,
    pub shaper: String,
    /// Configured rate in Hz; 0 means "auto".
    pub samplerate: u32,
    pub volume: PipelineVolume,
    pub active_mode: String,
    pub active_rate_hz: u32,
    pub active_filter: String,
    pub active_shaper: String,
}

impl Enumerations {
    fn mode_name(&self, index: u32) -> String {
        self.modes
            .iter()
            .find(|m| m.index == index)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn filter_name(&self, index: u32) -> String {
        self.filters
            .iter()
            .find(|f| f.index == index)
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    fn shaper_name(&self, index: u32) -> String {
        self.shapers
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Configured rate in Hz; index 0 is the engine's "auto" slot.
    fn rate_hz(&self, index: u32) -> u32 {
        if index == 0 {
            return 0;
        }
        self.rates
            .iter()
            .find(|r| r.index == index)
            .map(|r| r.rate)
            .unwrap_or(0)
    }

    fn mode_index(&self, name: &str) -> Option<u32> {
        self.modes.iter().find(|m| m.name == name).map(|m| m.index)
    }

    fn filter_index(&self, name: &str) -> Option<u32> {
        self.filters
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.index)
    }

    fn shaper_index(&self, name: &str) -> Option<u32> {
        self.shapers
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.index)
    }

    fn rate_index(&self, hz: u32) -> Option<u32> {
        if hz == 0 {
            return Some(0);
        }
        self.rates.iter().find(|r| r.rate == hz).map(|r| r.index)
    }
}

impl HqpClient {
    /// Read State + Status and resolve indices to names.
    pub async fn get_pipeline(&self) -> Result<PipelineView, BridgeError> {
        let state = self.state().await?;
        let status = self.status().await?;
        let range = self.volume_range().await?;
        let enums = self.enumerations().await;

        let filter1x_idx = state.filter1x_idx.unwrap_or(state.filter_idx);
        let filter_nx_idx = state.filter_nx_idx.unwrap_or(state.filter_idx);

        Ok(PipelineView {
            mode: enums.mode_name(state.mode_idx),
            filter1x: enums.filter_name(filter1x_idx),
            filter_nx: enums.filter_name(filter_nx_idx),
            shaper: enums.shaper_name(state.shaper_idx),
            samplerate: enums.rate_hz(state.rate_idx),
            volume: PipelineVolume {
                value_db: state.volume_db,
                min: range.min,
                max: range.max,
                step: range.step,
                is_fixed: !range.enabled,
            },
            active_mode: enums.mode_name(state.active_mode_idx),
            active_rate_hz: state.active_rate_hz,
            active_filter: status.active_filter,
            active_shaper: status.active_shaper,
        })
    }

    /// Apply one pipeline setting by domain name (or Hz for the rate).
    ///
    /// The name resolves to a position in the cached enumeration and that
    /// position travels on the wire, matching what a State round-trip
    /// would send back.
    pub async fn set_pipeline(
        &self,
        setting: PipelineSetting,
        value: &str,
    ) -> Result<(), BridgeError> {
        let enums = self.enumerations().await;

        match setting {
            PipelineSetting::Mode => {
                let index = enums
                    .mode_index(value)
                    .ok_or_else(|| BridgeError::NotFound(format!("mode '{}'", value)))?;
                self.set_mode_index(index).await?;
            }
            PipelineSetting::Filter1x => {
                let index = enums
                    .filter_index(value)
                    .ok_or_else(|| BridgeError::NotFound(format!("filter '{}'", value)))?;
                let state = self.state().await?;
                if state.filter1x_idx.is_some() {
                    // Split-filter engine: preserve the current Nx filter
                    self.set_filter_indices(current_nx(&state), Some(index))
                        .await?;
                } else {
                    self.set_filter_indices(index, None).await?;
                }
            }
            PipelineSetting::FilterNx => {
                let index = enums
                    .filter_index(value)
                    .ok_or_else(|| BridgeError::NotFound(format!("filter '{}'", value)))?;
                let state = self.state().await?;
                if state.filter1x_idx.is_some() {
                    // Preserve the current 1x filter
                    self.set_filter_indices(index, Some(current_1x(&state)))
                        .await?;
                } else {
                    self.set_filter_indices(index, None).await?;
                }
            }
            PipelineSetting::Shaper => {
                let index = enums
                    .shaper_index(value)
                    .ok_or_else(|| BridgeError::NotFound(format!("shaper '{}'", value)))?;
                self.set_shaper_index(index).await?;
            }
            PipelineSetting::Samplerate => {
                let hz: u32 = if value.eq_ignore_ascii_case("auto") {
                    0
                } else {
                    value.parse().map_err(|_| {
                        BridgeError::Unsupported(format!("samplerate '{}' is not Hz", value))
                    })?
                };
                let index = enums
                    .rate_index(hz)
                    .ok_or_else(|| BridgeError::NotFound(format!("rate {} Hz", hz)))?;
                self.set_rate_index(index).await?;
            }
        }

        debug!(instance = %self.instance(), ?setting, value, "pipeline setting applied");
        self.bus().publish(BusEvent::DspPipelineChanged {
            instance: self.instance().to_string(),
        });
        Ok(())
    }
}

fn current_nx(state: &DspState) -> u32 {
    state.filter_nx_idx.unwrap_or(state.filter_idx)
}

fn current_1x(state: &DspState) -> u32 {
    state.filter1x_idx.unwrap_or(state.filter_idx)
}
