use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dynamic range compressor parameters
///
/// Level values are in dB and converted to the natural-log domain by the compressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcSettings {
    pub threshold_db: f64,
    pub knee_width_db: f64,
    /// Compression slope; the compressor works with `slope - 1`, so 0.0 means limiting
    pub slope: f64,
    /// Static makeup gain, only used when `auto_gain` is off
    pub gain_db: f64,
    /// Attack time in seconds
    pub attack_time: f64,
    /// Release time in seconds
    pub release_time: f64,
    pub auto_knee: bool,
    pub auto_gain: bool,
    pub auto_attack: bool,
    pub auto_release: bool,
    pub prevent_clipping: bool,
}

impl Default for DrcSettings {
    fn default() -> Self {
        Self {
            threshold_db: -6.0,
            knee_width_db: 15.0,
            slope: 0.0,
            gain_db: 0.0,
            attack_time: 0.030,
            release_time: 0.120,
            auto_knee: true,
            auto_gain: true,
            auto_attack: true,
            auto_release: true,
            prevent_clipping: true,
        }
    }
}

/// Headphone crossfeed parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrtfSettings {
    /// Preset name (case-insensitive); when unset the direct overrides are used
    pub model: Option<String>,
    /// Low-pass cut frequency override in Hz
    pub cut_frequency_hz: u32,
    /// Feed level override in tenths of a dB
    pub feed_level_db10: u32,
    /// Output gain override; out-of-range values select the automatic anti-clipping gain
    pub gain: f64,
}

impl Default for HrtfSettings {
    fn default() -> Self {
        Self {
            model: None,
            cut_frequency_hz: 0,
            feed_level_db10: 0,
            gain: 0.0,
        }
    }
}

impl HrtfSettings {
    /// Whether either direct override was set; zero means "use the preset"
    pub fn has_overrides(&self) -> bool {
        self.cut_frequency_hz != 0 || self.feed_level_db10 != 0
    }
}

/// LFE low-pass parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowpassSettings {
    pub cutoff_hz: f64,
    /// Resonance applied to every cascade section
    pub resonance: f64,
}

impl Default for LowpassSettings {
    fn default() -> Self {
        Self {
            cutoff_hz: 140.0,
            resonance: 1.0,
        }
    }
}

/// Snapshot of every DSP setting, applied at initialize time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspSettings {
    pub drc: DrcSettings,
    pub hrtf: HrtfSettings,
    pub lowpass: LowpassSettings,
}

impl DspSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse DSP settings")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read DSP settings from {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Invalid DSP settings in {}", path.display()))
    }
}

/// Creation options for a raw stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Start in the paused state
    pub paused: bool,
    /// Start paused and resume automatically once the water level is reached
    pub auto_start: bool,
    /// Frames to buffer before output starts; defaults to one second
    pub water_level_frames: Option<u32>,
    /// Capacity of each producer packet in frames; defaults to half a second
    pub packet_frames: Option<u32>,
}
