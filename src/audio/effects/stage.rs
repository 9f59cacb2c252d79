use crate::audio::config::DspSettings;
use crate::audio::resampling::ResampleError;
use crate::audio::types::{Channel, ChannelLayout};

/// Configuration errors reported by a stage's `initialize`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DspError {
    #[error("{stage}: unsupported channel layout [{layout}]")]
    UnsupportedLayout {
        stage: &'static str,
        layout: ChannelLayout,
    },

    #[error("{stage}: layout [{layout}] has no {channel} channel")]
    MissingChannel {
        stage: &'static str,
        channel: Channel,
        layout: ChannelLayout,
    },

    #[error("{stage}: invalid sample rate {sample_rate}Hz")]
    InvalidSampleRate { stage: &'static str, sample_rate: u32 },

    #[error("Resample engine error: {0}")]
    Resample(#[from] ResampleError),
}

/// Uniform contract for every stage of the DSP chain
///
/// Stages are driven from a single mixing thread and are not reentrant. The
/// `samples` counts below are interleaved sample counts (`frames * channels`).
pub trait DspStage: Send {
    /// Short identifier used in log lines
    fn name(&self) -> &'static str;

    /// Prepare the stage for `layout` at `sample_rate`
    ///
    /// On error the stage stays uninitialized and must not be processed.
    fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError>;

    /// Drop all derived coefficients and history
    fn deinitialize(&mut self);

    fn is_initialized(&self) -> bool;

    /// Layout and rate of the data returned by [`DspStage::output`]
    fn output_format(&self) -> (ChannelLayout, u32);

    /// Process interleaved samples, returning how many input samples were consumed
    ///
    /// Unconsumed input must be offered again on the next call.
    fn process(&mut self, buffer: &mut [f32]) -> usize;

    /// Samples produced by the most recent [`DspStage::process`] call
    ///
    /// In-place stages return a prefix of `processed`, the buffer last passed to `process`.
    fn output<'a>(&'a self, processed: &'a [f32]) -> &'a [f32];

    /// Latency introduced by buffering inside the stage
    fn delay_seconds(&self) -> f64 {
        0.0
    }

    /// Re-apply a new settings snapshot after the setting `name` changed
    fn on_settings_changed(&mut self, name: &str, settings: &DspSettings) -> Result<(), DspError>;
}
