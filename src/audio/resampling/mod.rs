// Resampling module - sample rate conversion engines
//
// The DSP chain only talks to the `ResampleEngine` trait; the interpolation
// itself lives in the engine implementations:
// - rubato: windowed-sinc engine with adjustable ratio

pub mod rubato;

pub use self::rubato::SincResampleEngine;

/// Errors reported by a resample engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResampleError {
    #[error("Invalid resample ratio {0}")]
    InvalidRatio(f64),

    #[error("Unsupported channel count {0}")]
    InvalidChannelCount(usize),

    #[error("Failed to create resampler: {0}")]
    Construction(String),

    #[error("Resampling failed: {0}")]
    Process(String),

    #[error("Output buffer holds {capacity} frames but the engine needs {needed}")]
    OutputTooSmall { capacity: usize, needed: usize },
}

/// Frame counts of one conversion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertResult {
    pub frames_consumed: usize,
    pub frames_generated: usize,
}

/// Streaming sample rate converter working on interleaved f32 frames
///
/// An engine may consume fewer frames than offered; the caller keeps the
/// remainder and offers it again on the next call.
pub trait ResampleEngine: Send {
    /// Convert as much of `input` as fits into `output` at `ratio` (output rate / input rate)
    fn convert(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut [f32],
    ) -> Result<ConvertResult, ResampleError>;

    /// Latency of the engine in output frames
    fn delay_frames(&self) -> f64 {
        0.0
    }

    /// Drop any buffered history
    fn reset(&mut self) {}
}

/// Builds an engine for a channel count
pub type EngineFactory =
    Box<dyn Fn(usize) -> Result<Box<dyn ResampleEngine>, ResampleError> + Send>;

/// Factory for the default best-quality engine
pub fn default_engine_factory() -> EngineFactory {
    Box::new(|channels: usize| -> Result<Box<dyn ResampleEngine>, ResampleError> {
        let engine = SincResampleEngine::create(channels)?;
        Ok(Box::new(engine) as Box<dyn ResampleEngine>)
    })
}
