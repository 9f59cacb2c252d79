use super::stage::{DspError, DspStage};
use crate::audio::config::DspSettings;
use crate::audio::resampling::{default_engine_factory, EngineFactory, ResampleEngine};
use crate::audio::types::ChannelLayout;
use colored::*;
use tracing::{error, info, warn};

/// Extra output frames reserved on top of the ratio estimate
const OUTPUT_HEADROOM_FRAMES: usize = 64;

/// Sample-rate conversion stage backed by a pluggable [`ResampleEngine`]
///
/// The stage owns its output buffer, so [`DspStage::output`] ignores the
/// processed input and returns the converted samples instead.
pub struct ResampleStage {
    factory: EngineFactory,
    engine: Option<Box<dyn ResampleEngine>>,
    initialized: bool,
    layout: ChannelLayout,
    channel_count: usize,
    sample_rate: u32,
    output_rate: u32,
    /// Rate requested before initialization; `None` means pass-through rate
    requested_rate: Option<u32>,
    ratio: f64,
    buffer: Vec<f32>,
    generated_samples: usize,
    failed_calls: u64,
}

impl std::fmt::Debug for ResampleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResampleStage")
            .field("initialized", &self.initialized)
            .field("layout", &self.layout)
            .field("sample_rate", &self.sample_rate)
            .field("output_rate", &self.output_rate)
            .field("ratio", &self.ratio)
            .finish()
    }
}

impl ResampleStage {
    pub fn new() -> Self {
        Self::with_engine_factory(default_engine_factory())
    }

    /// Use a custom converter, e.g. a lighter one for low-power targets
    pub fn with_engine_factory(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: None,
            initialized: false,
            layout: ChannelLayout::default(),
            channel_count: 0,
            sample_rate: 0,
            output_rate: 0,
            requested_rate: None,
            ratio: 1.0,
            buffer: Vec::new(),
            generated_samples: 0,
            failed_calls: 0,
        }
    }

    /// Builder form of [`ResampleStage::set_sample_rate`]
    pub fn with_output_rate(mut self, output_rate: u32) -> Self {
        self.requested_rate = Some(output_rate);
        self
    }

    /// Set the output rate; the ratio follows as `output / input`
    pub fn set_sample_rate(&mut self, output_rate: u32) {
        self.requested_rate = Some(output_rate);
        if self.sample_rate == 0 {
            return;
        }
        self.output_rate = output_rate;
        self.ratio = output_rate as f64 / self.sample_rate as f64;
        info!(
            "🔄 {}: {}Hz -> {}Hz (ratio {:.5})",
            "RESAMPLE_RATE".cyan(),
            self.sample_rate,
            output_rate,
            self.ratio
        );
    }

    /// Set the ratio directly; the output rate follows as `ceil(ratio * input)`
    pub fn set_ratio(&mut self, ratio: f64) {
        if !ratio.is_finite() || ratio <= 0.0 {
            warn!("{}: ignoring ratio {}", "RESAMPLE_RATIO".yellow(), ratio);
            return;
        }
        self.ratio = ratio;
        if self.sample_rate > 0 {
            self.output_rate = (ratio * self.sample_rate as f64).ceil() as u32;
            self.requested_rate = Some(self.output_rate);
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

impl Default for ResampleStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DspStage for ResampleStage {
    fn name(&self) -> &'static str {
        "RESAMPLE"
    }

    fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError> {
        self.initialized = false;

        if layout.is_empty() {
            error!("❌ {}: empty channel layout", "RESAMPLE_INIT".red());
            return Err(DspError::UnsupportedLayout {
                stage: self.name(),
                layout: layout.clone(),
            });
        }
        if sample_rate == 0 {
            return Err(DspError::InvalidSampleRate {
                stage: self.name(),
                sample_rate,
            });
        }

        let output_rate = self.requested_rate.unwrap_or(sample_rate);
        if output_rate == 0 {
            return Err(DspError::InvalidSampleRate {
                stage: self.name(),
                sample_rate: output_rate,
            });
        }

        // Same channel count: keep the engine and drop its history
        let engine = match self.engine.take() {
            Some(mut engine) if self.channel_count == layout.count() => {
                engine.reset();
                engine
            }
            _ => (self.factory)(layout.count())?,
        };
        self.engine = Some(engine);

        self.layout = layout.clone();
        self.channel_count = layout.count();
        self.sample_rate = sample_rate;
        self.output_rate = output_rate;
        self.ratio = output_rate as f64 / sample_rate as f64;
        self.generated_samples = 0;
        self.failed_calls = 0;

        info!(
            "🔄 {}: [{}] {}Hz -> {}Hz (ratio {:.5})",
            "RESAMPLE_INIT".blue(),
            layout,
            sample_rate,
            output_rate,
            self.ratio
        );

        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) {
        self.initialized = false;
        self.engine = None;
        self.channel_count = 0;
        self.generated_samples = 0;
        self.buffer.clear();
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn output_format(&self) -> (ChannelLayout, u32) {
        (self.layout.clone(), self.output_rate)
    }

    fn process(&mut self, buffer: &mut [f32]) -> usize {
        self.generated_samples = 0;
        let Some(engine) = self.engine.as_mut().filter(|_| self.initialized) else {
            return 0;
        };

        let channels = self.channel_count;
        let frames = buffer.len() / channels;
        if frames == 0 {
            return 0;
        }

        // Grow-only scratch sized from the ratio estimate
        let needed_frames = frames * self.ratio.ceil().max(1.0) as usize + OUTPUT_HEADROOM_FRAMES;
        if self.buffer.len() < needed_frames * channels {
            self.buffer.resize(needed_frames * channels, 0.0);
        }

        match engine.convert(&buffer[..frames * channels], self.ratio, &mut self.buffer) {
            Ok(result) => {
                self.generated_samples = result.frames_generated * channels;
                result.frames_consumed * channels
            }
            Err(e) => {
                self.failed_calls += 1;
                if self.failed_calls == 1 || self.failed_calls % 1000 == 0 {
                    warn!(
                        "{}: conversion failed ({} times): {}",
                        "RESAMPLE_ERROR".red(),
                        self.failed_calls,
                        e
                    );
                }
                0
            }
        }
    }

    fn output<'a>(&'a self, _processed: &'a [f32]) -> &'a [f32] {
        &self.buffer[..self.generated_samples]
    }

    fn delay_seconds(&self) -> f64 {
        match &self.engine {
            Some(engine) if self.output_rate > 0 => engine.delay_frames() / self.output_rate as f64,
            _ => 0.0,
        }
    }

    fn on_settings_changed(&mut self, _name: &str, _settings: &DspSettings) -> Result<(), DspError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resampling::{ConvertResult, ResampleError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Nearest-neighbour converter with a fixed reported delay
    struct HoldEngine {
        channels: usize,
        phase: f64,
        resets: Arc<AtomicUsize>,
    }

    impl ResampleEngine for HoldEngine {
        fn convert(
            &mut self,
            input: &[f32],
            ratio: f64,
            output: &mut [f32],
        ) -> Result<ConvertResult, ResampleError> {
            let in_frames = input.len() / self.channels;
            let mut out_frames = 0;
            while out_frames * self.channels < output.len() {
                let src = (self.phase / ratio) as usize;
                if src >= in_frames {
                    break;
                }
                let dst = out_frames * self.channels;
                output[dst..dst + self.channels]
                    .copy_from_slice(&input[src * self.channels..(src + 1) * self.channels]);
                out_frames += 1;
                self.phase += 1.0;
            }
            self.phase -= in_frames as f64 * ratio;
            Ok(ConvertResult {
                frames_consumed: in_frames,
                frames_generated: out_frames,
            })
        }

        fn delay_frames(&self) -> f64 {
            48.0
        }

        fn reset(&mut self) {
            self.phase = 0.0;
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Stage over a hold engine, with counters for engine builds and resets
    fn counted_hold_stage() -> (ResampleStage, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let (b, r) = (builds.clone(), resets.clone());
        let stage = ResampleStage::with_engine_factory(Box::new(
            move |channels: usize| -> Result<Box<dyn ResampleEngine>, ResampleError> {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(HoldEngine {
                    channels,
                    phase: 0.0,
                    resets: r.clone(),
                }))
            },
        ));
        (stage, builds, resets)
    }

    fn hold_stage() -> ResampleStage {
        counted_hold_stage().0
    }

    #[test]
    fn test_pass_through_rate_by_default() {
        let mut stage = hold_stage();
        stage.initialize(&ChannelLayout::stereo(), 44100).unwrap();
        assert_eq!(stage.output_format().1, 44100);
        assert_eq!(stage.ratio(), 1.0);
    }

    #[test]
    fn test_rate_and_ratio_stay_consistent() {
        let mut stage = hold_stage().with_output_rate(48000);
        stage.initialize(&ChannelLayout::stereo(), 44100).unwrap();
        assert!((stage.ratio() - 48000.0 / 44100.0).abs() < 1e-12);

        stage.set_ratio(0.5);
        assert_eq!(stage.output_rate(), 22050);

        stage.set_sample_rate(96000);
        assert!((stage.ratio() - 96000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_doubling_rate_doubles_frames() {
        let mut stage = hold_stage().with_output_rate(96000);
        stage.initialize(&ChannelLayout::mono(), 48000).unwrap();

        let mut input: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let consumed = stage.process(&mut input);
        assert_eq!(consumed, 480);
        assert_eq!(stage.output(&input).len(), 960);
        assert_eq!(stage.output(&input)[1], 0.0);
        assert_eq!(stage.output(&input)[2], 1.0);
    }

    #[test]
    fn test_delay_reported_from_engine() {
        let mut stage = hold_stage();
        stage.initialize(&ChannelLayout::stereo(), 48000).unwrap();
        assert!((stage.delay_seconds() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_uninitialized_produces_nothing() {
        let mut stage = hold_stage();
        let mut input = vec![0.5f32; 64];
        assert_eq!(stage.process(&mut input), 0);
        assert!(stage.output(&input).is_empty());
    }

    #[test]
    fn test_engine_factory_failure_propagates() {
        let mut stage = ResampleStage::with_engine_factory(Box::new(
            |channels: usize| -> Result<Box<dyn ResampleEngine>, ResampleError> {
                Err(ResampleError::InvalidChannelCount(channels))
            },
        ));
        let err = stage.initialize(&ChannelLayout::stereo(), 48000).unwrap_err();
        assert_eq!(err, DspError::Resample(ResampleError::InvalidChannelCount(2)));
    }

    #[test]
    fn test_reinitialize_resets_engine_for_same_channel_count() {
        let (mut stage, builds, resets) = counted_hold_stage();
        stage.initialize(&ChannelLayout::stereo(), 44100).unwrap();
        stage.initialize(&ChannelLayout::stereo(), 48000).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        stage.initialize(&ChannelLayout::surround_5_1(), 48000).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        stage.deinitialize();
        stage.initialize(&ChannelLayout::surround_5_1(), 48000).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 3);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }
}
