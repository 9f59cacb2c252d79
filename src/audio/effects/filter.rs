use super::stage::{DspError, DspStage};
use super::{flush_denormal, s_to_z, AnalogBiquad, DigitalBiquad};
use crate::audio::config::{DspSettings, LowpassSettings};
use crate::audio::types::{Channel, ChannelLayout};
use colored::*;
use tracing::{debug, error, info};

const FILTER_SECTIONS: usize = 2;

/// Normalized 4th-order Butterworth prototype split into two biquads
const BUTTERWORTH_SECTIONS: [AnalogBiquad; FILTER_SECTIONS] = [
    AnalogBiquad { a0: 1.0, a1: 0.0, a2: 0.0, b0: 1.0, b1: 0.765367, b2: 1.0 },
    AnalogBiquad { a0: 1.0, a1: 0.0, a2: 0.0, b0: 1.0, b1: 1.847759, b2: 1.0 },
];

/// Fourth-order (24 dB/octave) low-pass applied to the LFE channel only
///
/// Every other channel passes through untouched.
#[derive(Debug)]
pub struct LfeLowpassFilter {
    settings: LowpassSettings,
    initialized: bool,
    sample_rate: u32,
    layout: ChannelLayout,
    channel_count: usize,
    lfe_channel: usize,
    /// Overall input gain of the cascade
    gain: f64,
    sections: [DigitalBiquad; FILTER_SECTIONS],
    /// `[history1, history2]` per section
    history: [[f64; 2]; FILTER_SECTIONS],
    returned_samples: usize,
}

impl LfeLowpassFilter {
    pub fn new(settings: LowpassSettings) -> Self {
        Self {
            settings,
            initialized: false,
            sample_rate: 0,
            layout: ChannelLayout::default(),
            channel_count: 0,
            lfe_channel: 0,
            gain: 1.0,
            sections: [DigitalBiquad::default(); FILTER_SECTIONS],
            history: [[0.0; 2]; FILTER_SECTIONS],
            returned_samples: 0,
        }
    }

    pub fn lfe_channel(&self) -> usize {
        self.lfe_channel
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.settings.cutoff_hz
    }

    /// Run one LFE sample through the cascade
    #[inline]
    fn filter_sample(&mut self, input: f64) -> f64 {
        let mut output = input * self.gain;

        for (section, history) in self.sections.iter().zip(self.history.iter_mut()) {
            let [history1, history2] = *history;

            let new_history = output - history1 * section.pole1 - history2 * section.pole2;
            output = new_history + history1 * section.zero1 + history2 * section.zero2;

            *history = [new_history, history1];
        }

        output
    }
}

impl Default for LfeLowpassFilter {
    fn default() -> Self {
        Self::new(LowpassSettings::default())
    }
}

impl DspStage for LfeLowpassFilter {
    fn name(&self) -> &'static str {
        "LFE_LPF"
    }

    fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError> {
        self.initialized = false;

        let Some(lfe_channel) = layout.index_of(Channel::LFE) else {
            error!("❌ {}: No LFE channel in [{}]", "LPF_INIT".red(), layout);
            return Err(DspError::MissingChannel {
                stage: self.name(),
                channel: Channel::LFE,
                layout: layout.clone(),
            });
        };

        let fs = sample_rate as f64;
        let fc = self.settings.cutoff_hz;
        if sample_rate == 0 || fc <= 0.0 || fc >= fs / 2.0 {
            error!(
                "❌ {}: Cutoff {}Hz is not usable at {}Hz",
                "LPF_INIT".red(),
                fc,
                sample_rate
            );
            return Err(DspError::InvalidSampleRate {
                stage: self.name(),
                sample_rate,
            });
        }

        let resonance = if self.settings.resonance > 0.0 {
            self.settings.resonance
        } else {
            1.0
        };

        let mut gain = 1.0;
        for (digital, analog) in self.sections.iter_mut().zip(BUTTERWORTH_SECTIONS.iter()) {
            let prototype = AnalogBiquad {
                b1: analog.b1 / resonance,
                ..*analog
            };
            *digital = s_to_z(&prototype, fc, fs, &mut gain);
        }

        self.gain = gain;
        self.history = [[0.0; 2]; FILTER_SECTIONS];
        self.sample_rate = sample_rate;
        self.layout = layout.clone();
        self.channel_count = layout.count();
        self.lfe_channel = lfe_channel;

        info!(
            "🔉 {}: LFE at index {} of [{}], {}Hz cutoff @ {}Hz, gain {:.3e}",
            "LPF_INIT".blue(),
            lfe_channel,
            layout,
            fc,
            sample_rate,
            gain
        );

        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) {
        self.initialized = false;
        self.gain = 1.0;
        self.sections = [DigitalBiquad::default(); FILTER_SECTIONS];
        self.history = [[0.0; 2]; FILTER_SECTIONS];
        self.returned_samples = 0;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn output_format(&self) -> (ChannelLayout, u32) {
        (self.layout.clone(), self.sample_rate)
    }

    fn process(&mut self, buffer: &mut [f32]) -> usize {
        self.returned_samples = buffer.len();
        if !self.initialized {
            return buffer.len();
        }

        let channels = self.channel_count;
        debug_assert!(buffer.len() % channels == 0, "partial frame passed to LFE filter");

        let lfe = self.lfe_channel;
        for frame in buffer.chunks_exact_mut(channels) {
            frame[lfe] = self.filter_sample(frame[lfe] as f64) as f32;
        }

        for history in self.history.iter_mut() {
            history[0] = flush_denormal(history[0]);
            history[1] = flush_denormal(history[1]);
        }

        buffer.len()
    }

    fn output<'a>(&'a self, processed: &'a [f32]) -> &'a [f32] {
        &processed[..self.returned_samples.min(processed.len())]
    }

    fn on_settings_changed(&mut self, name: &str, settings: &DspSettings) -> Result<(), DspError> {
        debug!("{}: setting '{}' changed, reinitializing", "LPF_SETTINGS".cyan(), name);
        self.settings = settings.lowpass.clone();
        if self.layout.is_empty() {
            return Ok(());
        }
        let layout = self.layout.clone();
        self.initialize(&layout, self.sample_rate)
    }
}
