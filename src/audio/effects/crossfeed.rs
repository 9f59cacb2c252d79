use super::stage::{DspError, DspStage};
use crate::audio::config::{DspSettings, HrtfSettings};
use crate::audio::types::ChannelLayout;
use colored::*;
use std::f64::consts::PI;
use tracing::{debug, error, info, warn};

/// Supported sample rate range; anything else runs at the default rate
const MIN_SAMPLE_RATE: u32 = 2000;
const MAX_SAMPLE_RATE: u32 = 384000;
const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Valid range of the cut frequency override (Hz)
pub const MIN_CUT_FREQUENCY: u32 = 300;
pub const MAX_CUT_FREQUENCY: u32 = 2000;

/// Valid range of the feed level override (tenths of a dB)
pub const MIN_FEED_LEVEL: u32 = 10;
pub const MAX_FEED_LEVEL: u32 = 150;

/// Valid range of the gain override
pub const MIN_GAIN: f64 = 0.7;
pub const MAX_GAIN: f64 = 1.2;

/// Named crossfeed preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrtfModel {
    pub name: &'static str,
    /// Low-pass cut frequency in Hz
    pub cut_frequency: u32,
    /// Crossfeed level at low frequencies in dB
    pub feed_level: f64,
}

/// Preset table; the first entry is the default
pub const HRTF_MODELS: [HrtfModel; 5] = [
    HrtfModel { name: "DEFAULT", cut_frequency: 700, feed_level: 3.5 },
    HrtfModel { name: "CMOY", cut_frequency: 700, feed_level: 6.0 },
    HrtfModel { name: "JMEIER", cut_frequency: 650, feed_level: 9.5 },
    HrtfModel { name: "WIDE", cut_frequency: 1200, feed_level: 1.1 },
    HrtfModel { name: "NARROW", cut_frequency: 600, feed_level: 1.1 },
];

/// Derived filter coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Coefficients {
    a0_lo: f64,
    b1_lo: f64,
    a0_hi: f64,
    a1_hi: f64,
    b1_hi: f64,
    gain: f64,
}

/// Last filtered values per channel
#[derive(Debug, Clone, Copy, Default)]
struct History {
    asis: [f64; 2],
    lo: [f64; 2],
    hi: [f64; 2],
}

/// Binaural crossfeed for headphone listening
///
/// Each channel is split into a low-passed copy that is fed to the opposite
/// ear and a high-boosted copy that stays on its own side.
#[derive(Debug)]
pub struct HrtfCrossfeed {
    settings: HrtfSettings,
    initialized: bool,
    sample_rate: u32,
    layout: ChannelLayout,
    cut_frequency: f64,
    feed_level: f64,
    coeffs: Coefficients,
    history: History,
    returned_samples: usize,
}

impl HrtfCrossfeed {
    pub fn new(settings: HrtfSettings) -> Self {
        Self {
            settings,
            initialized: false,
            sample_rate: 0,
            layout: ChannelLayout::default(),
            cut_frequency: 0.0,
            feed_level: 0.0,
            coeffs: Coefficients::default(),
            history: History::default(),
            returned_samples: 0,
        }
    }

    /// Low-pass cut frequency in effect (Hz)
    pub fn cut_frequency(&self) -> f64 {
        self.cut_frequency
    }

    /// Feed level in effect (dB)
    pub fn feed_level(&self) -> f64 {
        self.feed_level
    }

    /// Global output gain in effect
    pub fn gain(&self) -> f64 {
        self.coeffs.gain
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Pick cut frequency and feed level from the preset or the overrides
    fn resolve_parameters(&self) -> (f64, f64) {
        let default = HRTF_MODELS[0];
        let fallback = (default.cut_frequency as f64, default.feed_level);

        match self.settings.model.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                match HRTF_MODELS.iter().find(|m| m.name.eq_ignore_ascii_case(name)) {
                    Some(model) => (model.cut_frequency as f64, model.feed_level),
                    None => {
                        error!(
                            "❌ {}: Unknown crossfeed model '{}', using {}",
                            "HRTF_INIT".red(),
                            name,
                            default.name
                        );
                        fallback
                    }
                }
            }
            _ if !self.settings.has_overrides() => fallback,
            _ => {
                let cut = self.settings.cut_frequency_hz;
                let feed = self.settings.feed_level_db10;
                if (MIN_CUT_FREQUENCY..=MAX_CUT_FREQUENCY).contains(&cut)
                    && (MIN_FEED_LEVEL..=MAX_FEED_LEVEL).contains(&feed)
                {
                    (cut as f64, feed as f64 / 10.0)
                } else {
                    error!(
                        "❌ {}: Invalid crossfeed overrides (cut {}Hz, feed {} dB/10), using {}",
                        "HRTF_INIT".red(),
                        cut,
                        feed,
                        default.name
                    );
                    fallback
                }
            }
        }
    }

    fn compute_coefficients(&self, cut_frequency: f64, level: f64) -> Coefficients {
        let rate = self.sample_rate as f64;

        let gb_lo = level * -5.0 / 6.0 - 3.0;
        let gb_hi = level / 6.0 - 3.0;

        let g_lo = 10f64.powf(gb_lo / 20.0);
        let g_hi = 1.0 - 10f64.powf(gb_hi / 20.0);
        let fc_hi = cut_frequency * 2f64.powf((gb_lo - 20.0 * g_hi.log10()) / 12.0);

        let x_lo = (-2.0 * PI * cut_frequency / rate).exp();
        let x_hi = (-2.0 * PI * fc_hi / rate).exp();

        let gain = if (MIN_GAIN..=MAX_GAIN).contains(&self.settings.gain) {
            self.settings.gain
        } else {
            1.0 / ((1.0 - g_hi + g_lo) * 0.9)
        };

        Coefficients {
            a0_lo: g_lo * (1.0 - x_lo),
            b1_lo: x_lo,
            a0_hi: 1.0 - g_hi * (1.0 - x_hi),
            a1_hi: -x_hi,
            b1_hi: x_hi,
            gain,
        }
    }
}

impl Default for HrtfCrossfeed {
    fn default() -> Self {
        Self::new(HrtfSettings::default())
    }
}

impl DspStage for HrtfCrossfeed {
    fn name(&self) -> &'static str {
        "HRTF"
    }

    fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError> {
        self.initialized = false;

        if layout.count() != 2 || !layout.contains_channels(&ChannelLayout::stereo()) {
            error!(
                "❌ {}: Crossfeed needs a stereo layout, got [{}]",
                "HRTF_INIT".red(),
                layout
            );
            return Err(DspError::UnsupportedLayout {
                stage: self.name(),
                layout: layout.clone(),
            });
        }

        self.sample_rate = if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            sample_rate
        } else {
            warn!(
                "⚠️ {}: Sample rate {}Hz out of range, using {}Hz",
                "HRTF_INIT".yellow(),
                sample_rate,
                DEFAULT_SAMPLE_RATE
            );
            DEFAULT_SAMPLE_RATE
        };
        self.layout = layout.clone();

        let (cut_frequency, level) = self.resolve_parameters();
        self.cut_frequency = cut_frequency;
        self.feed_level = level;
        self.coeffs = self.compute_coefficients(cut_frequency, level);
        self.history = History::default();

        info!(
            "🎧 {}: {}Hz cut {:.0}Hz feed {:.1}dB gain {:.3}",
            "HRTF_INIT".blue(),
            self.sample_rate,
            cut_frequency,
            level,
            self.coeffs.gain
        );

        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) {
        self.initialized = false;
        self.coeffs = Coefficients::default();
        self.history = History::default();
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
        debug_assert!(buffer.len() % 2 == 0, "partial stereo frame passed to crossfeed");

        let c = self.coeffs;
        let h = &mut self.history;

        for frame in buffer.chunks_exact_mut(2) {
            let input = [frame[0] as f64, frame[1] as f64];

            for ch in 0..2 {
                h.lo[ch] = c.a0_lo * input[ch] + c.b1_lo * h.lo[ch];
                h.hi[ch] = c.a0_hi * input[ch] + c.a1_hi * h.asis[ch] + c.b1_hi * h.hi[ch];
                h.asis[ch] = input[ch];
            }

            frame[0] = ((h.hi[0] + h.lo[1]) * c.gain) as f32;
            frame[1] = ((h.hi[1] + h.lo[0]) * c.gain) as f32;
        }

        buffer.len()
    }

    fn output<'a>(&'a self, processed: &'a [f32]) -> &'a [f32] {
        &processed[..self.returned_samples.min(processed.len())]
    }

    fn on_settings_changed(&mut self, name: &str, settings: &DspSettings) -> Result<(), DspError> {
        debug!("{}: setting '{}' changed, reinitializing", "HRTF_SETTINGS".cyan(), name);
        self.settings = settings.hrtf.clone();
        if self.layout.is_empty() {
            return Ok(());
        }
        let layout = self.layout.clone();
        self.initialize(&layout, self.sample_rate)
    }
}
