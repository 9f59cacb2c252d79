use super::stage::{DspError, DspStage};
use super::{flush_denormal, mix, single_pole_coeff};
use crate::audio::config::{DrcSettings, DspSettings};
use crate::audio::types::{Channel, ChannelLayout};
use colored::*;
use tracing::{debug, error, info};

/// Floor applied to levels before taking logarithms
const MIN_VALUE: f64 = 1.0e-6;
/// Highest output level (natural log) allowed by clipping prevention
pub const CLIP_CEILING_LOG: f64 = -0.25;
/// dB to natural-log amplitude
const DB_TO_LOG: f64 = std::f64::consts::LN_10 / 20.0;

const RAMP_TIME: f64 = 0.05;
const AUTO_KNEE_MULT: f64 = 2.0;
const AUTO_MAX_ATTACK_TIME: f64 = 0.08;
const AUTO_MAX_RELEASE_TIME: f64 = 0.20;
const CREST_TIME: f64 = 0.2;
const ADAPT_TIME: f64 = 1.5;

/// Value that is ramped toward a target once per frame
#[derive(Debug, Clone, Copy, Default)]
struct Ramped {
    current: f64,
    target: f64,
}

impl Ramped {
    fn step(&mut self, coeff: f64) {
        self.current = mix(self.target, self.current, coeff);
    }
}

/// Self-adjusting dynamic range compressor
///
/// The sidechain is the louder of the front-left/front-right pair; the
/// resulting gain is applied to every channel of the frame. With automation
/// enabled the knee, makeup gain, attack and release adapt to the programme
/// material through crest-factor tracking and a slow control-voltage average.
#[derive(Debug)]
pub struct DrcCompressor {
    settings: DrcSettings,
    initialized: bool,

    sample_rate: u32,
    layout: ChannelLayout,
    channel_count: usize,
    channel_fl: usize,
    channel_fr: usize,

    ramp_coeff: f64,

    auto_knee: bool,
    auto_gain: bool,
    auto_attack: bool,
    auto_release: bool,
    no_clipping: bool,

    cv_release: f64,
    cv_attack: f64,
    cv_smooth: f64,

    log_threshold: Ramped,
    log_gain: Ramped,
    log_knee_width: f64,
    slope: f64,

    crest_peak: f64,
    crest_rms: f64,

    attack_time: f64,
    attack_coeff: f64,
    release_time: f64,
    release_coeff: f64,

    crest_coeff: f64,
    adapt_coeff: f64,

    last_gain: f64,
    returned_samples: usize,
}

impl DrcCompressor {
    pub fn new(settings: DrcSettings) -> Self {
        Self {
            settings,
            initialized: false,
            sample_rate: 0,
            layout: ChannelLayout::default(),
            channel_count: 0,
            channel_fl: 0,
            channel_fr: 0,
            ramp_coeff: 1.0,
            auto_knee: true,
            auto_gain: true,
            auto_attack: true,
            auto_release: true,
            no_clipping: true,
            cv_release: 0.0,
            cv_attack: 0.0,
            cv_smooth: 0.0,
            log_threshold: Ramped::default(),
            log_gain: Ramped::default(),
            log_knee_width: 0.0,
            slope: -1.0,
            crest_peak: MIN_VALUE,
            crest_rms: MIN_VALUE,
            attack_time: 0.0,
            attack_coeff: 1.0,
            release_time: 0.0,
            release_coeff: 1.0,
            crest_coeff: 1.0,
            adapt_coeff: 1.0,
            last_gain: 1.0,
            returned_samples: 0,
        }
    }

    /// Change the threshold; the active value ramps toward it without clicks
    pub fn set_threshold_db(&mut self, threshold_db: f64) {
        self.settings.threshold_db = threshold_db;
        self.log_threshold.target = threshold_db * DB_TO_LOG;
    }

    /// Change the static makeup gain (used when auto gain is off)
    pub fn set_gain_db(&mut self, gain_db: f64) {
        self.settings.gain_db = gain_db;
        self.log_gain.target = gain_db * DB_TO_LOG;
    }

    pub fn settings(&self) -> &DrcSettings {
        &self.settings
    }

    /// Linear gain multiplier applied to the most recent frame
    pub fn last_gain(&self) -> f64 {
        self.last_gain
    }

    /// Threshold currently in effect, in the natural-log domain
    pub fn current_log_threshold(&self) -> f64 {
        self.log_threshold.current
    }

    fn set_parameter_defaults(&mut self) {
        let rate = self.sample_rate as f64;
        let s = &self.settings;

        self.ramp_coeff = single_pole_coeff(rate, RAMP_TIME);

        self.cv_release = 0.0;
        self.cv_attack = 0.0;
        self.cv_smooth = 0.0;
        self.crest_peak = MIN_VALUE;
        self.crest_rms = MIN_VALUE;
        self.last_gain = 1.0;

        self.log_threshold = Ramped {
            current: 0.0,
            target: s.threshold_db * DB_TO_LOG,
        };
        self.log_gain = Ramped {
            current: 0.0,
            target: s.gain_db * DB_TO_LOG,
        };
        self.log_knee_width = s.knee_width_db * DB_TO_LOG;
        self.slope = s.slope - 1.0;
        self.attack_time = s.attack_time;
        self.release_time = s.release_time;

        self.auto_knee = s.auto_knee;
        self.auto_gain = s.auto_gain;
        self.auto_attack = s.auto_attack;
        self.auto_release = s.auto_release;
        self.no_clipping = s.prevent_clipping;

        self.attack_coeff = single_pole_coeff(rate, self.attack_time);
        self.release_coeff = single_pole_coeff(rate, self.release_time);
        self.crest_coeff = single_pole_coeff(rate, CREST_TIME);
        self.adapt_coeff = single_pole_coeff(rate, ADAPT_TIME);
    }

    /// Compute the linear gain for one frame from its sidechain magnitude
    fn process_sidechain(&mut self, in_abs: f64) -> f64 {
        let rate = self.sample_rate as f64;

        // Crest factor
        let in_square = (in_abs * in_abs).max(MIN_VALUE);
        self.crest_rms = mix(in_square, self.crest_rms, self.crest_coeff);
        self.crest_peak = mix(in_square, self.crest_peak, self.crest_coeff).max(in_square);
        let crest_square = self.crest_peak / self.crest_rms;

        // Attack and release adapt to transients
        let mut attack_time = self.attack_time;
        let mut attack_coeff = self.attack_coeff;
        if self.auto_attack {
            attack_time = 2.0 * AUTO_MAX_ATTACK_TIME / crest_square;
            attack_coeff = single_pole_coeff(rate, attack_time);
        }

        let mut release_coeff = self.release_coeff;
        if self.auto_release {
            let release_time = 2.0 * AUTO_MAX_RELEASE_TIME / crest_square;
            release_coeff = single_pole_coeff(rate, release_time - attack_time);
        }

        let log_in = in_abs.max(MIN_VALUE).ln();
        let overshoot = log_in - self.log_threshold.current;

        let slope = if self.auto_knee { -1.0 } else { self.slope };

        // Expected average control voltage
        let cv_estimate = self.log_threshold.current * -slope * 0.5;

        let knee_width = if self.auto_knee {
            (-(self.cv_smooth + cv_estimate) * AUTO_KNEE_MULT).max(0.0)
        } else {
            self.log_knee_width
        };

        let half_knee = knee_width * 0.5;
        let mut cv = if overshoot >= half_knee {
            overshoot
        } else if overshoot > -half_knee {
            (overshoot + half_knee).powi(2) / (2.0 * knee_width)
        } else {
            0.0
        };

        cv *= -slope;

        self.cv_release = cv.max(mix(cv, self.cv_release, release_coeff));
        self.cv_attack = mix(self.cv_release, self.cv_attack, attack_coeff);

        let mut cv = -self.cv_attack;

        self.cv_smooth = mix(cv - cv_estimate, self.cv_smooth, self.adapt_coeff);

        if self.auto_gain {
            if self.no_clipping && log_in + cv - (self.cv_smooth + cv_estimate) > CLIP_CEILING_LOG {
                self.cv_smooth = log_in + cv - cv_estimate - CLIP_CEILING_LOG;
            }
            cv -= (self.cv_smooth + cv_estimate) * 0.8;
        } else {
            cv += self.log_gain.current;
        }

        cv.exp()
    }

    fn kill_denormals(&mut self) {
        self.cv_attack = flush_denormal(self.cv_attack);
        self.cv_release = flush_denormal(self.cv_release);
        self.cv_smooth = flush_denormal(self.cv_smooth);
        self.crest_rms = flush_denormal(self.crest_rms);
        self.crest_peak = flush_denormal(self.crest_peak);
        self.log_threshold.current = flush_denormal(self.log_threshold.current);
        self.log_gain.current = flush_denormal(self.log_gain.current);
    }
}

impl Default for DrcCompressor {
    fn default() -> Self {
        Self::new(DrcSettings::default())
    }
}

impl DspStage for DrcCompressor {
    fn name(&self) -> &'static str {
        "DRC"
    }

    fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError> {
        self.initialized = false;

        if layout.is_empty() {
            error!("❌ {}: Cannot compress an empty channel layout", "DRC_INIT".red());
            return Err(DspError::UnsupportedLayout {
                stage: self.name(),
                layout: layout.clone(),
            });
        }
        if sample_rate == 0 {
            error!("❌ {}: Invalid sample rate 0Hz", "DRC_INIT".red());
            return Err(DspError::InvalidSampleRate {
                stage: self.name(),
                sample_rate,
            });
        }

        self.sample_rate = sample_rate;
        self.layout = layout.clone();
        self.channel_count = layout.count();

        self.set_parameter_defaults();

        self.channel_fl = layout.index_of(Channel::FL).unwrap_or(0);
        self.channel_fr = layout.index_of(Channel::FR).unwrap_or(0);
        if self.channel_count == 1 {
            self.channel_fr = self.channel_fl;
        }

        info!(
            "🎚️ {}: [{}] @ {}Hz sidechain FL={} FR={} threshold {:.1}dB auto(knee={}, gain={}, attack={}, release={})",
            "DRC_INIT".blue(),
            layout,
            sample_rate,
            self.channel_fl,
            self.channel_fr,
            self.settings.threshold_db,
            self.auto_knee,
            self.auto_gain,
            self.auto_attack,
            self.auto_release
        );

        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) {
        self.initialized = false;
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
        debug_assert!(buffer.len() % channels == 0, "partial frame passed to DRC");

        for frame in buffer.chunks_exact_mut(channels) {
            let in_abs = frame[self.channel_fl].abs().max(frame[self.channel_fr].abs());

            let gain = self.process_sidechain(in_abs as f64);
            let mult = gain as f32;
            for sample in frame.iter_mut() {
                *sample *= mult;
            }
            self.last_gain = gain;

            self.log_threshold.step(self.ramp_coeff);
            self.log_gain.step(self.ramp_coeff);
        }

        self.kill_denormals();
        crate::dsp_debug!(
            "{}: {} frames, gain {:.4}, threshold {:.3}",
            "DRC_BLOCK".cyan(),
            buffer.len() / channels,
            self.last_gain,
            self.log_threshold.current
        );
        buffer.len()
    }

    fn output<'a>(&'a self, processed: &'a [f32]) -> &'a [f32] {
        &processed[..self.returned_samples.min(processed.len())]
    }

    fn on_settings_changed(&mut self, name: &str, settings: &DspSettings) -> Result<(), DspError> {
        debug!("{}: setting '{}' changed, reinitializing", "DRC_SETTINGS".cyan(), name);
        self.settings = settings.drc.clone();
        if self.layout.is_empty() {
            return Ok(());
        }
        let layout = self.layout.clone();
        self.initialize(&layout, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_settings(threshold_db: f64, knee_width_db: f64, slope: f64) -> DrcSettings {
        DrcSettings {
            threshold_db,
            knee_width_db,
            slope,
            gain_db: 0.0,
            attack_time: 0.0,
            release_time: 0.0,
            auto_knee: false,
            auto_gain: false,
            auto_attack: false,
            auto_release: false,
            prevent_clipping: false,
        }
    }

    #[test]
    fn test_empty_layout_fails() {
        let mut drc = DrcCompressor::default();
        let result = drc.initialize(&ChannelLayout::default(), 48000);
        assert!(matches!(result, Err(DspError::UnsupportedLayout { .. })));
        assert!(!drc.is_initialized());
    }

    #[test]
    fn test_mono_sidechain_collapses_to_single_channel() {
        let mut drc = DrcCompressor::default();
        drc.initialize(&ChannelLayout::mono(), 48000).unwrap();
        assert_eq!(drc.channel_fl, 0);
        assert_eq!(drc.channel_fr, 0);

        drc.initialize(&ChannelLayout::surround_5_1(), 48000).unwrap();
        assert_eq!(drc.channel_fl, 0);
        assert_eq!(drc.channel_fr, 1);
    }

    #[test]
    fn test_output_format_matches_input() {
        let mut drc = DrcCompressor::default();
        drc.initialize(&ChannelLayout::stereo(), 44100).unwrap();
        assert_eq!(drc.output_format(), (ChannelLayout::stereo(), 44100));
    }

    #[test]
    fn test_threshold_ramps_toward_target() {
        let mut drc = DrcCompressor::new(manual_settings(-12.0, 0.0, 0.0));
        drc.initialize(&ChannelLayout::mono(), 48000).unwrap();
        assert_eq!(drc.current_log_threshold(), 0.0);

        let mut block = vec![0.0f32; 480];
        drc.process(&mut block);
        let after_10ms = drc.current_log_threshold();
        let target = -12.0 * DB_TO_LOG;
        assert!(after_10ms < 0.0 && after_10ms > target);

        let mut block = vec![0.0f32; 48000];
        drc.process(&mut block);
        assert!((drc.current_log_threshold() - target).abs() < 1e-6);
    }

    #[test]
    fn test_hard_limit_matches_closed_form() {
        let threshold_db = -12.0;
        let mut drc = DrcCompressor::new(manual_settings(threshold_db, 0.0, 0.0));
        drc.initialize(&ChannelLayout::mono(), 48000).unwrap();

        let mut block = vec![0.9f32; 48000];
        drc.process(&mut block);

        // slope -1 limits exactly to the threshold
        let expected = (threshold_db * DB_TO_LOG).exp() as f32;
        let last = *block.last().unwrap();
        assert!((last - expected).abs() < 1e-4, "got {} expected {}", last, expected);
    }

    /// Output level once the ramps have settled on a constant input
    fn settled_output(settings: DrcSettings, level: f32) -> f64 {
        let mut drc = DrcCompressor::new(settings);
        drc.initialize(&ChannelLayout::mono(), 48000).unwrap();
        let mut block = vec![level; 48000];
        drc.process(&mut block);
        *block.last().unwrap() as f64
    }

    #[test]
    fn test_soft_knee_matches_closed_form() {
        let (threshold_db, knee_db) = (-12.0, 12.0);
        let level = 10f64.powf(-10.0 / 20.0);
        let got = settled_output(manual_settings(threshold_db, knee_db, 0.0), level as f32);

        // 2dB over the threshold sits inside the 12dB knee
        let overshoot = level.ln() - threshold_db * DB_TO_LOG;
        let knee = knee_db * DB_TO_LOG;
        assert!(overshoot.abs() < knee * 0.5);
        let cv = (overshoot + knee * 0.5).powi(2) / (2.0 * knee);
        let expected = level * (-cv).exp();
        assert!((got - expected).abs() < 1e-5, "got {} expected {}", got, expected);
    }

    #[test]
    fn test_partial_slope_matches_closed_form() {
        let threshold_db = -12.0;
        let got = settled_output(manual_settings(threshold_db, 0.0, 0.5), 0.9);

        // Half of the overshoot is removed
        let log_in = 0.9f32.ln() as f64;
        let expected = (log_in - 0.5 * (log_in - threshold_db * DB_TO_LOG)).exp();
        assert!((got - expected).abs() < 1e-5, "got {} expected {}", got, expected);
    }

    #[test]
    fn test_static_gain_below_threshold() {
        let mut settings = manual_settings(-6.0, 0.0, 0.0);
        settings.gain_db = 6.0;
        let got = settled_output(settings, 0.1);

        let expected = 0.1f32 as f64 * (6.0 * DB_TO_LOG).exp();
        assert!((got - expected).abs() < 1e-5, "got {} expected {}", got, expected);
    }

    #[test]
    fn test_settings_change_reinitializes() {
        let mut drc = DrcCompressor::default();
        drc.initialize(&ChannelLayout::stereo(), 48000).unwrap();

        let mut settings = DspSettings::default();
        settings.drc.threshold_db = -20.0;
        drc.on_settings_changed("drc.threshold_db", &settings).unwrap();

        assert!(drc.is_initialized());
        assert_eq!(drc.settings().threshold_db, -20.0);
        assert_eq!(drc.log_threshold.target, -20.0 * DB_TO_LOG);
    }

    #[test]
    fn test_state_is_flushed_after_block() {
        let mut drc = DrcCompressor::new(manual_settings(-6.0, 6.0, 0.5));
        drc.initialize(&ChannelLayout::stereo(), 48000).unwrap();
        drc.cv_attack = 1e-30;
        drc.cv_release = -1e-25;
        let mut block = vec![0.0f32; 2];
        drc.process(&mut block);
        assert_eq!(drc.cv_attack, 0.0);
        assert_eq!(drc.cv_release, 0.0);
    }
}
