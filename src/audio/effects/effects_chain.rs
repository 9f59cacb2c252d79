use super::compressor::DrcCompressor;
use super::crossfeed::HrtfCrossfeed;
use super::filter::LfeLowpassFilter;
use super::resample::ResampleStage;
use super::stage::{DspError, DspStage};
use crate::audio::config::DspSettings;
use crate::audio::types::{Channel, ChannelLayout};
use colored::*;
use tracing::{error, info};

/// Ordered sequence of DSP stages driven from the mixing thread
///
/// Each stage is initialized with the output format of the stage before it.
/// In-place stages work directly on the chain's buffer; stages with their
/// own output (the resampler) are copied back into it.
pub struct DspChain {
    stages: Vec<Box<dyn DspStage>>,
    work: Vec<f32>,
    scratch: Vec<f32>,
    input_layout: ChannelLayout,
    input_rate: u32,
    output_layout: ChannelLayout,
    output_rate: u32,
    initialized: bool,
}

impl std::fmt::Debug for DspChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DspChain")
            .field("stages", &self.stage_names())
            .field("input_layout", &self.input_layout)
            .field("input_rate", &self.input_rate)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl Default for DspChain {
    fn default() -> Self {
        Self::new()
    }
}

impl DspChain {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            work: Vec::new(),
            scratch: Vec::new(),
            input_layout: ChannelLayout::default(),
            input_rate: 0,
            output_layout: ChannelLayout::default(),
            output_rate: 0,
            initialized: false,
        }
    }

    /// Resample -> LFE low-pass -> DRC -> HRTF, keeping only stages `layout` can use
    ///
    /// The low-pass needs an LFE channel and the crossfeed needs plain stereo.
    pub fn standard(settings: &DspSettings, layout: &ChannelLayout) -> Self {
        let mut chain = Self::new();
        chain.push(Box::new(ResampleStage::new()));
        if layout.has_channel(Channel::LFE) {
            chain.push(Box::new(LfeLowpassFilter::new(settings.lowpass.clone())));
        }
        chain.push(Box::new(DrcCompressor::new(settings.drc.clone())));
        if layout.count() == 2 && layout.contains_channels(&ChannelLayout::stereo()) {
            chain.push(Box::new(HrtfCrossfeed::new(settings.hrtf.clone())));
        }
        chain
    }

    /// Append a stage; the chain must be initialized again afterwards
    pub fn push(&mut self, stage: Box<dyn DspStage>) {
        self.initialized = false;
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn initialize(&mut self, layout: &ChannelLayout, sample_rate: u32) -> Result<(), DspError> {
        self.initialized = false;

        let mut current = (layout.clone(), sample_rate);
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.initialize(&current.0, current.1) {
                error!("❌ {}: {} failed: {}", "CHAIN_INIT".red(), stage.name(), e);
                return Err(e);
            }
            current = stage.output_format();
            crate::dsp_debug!("{}: {} -> [{}] @ {}Hz", "CHAIN_INIT".cyan(), stage.name(), current.0, current.1);
        }

        self.input_layout = layout.clone();
        self.input_rate = sample_rate;
        (self.output_layout, self.output_rate) = current;

        info!(
            "⛓️ {}: [{}] {}Hz -> [{}] {}Hz through {:?}",
            "CHAIN_INIT".blue(),
            self.input_layout,
            self.input_rate,
            self.output_layout,
            self.output_rate,
            self.stage_names()
        );

        self.initialized = true;
        Ok(())
    }

    pub fn deinitialize(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.deinitialize();
        }
        self.work.clear();
        self.scratch.clear();
        self.initialized = false;
    }

    /// Run `input` through every stage, returning the input samples consumed
    ///
    /// The head stage decides how much input was taken; unconsumed samples
    /// must be offered again. The result is available from [`DspChain::output`].
    pub fn process(&mut self, input: &[f32]) -> usize {
        self.work.clear();
        if !self.initialized {
            return 0;
        }
        self.work.extend_from_slice(input);

        let mut consumed = input.len();
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let taken = stage.process(&mut self.work);
            if index == 0 {
                consumed = taken;
            }

            let out = stage.output(&self.work);
            let in_place = out.as_ptr() == self.work.as_ptr();
            let produced = out.len();
            if in_place {
                self.work.truncate(produced);
            } else {
                self.scratch.clear();
                self.scratch.extend_from_slice(out);
                std::mem::swap(&mut self.work, &mut self.scratch);
            }
        }

        consumed
    }

    /// Output of the last [`DspChain::process`] call
    pub fn output(&self) -> &[f32] {
        &self.work
    }

    pub fn output_format(&self) -> (ChannelLayout, u32) {
        (self.output_layout.clone(), self.output_rate)
    }

    pub fn delay_seconds(&self) -> f64 {
        self.stages.iter().map(|s| s.delay_seconds()).sum()
    }

    /// Hand a settings change to every stage; the first failure is returned
    pub fn on_settings_changed(&mut self, name: &str, settings: &DspSettings) -> Result<(), DspError> {
        let mut result = Ok(());
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.on_settings_changed(name, settings) {
                error!("❌ {}: {} rejected '{}': {}", "CHAIN_SETTINGS".red(), stage.name(), name, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Access a stage by position, e.g. to adjust a resampler's rate
    pub fn stage_mut(&mut self, index: usize) -> Option<&mut (dyn DspStage + 'static)> {
        self.stages.get_mut(index).map(|s| s.as_mut())
    }
}
