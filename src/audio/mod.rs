// Audio module - PCM processing core for Pcm Chain
//
// This module provides the engine core broken down into logical components:
// - types: Channel roles, layouts and sample formats
// - config: Settings snapshots handed to stages and streams
// - effects: DSP stages (resample, LFE low-pass, compressor, crossfeed) and the chain
// - resampling: Sample rate conversion engines
// - streams: Watermark-buffered raw streams feeding the sink

pub mod config;
pub mod effects;
pub mod resampling;
pub mod streams;
pub mod types;

// Re-export commonly used types for easier imports
pub use types::{AudioFormat, Channel, ChannelLayout, LayoutError, SampleFormat};

pub use config::{DrcSettings, DspSettings, HrtfSettings, LowpassSettings, StreamOptions};

pub use effects::{
    DrcCompressor, DspChain, DspError, DspStage, HrtfCrossfeed, HrtfModel, LfeLowpassFilter,
    ResampleStage, HRTF_MODELS,
};

pub use resampling::{ConvertResult, ResampleEngine, ResampleError, SincResampleEngine};

pub use streams::{Packet, RawStream, SinkService, StreamError, StreamHandle};
