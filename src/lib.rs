pub mod audio;
pub mod log;

// Re-export the core types for testing and external use
pub use audio::{
    AudioFormat, Channel, ChannelLayout, DrcCompressor, DspChain, DspError, DspSettings,
    DspStage, HrtfCrossfeed, LfeLowpassFilter, RawStream, ResampleStage, SampleFormat,
    SinkService, StreamError, StreamHandle, StreamOptions,
};
pub use log::{init_logging, is_dsp_debug_enabled, set_dsp_debug};
