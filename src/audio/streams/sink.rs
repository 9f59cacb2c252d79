use crate::audio::types::{ChannelLayout, SampleFormat};
use uuid::Uuid;

/// Identity of a stream as seen by the sink service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(Uuid);

impl StreamHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Narrow view of the output engine that a raw stream depends on
///
/// Latency and cache figures are the sink's own; streams add their
/// buffered frames on top.
#[cfg_attr(test, mockall::automock)]
pub trait SinkService: Send + Sync {
    fn pause_stream(&self, handle: StreamHandle);
    fn resume_stream(&self, handle: StreamHandle);

    /// Hardware plus sink buffering latency in seconds
    fn delay_seconds(&self) -> f64;
    fn cache_time_seconds(&self) -> f64;
    fn cache_total_seconds(&self) -> f64;

    fn sink_data_format(&self) -> SampleFormat;
    fn sink_channel_layout(&self) -> ChannelLayout;
}
