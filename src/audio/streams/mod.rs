// Streams module - producer/consumer buffering between decoders and the sink
//
// - packet: fixed-capacity byte packets handed from producer to consumer
// - sink: the narrow sink-service interface streams report to
// - raw_stream: watermark-buffered stream of frames in the sink's format

pub mod packet;
pub mod raw_stream;
pub mod sink;

pub use packet::Packet;
pub use raw_stream::RawStream;
pub use sink::{SinkService, StreamHandle};

#[cfg(test)]
pub use sink::MockSinkService;

/// Errors reported when a stream is (re)initialized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid stream sample rate {0}Hz")]
    InvalidSampleRate(u32),

    #[error("Invalid stream format: {0}")]
    InvalidFormat(String),

    #[error("Stream {0} has been destroyed")]
    Destroyed(StreamHandle),
}
