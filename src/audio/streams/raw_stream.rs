use super::packet::Packet;
use super::sink::{SinkService, StreamHandle};
use super::StreamError;
use crate::audio::config::StreamOptions;
use crate::audio::types::{AudioFormat, ChannelLayout, SampleFormat};
use colored::*;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Underruns between two logged underrun lines
const UNDERRUN_LOG_INTERVAL: u64 = 100;

/// Consumer-visible state, guarded by the stream's reader/writer lock
#[derive(Debug, Default)]
struct StreamState {
    format: Option<AudioFormat>,
    frame_size: usize,
    packet_bytes: usize,
    /// Full packets waiting for the consumer
    queue: VecDeque<Packet>,
    /// Packet the consumer is reading from
    current: Option<Packet>,
    /// Drained packets kept for the producer to refill
    spare: Vec<Packet>,
    frames_buffered: usize,
    /// Frames still required before output starts again
    refill_buffer: usize,
    water_level: usize,
    valid: bool,
    pending_delete: bool,
    paused: bool,
    auto_start: bool,
    draining: bool,
    underruns: u64,
}

impl StreamState {
    fn sample_rate(&self) -> u32 {
        self.format.as_ref().map_or(0, |f| f.sample_rate)
    }

    fn queue_drained(&self) -> bool {
        self.current.as_ref().map_or(true, Packet::is_exhausted) && self.queue.is_empty()
    }

    fn recycle(&mut self, mut packet: Packet) {
        if packet.capacity() == self.packet_bytes {
            packet.clear();
            self.spare.push(packet);
        }
    }

    /// Drop everything queued for the consumer and re-arm buffering
    ///
    /// The producer's open packet is left alone.
    fn internal_flush(&mut self) {
        // The consumer may be mid-read, so the current packet is only exhausted
        if let Some(current) = self.current.as_mut() {
            current.seek_end();
        }
        while let Some(packet) = self.queue.pop_front() {
            self.recycle(packet);
        }
        self.frames_buffered = 0;
        self.refill_buffer = self.water_level;
    }

    fn space(&self, input: &Packet) -> usize {
        if !self.valid || self.draining || self.frames_buffered >= self.water_level {
            return 0;
        }
        (self.water_level - self.frames_buffered) * self.frame_size + input.free()
    }

    fn next_frame(&mut self, out: &mut [u8]) -> bool {
        if !self.valid || self.pending_delete || (self.refill_buffer > 0 && !self.draining) {
            return false;
        }

        if self.current.as_ref().map_or(true, Packet::is_exhausted) {
            if let Some(finished) = self.current.take() {
                self.recycle(finished);
            }

            match self.queue.pop_front() {
                Some(packet) => self.current = Some(packet),
                None if self.draining => return false,
                None => {
                    self.underruns += 1;
                    if self.underruns == 1 || self.underruns % UNDERRUN_LOG_INTERVAL == 0 {
                        debug!(
                            "{}: queue empty with {} frames buffered ({} underruns)",
                            "STREAM_UNDERRUN".yellow(),
                            self.frames_buffered,
                            self.underruns
                        );
                    }
                    self.refill_buffer = self.water_level.saturating_sub(self.frames_buffered);
                    return false;
                }
            }
        }

        let frame_size = self.frame_size;
        debug_assert!(out.len() >= frame_size, "frame buffer smaller than one frame");
        if out.len() < frame_size {
            return false;
        }

        let Some(frame) = self.current.as_mut().and_then(|p| p.read(frame_size)) else {
            return false;
        };
        out[..frame_size].copy_from_slice(frame);
        self.frames_buffered = self.frames_buffered.saturating_sub(1);
        true
    }
}

/// Watermark-buffered stream of raw frames in the sink's output format
///
/// One producer thread pushes bytes with [`RawStream::add_data`] and the
/// real-time consumer pulls frames with [`RawStream::get_frame`]. Nothing
/// blocks on a condition: backpressure and underruns show up as `0`/`false`.
///
/// Lock order is always the producer packet first, then the state.
pub struct RawStream {
    handle: StreamHandle,
    sink: Arc<dyn SinkService>,
    options: StreamOptions,
    /// Producer's open packet
    input: Mutex<Packet>,
    state: RwLock<StreamState>,
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStream")
            .field("handle", &self.handle)
            .field("options", &self.options)
            .finish()
    }
}

impl RawStream {
    /// Create an uninitialized stream; auto-start streams begin paused
    pub fn new(sink: Arc<dyn SinkService>, options: StreamOptions) -> Self {
        let state = StreamState {
            paused: options.paused || options.auto_start,
            auto_start: options.auto_start,
            ..StreamState::default()
        };

        Self {
            handle: StreamHandle::new(),
            sink,
            options,
            input: Mutex::new(Packet::with_capacity(0)),
            state: RwLock::new(state),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// (Re)initialize for `format`, flushing anything already queued
    pub fn initialize(&self, format: AudioFormat) -> Result<(), StreamError> {
        if format.sample_rate == 0 {
            return Err(StreamError::InvalidSampleRate(format.sample_rate));
        }
        let frame_size = format.frame_size();
        if frame_size == 0 {
            return Err(StreamError::InvalidFormat(format!(
                "zero frame size for {:?} [{}]",
                format.data_format, format.layout
            )));
        }

        let water_level = self
            .options
            .water_level_frames
            .unwrap_or(format.sample_rate) as usize;
        if water_level == 0 {
            return Err(StreamError::InvalidFormat(
                "water level must be at least one frame".to_string(),
            ));
        }
        let packet_frames = self
            .options
            .packet_frames
            .unwrap_or(format.sample_rate / 2)
            .max(1) as usize;
        let packet_bytes = packet_frames * frame_size;

        let mut input = self.input.lock();
        let mut state = self.state.write();
        if state.pending_delete {
            return Err(StreamError::Destroyed(self.handle));
        }
        if state.valid {
            state.internal_flush();
        }

        // Bytes already pushed stay valid if the packet geometry is unchanged
        if input.capacity() != packet_bytes {
            *input = Packet::with_capacity(packet_bytes);
            state.spare.clear();
        }

        state.frame_size = frame_size;
        state.packet_bytes = packet_bytes;
        state.water_level = water_level;
        state.refill_buffer = water_level;
        state.frames_buffered = 0;
        state.queue.clear();
        state.current = None;
        state.draining = false;
        state.underruns = 0;
        state.valid = true;

        info!(
            "🎚️ {}: {} [{}] {:?} @ {}Hz, {} byte frames, water level {} frames, {} frame packets",
            "RAW_STREAM_INIT".blue(),
            self.handle,
            format.layout,
            format.data_format,
            format.sample_rate,
            frame_size,
            water_level,
            packet_frames
        );

        state.format = Some(format);
        Ok(())
    }

    /// Initialize in the sink's data format and channel layout
    pub fn initialize_from_sink(&self, sample_rate: u32, encoded_rate: u32) -> Result<(), StreamError> {
        let format = AudioFormat::new(
            sample_rate,
            self.sink.sink_channel_layout(),
            self.sink.sink_data_format(),
        )
        .with_encoded_rate(encoded_rate);
        self.initialize(format)
    }

    /// Mark the stream for deletion; every later call is a no-op
    pub fn destroy(&self) {
        let mut state = self.state.write();
        state.valid = false;
        state.pending_delete = true;
        info!("🗑️ {}: {}", "RAW_STREAM_DESTROY".red(), self.handle);
    }

    /// Bytes `add_data` will accept right now
    pub fn get_space(&self) -> usize {
        let input = self.input.lock();
        self.state.read().space(&input)
    }

    /// Copy as much of `data` as the stream has space for, returning the bytes taken
    pub fn add_data(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let mut input = self.input.lock();
        let (size, frame_size, packet_bytes) = {
            let state = self.state.upgradable_read();
            if !state.valid {
                return 0;
            }

            let state = if state.draining {
                if !state.queue_drained() {
                    return 0;
                }
                let mut state = RwLockUpgradableReadGuard::upgrade(state);
                state.draining = false;
                debug!("{}: {} drained, accepting data again", "RAW_STREAM_DRAIN".cyan(), self.handle);
                RwLockWriteGuard::downgrade(state)
            } else {
                RwLockUpgradableReadGuard::downgrade(state)
            };

            (data.len().min(state.space(&input)), state.frame_size, state.packet_bytes)
        };
        if size == 0 {
            return 0;
        }

        let mut used = 0;
        let mut start = false;
        while used < size {
            used += input.push(&data[used..size]);

            if input.is_full() {
                let frames = input.used() / frame_size;

                let mut state = self.state.write();
                let fresh = state
                    .spare
                    .pop()
                    .unwrap_or_else(|| Packet::with_capacity(packet_bytes));
                let full = std::mem::replace(&mut *input, fresh);
                state.queue.push_back(full);
                state.frames_buffered += frames;
                state.refill_buffer = state.refill_buffer.saturating_sub(frames);
                start |= state.auto_start && state.frames_buffered >= state.water_level;
            }
        }
        drop(input);

        // The sink may query this stream from resume_stream
        if start {
            debug!("{}: {} reached water level", "RAW_STREAM_AUTOSTART".green(), self.handle);
            self.resume();
        }

        used
    }

    /// Copy the next frame into `out`
    ///
    /// Returns `false` while refilling, on underrun, or once a draining
    /// stream runs dry.
    pub fn get_frame(&self, out: &mut [u8]) -> bool {
        self.state.write().next_frame(out)
    }

    /// Copy up to `max_frames` frames into `out`, returning the frames copied
    pub fn get_frames(&self, out: &mut [u8], max_frames: usize) -> usize {
        let mut state = self.state.write();
        let frame_size = state.frame_size;
        if frame_size == 0 {
            return 0;
        }

        let mut frames = 0;
        for frame in out.chunks_exact_mut(frame_size).take(max_frames) {
            if !state.next_frame(frame) {
                break;
            }
            frames += 1;
        }
        frames
    }

    pub fn pause(&self) {
        {
            let mut state = self.state.write();
            if !state.valid || state.paused {
                return;
            }
            state.paused = true;
        }
        debug!("{}: {}", "RAW_STREAM_PAUSE".cyan(), self.handle);
        self.sink.pause_stream(self.handle);
    }

    /// Resume playback; this also disarms auto-start
    pub fn resume(&self) {
        {
            let mut state = self.state.write();
            if !state.valid || !state.paused {
                return;
            }
            state.paused = false;
            state.auto_start = false;
        }
        debug!("{}: {}", "RAW_STREAM_RESUME".cyan(), self.handle);
        self.sink.resume_stream(self.handle);
    }

    /// Play out what is buffered without waiting for the water level
    pub fn drain(&self) {
        let mut state = self.state.write();
        if state.pending_delete {
            return;
        }
        state.draining = true;
        debug!("{}: {} draining {} frames", "RAW_STREAM_DRAIN".cyan(), self.handle, state.frames_buffered);
    }

    pub fn is_drained(&self) -> bool {
        let state = self.state.read();
        state.draining && state.current.is_none() && state.queue.is_empty()
    }

    /// Discard all buffered data, including the producer's partial packet
    pub fn flush(&self) {
        let mut input = self.input.lock();
        let mut state = self.state.write();
        if state.pending_delete {
            return;
        }
        state.internal_flush();
        input.clear();
        debug!("{}: {}", "RAW_STREAM_FLUSH".cyan(), self.handle);
    }

    /// Seconds until data added now is heard, including the sink's latency
    pub fn get_delay(&self) -> f64 {
        let frames = {
            let input = self.input.lock();
            let state = self.state.read();
            if state.pending_delete {
                return 0.0;
            }
            buffered_seconds(&state, |state| input.used() / state.frame_size + state.frames_buffered)
        };
        self.sink.delay_seconds() + frames
    }

    /// Seconds of data currently cached, including the sink's cache
    pub fn get_cache_time(&self) -> f64 {
        let frames = {
            let input = self.input.lock();
            let state = self.state.read();
            if state.pending_delete {
                return 0.0;
            }
            buffered_seconds(&state, |state| {
                input.free() / state.frame_size + state.water_level.saturating_sub(state.refill_buffer)
            })
        };
        self.sink.cache_time_seconds() + frames
    }

    /// Seconds of data the stream and sink can cache at most
    pub fn get_cache_total(&self) -> f64 {
        let frames = {
            let input = self.input.lock();
            let state = self.state.read();
            if state.pending_delete {
                return 0.0;
            }
            buffered_seconds(&state, |state| input.capacity() / state.frame_size + state.water_level)
        };
        self.sink.cache_total_seconds() + frames
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn is_valid(&self) -> bool {
        self.state.read().valid
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.read().pending_delete
    }

    pub fn is_draining(&self) -> bool {
        self.state.read().draining
    }

    /// Output is withheld until the water level is reached again
    pub fn is_buffering(&self) -> bool {
        self.state.read().refill_buffer > 0
    }

    pub fn frame_size(&self) -> usize {
        self.state.read().frame_size
    }

    pub fn channel_count(&self) -> usize {
        self.state.read().format.as_ref().map_or(0, AudioFormat::channel_count)
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.read().sample_rate()
    }

    pub fn encoded_sample_rate(&self) -> u32 {
        self.state.read().format.as_ref().map_or(0, |f| f.encoded_rate)
    }

    pub fn data_format(&self) -> Option<SampleFormat> {
        self.state.read().format.as_ref().map(|f| f.data_format)
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.state
            .read()
            .format
            .as_ref()
            .map(|f| f.layout.clone())
            .unwrap_or_default()
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.read().frames_buffered
    }

    pub fn water_level(&self) -> usize {
        self.state.read().water_level
    }

    pub fn underrun_count(&self) -> u64 {
        self.state.read().underruns
    }
}

/// Convert a frame count to seconds, or 0 before initialization
fn buffered_seconds(state: &StreamState, frames: impl FnOnce(&StreamState) -> usize) -> f64 {
    let sample_rate = state.sample_rate();
    if !state.valid || state.frame_size == 0 || sample_rate == 0 {
        return 0.0;
    }
    frames(state) as f64 / sample_rate as f64
}
