use pcm_chain_lib::audio::{
    AudioFormat, ChannelLayout, RawStream, SampleFormat, SinkService, StreamHandle, StreamOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Sink with fixed latency figures that counts pause/resume notifications
#[derive(Default)]
struct CountingSink {
    paused: AtomicUsize,
    resumed: AtomicUsize,
}

impl SinkService for CountingSink {
    fn pause_stream(&self, _handle: StreamHandle) {
        self.paused.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_stream(&self, _handle: StreamHandle) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn delay_seconds(&self) -> f64 {
        0.02
    }

    fn cache_time_seconds(&self) -> f64 {
        0.0
    }

    fn cache_total_seconds(&self) -> f64 {
        0.0
    }

    fn sink_data_format(&self) -> SampleFormat {
        SampleFormat::S16
    }

    fn sink_channel_layout(&self) -> ChannelLayout {
        ChannelLayout::stereo()
    }
}

/// Sink that reads the stream's delay back while handling a resume
#[derive(Default)]
struct QueryingSink {
    stream: OnceLock<Weak<RawStream>>,
    delay_on_resume: parking_lot::Mutex<Option<f64>>,
}

impl SinkService for QueryingSink {
    fn pause_stream(&self, _handle: StreamHandle) {}

    fn resume_stream(&self, _handle: StreamHandle) {
        if let Some(stream) = self.stream.get().and_then(Weak::upgrade) {
            *self.delay_on_resume.lock() = Some(stream.get_delay());
        }
    }

    fn delay_seconds(&self) -> f64 {
        0.0
    }

    fn cache_time_seconds(&self) -> f64 {
        0.0
    }

    fn cache_total_seconds(&self) -> f64 {
        0.0
    }

    fn sink_data_format(&self) -> SampleFormat {
        SampleFormat::S16
    }

    fn sink_channel_layout(&self) -> ChannelLayout {
        ChannelLayout::stereo()
    }
}

/// Raw stream buffering, drain and producer/consumer behaviour
#[cfg(test)]
mod raw_stream_tests {
    use super::*;

    const RATE: u32 = 48000;
    const WATER_LEVEL: u32 = 4800;
    const PACKET_FRAMES: u32 = 480;
    const FRAME_BYTES: usize = 4;

    fn options() -> StreamOptions {
        StreamOptions {
            water_level_frames: Some(WATER_LEVEL),
            packet_frames: Some(PACKET_FRAMES),
            ..StreamOptions::default()
        }
    }

    /// Stereo S16 frames whose bytes encode the frame index
    fn counting_frames(start: u32, count: u32) -> Vec<u8> {
        (start..start + count).flat_map(|i| i.to_le_bytes()).collect()
    }

    #[test]
    fn test_water_level_worth_of_data_plays_out() {
        let sink = Arc::new(CountingSink::default());
        let stream = RawStream::new(sink, options());
        stream
            .initialize(AudioFormat::new(RATE, ChannelLayout::stereo(), SampleFormat::S16))
            .unwrap();

        let data = counting_frames(0, WATER_LEVEL);
        assert_eq!(stream.add_data(&data), data.len());

        let mut frame = [0u8; FRAME_BYTES];
        for expected in 0..WATER_LEVEL {
            assert!(stream.get_frame(&mut frame), "Frame {} missing", expected);
            assert_eq!(u32::from_le_bytes(frame), expected);
        }

        assert!(!stream.get_frame(&mut frame), "Queue should be exhausted");
        assert_eq!(stream.buffered_frames(), 0);
    }

    #[test]
    fn test_flush_then_read_returns_nothing() {
        let sink = Arc::new(CountingSink::default());
        let stream = RawStream::new(sink, options());
        stream.initialize_from_sink(RATE, RATE).unwrap();

        stream.add_data(&counting_frames(0, WATER_LEVEL + 100));
        stream.flush();

        assert!(!stream.get_frame(&mut [0u8; FRAME_BYTES]));
        // Only the sink's own latency remains
        assert!((stream.get_delay() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_pause_resume_notify_sink() {
        let sink = Arc::new(CountingSink::default());
        let stream = RawStream::new(sink.clone(), options());
        stream.initialize_from_sink(RATE, RATE).unwrap();

        stream.pause();
        stream.pause();
        stream.resume();
        stream.resume();

        assert_eq!(sink.paused.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resumed.load(Ordering::SeqCst), 1);
        assert!(!stream.is_paused());
    }

    #[test]
    fn test_producer_consumer_threads_preserve_order() {
        const TOTAL_FRAMES: u32 = PACKET_FRAMES * 40;

        let sink = Arc::new(CountingSink::default());
        let stream = Arc::new(RawStream::new(
            sink.clone(),
            StreamOptions {
                auto_start: true,
                ..options()
            },
        ));
        stream.initialize_from_sink(RATE, RATE).unwrap();

        let producer = {
            let stream = stream.clone();
            thread::spawn(move || {
                let data = counting_frames(0, TOTAL_FRAMES);
                let mut offset = 0;
                let deadline = Instant::now() + Duration::from_secs(10);
                while offset < data.len() && Instant::now() < deadline {
                    // Odd-sized writes exercise partial frames across packets
                    let end = (offset + 1234).min(data.len());
                    let taken = stream.add_data(&data[offset..end]);
                    if taken == 0 {
                        thread::sleep(Duration::from_micros(200));
                    }
                    offset += taken;
                }
                stream.drain();
                offset
            })
        };

        let mut received = Vec::with_capacity(TOTAL_FRAMES as usize);
        let mut frames = vec![0u8; 256 * FRAME_BYTES];
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            let count = stream.get_frames(&mut frames, 256);
            for frame in frames[..count * FRAME_BYTES].chunks_exact(FRAME_BYTES) {
                received.push(u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]));
            }
            if count == 0 {
                if stream.is_drained() {
                    break;
                }
                thread::sleep(Duration::from_micros(200));
            }
        }

        let sent = producer.join().unwrap();
        assert_eq!(sent, TOTAL_FRAMES as usize * FRAME_BYTES);
        assert_eq!(received.len(), TOTAL_FRAMES as usize);
        assert!(received.iter().enumerate().all(|(i, v)| *v == i as u32), "Frames out of order");
        assert_eq!(sink.resumed.load(Ordering::SeqCst), 1, "Auto-start should resume exactly once");
    }

    #[test]
    fn test_auto_start_sink_can_query_stream_on_resume() {
        let sink = Arc::new(QueryingSink::default());
        let stream = Arc::new(RawStream::new(
            sink.clone(),
            StreamOptions {
                auto_start: true,
                water_level_frames: Some(PACKET_FRAMES),
                packet_frames: Some(PACKET_FRAMES),
                ..StreamOptions::default()
            },
        ));
        stream.initialize_from_sink(RATE, RATE).unwrap();
        sink.stream.set(Arc::downgrade(&stream)).unwrap();

        let (done, finished) = mpsc::channel();
        {
            let stream = stream.clone();
            thread::spawn(move || {
                let taken = stream.add_data(&counting_frames(0, PACKET_FRAMES));
                let _ = done.send(taken);
            });
        }

        let taken = finished
            .recv_timeout(Duration::from_secs(3))
            .expect("add_data blocked while the sink was resuming");
        assert_eq!(taken, PACKET_FRAMES as usize * FRAME_BYTES);
        assert!(!stream.is_paused());

        let delay = (*sink.delay_on_resume.lock()).expect("Sink was never resumed");
        assert!((delay - PACKET_FRAMES as f64 / RATE as f64).abs() < 1e-12, "Delay on resume {}", delay);
    }
}
