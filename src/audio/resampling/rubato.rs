use super::{ConvertResult, ResampleEngine, ResampleError};
use colored::*;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

/// Largest input chunk handed to rubato in one call
const MAX_CHUNK_FRAMES: usize = 1024;
/// How far the ratio may move before the resampler has to be rebuilt
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// Best-quality windowed-sinc converter built on rubato's `SincFixedIn`
///
/// The resampler is created on the first conversion, once the ratio is
/// known. Ratio updates inside the adjustable range are applied in place so
/// the filter history survives; larger jumps rebuild the resampler.
pub struct SincResampleEngine {
    channels: usize,
    resampler: Option<SincFixedIn<f32>>,
    /// Ratio the resampler was constructed with
    base_ratio: f64,
    /// Ratio currently applied
    ratio: f64,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
}

impl std::fmt::Debug for SincResampleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SincResampleEngine")
            .field("channels", &self.channels)
            .field("ratio", &self.ratio)
            .field("active", &self.resampler.is_some())
            .finish()
    }
}

impl SincResampleEngine {
    pub fn create(channels: usize) -> Result<Self, ResampleError> {
        if channels == 0 {
            return Err(ResampleError::InvalidChannelCount(channels));
        }

        Ok(Self {
            channels,
            resampler: None,
            base_ratio: 0.0,
            ratio: 0.0,
            input_buffer: vec![vec![0.0; MAX_CHUNK_FRAMES]; channels],
            output_buffer: vec![Vec::new(); channels],
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn build(&mut self, ratio: f64) -> Result<(), ResampleError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(
            ratio,
            MAX_RELATIVE_RATIO,
            params,
            MAX_CHUNK_FRAMES,
            self.channels,
        )
        .map_err(|e| ResampleError::Construction(e.to_string()))?;

        let max_output_frames = resampler.output_frames_max();
        for channel in self.output_buffer.iter_mut() {
            channel.resize(max_output_frames, 0.0);
        }

        info!(
            "🎯 {}: {} channel sinc resampler, ratio {:.5}, max {} output frames",
            "SINC_INIT".blue(),
            self.channels,
            ratio,
            max_output_frames
        );

        self.resampler = Some(resampler);
        self.base_ratio = ratio;
        self.ratio = ratio;
        Ok(())
    }

    fn apply_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        let in_range = ratio >= self.base_ratio / MAX_RELATIVE_RATIO
            && ratio <= self.base_ratio * MAX_RELATIVE_RATIO;

        match self.resampler.as_mut() {
            Some(resampler) if in_range => {
                if ratio != self.ratio {
                    resampler
                        .set_resample_ratio(ratio, false)
                        .map_err(|e| ResampleError::Process(e.to_string()))?;
                    debug!("{}: ratio {:.5} -> {:.5}", "SINC_RATIO".cyan(), self.ratio, ratio);
                    self.ratio = ratio;
                }
                Ok(())
            }
            _ => self.build(ratio),
        }
    }
}

impl ResampleEngine for SincResampleEngine {
    fn convert(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut [f32],
    ) -> Result<ConvertResult, ResampleError> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ResampleError::InvalidRatio(ratio));
        }

        let channels = self.channels;
        let input_frames = input.len() / channels;
        if input_frames == 0 {
            return Ok(ConvertResult::default());
        }

        self.apply_ratio(ratio)?;
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(ResampleError::Construction("resampler missing".to_string()));
        };

        let capacity = output.len() / channels;
        let mut chunk = input_frames.min(MAX_CHUNK_FRAMES);
        resampler
            .set_chunk_size(chunk)
            .map_err(|e| ResampleError::Process(e.to_string()))?;

        // Shrink the chunk until its output fits the caller's buffer
        while resampler.output_frames_next() > capacity && chunk > 1 {
            chunk /= 2;
            resampler
                .set_chunk_size(chunk)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
        }
        let needed = resampler.output_frames_next();
        if needed > capacity {
            return Err(ResampleError::OutputTooSmall { capacity, needed });
        }

        // De-interleave
        for (frame, samples) in input.chunks_exact(channels).take(chunk).enumerate() {
            for (ch, sample) in samples.iter().enumerate() {
                self.input_buffer[ch][frame] = *sample;
            }
        }

        let (frames_consumed, frames_generated) = resampler
            .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;

        // Interleave
        for (frame, samples) in output
            .chunks_exact_mut(channels)
            .take(frames_generated)
            .enumerate()
        {
            for (ch, sample) in samples.iter_mut().enumerate() {
                *sample = self.output_buffer[ch][frame];
            }
        }

        Ok(ConvertResult {
            frames_consumed,
            frames_generated,
        })
    }

    fn delay_frames(&self) -> f64 {
        self.resampler
            .as_ref()
            .map(|r| r.output_delay() as f64)
            .unwrap_or(0.0)
    }

    fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_sine(frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin() * 0.5;
                [s, s]
            })
            .collect()
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert_eq!(
            SincResampleEngine::create(0).unwrap_err(),
            ResampleError::InvalidChannelCount(0)
        );
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let mut engine = SincResampleEngine::create(2).unwrap();
        let mut out = vec![0.0; 64];
        let err = engine.convert(&[0.0; 8], 0.0, &mut out).unwrap_err();
        assert_eq!(err, ResampleError::InvalidRatio(0.0));
    }

    #[test]
    fn test_upsampling_generates_more_frames() {
        let mut engine = SincResampleEngine::create(2).unwrap();
        let input = stereo_sine(1024);
        let ratio = 48000.0 / 44100.0;
        let mut out = vec![0.0; (1024 * 2 + 64) * 2];

        let mut consumed = 0;
        let mut generated = 0;
        for _ in 0..4 {
            let result = engine.convert(&input, ratio, &mut out).unwrap();
            assert!(result.frames_consumed > 0);
            assert!(result.frames_generated * 2 <= out.len());
            consumed += result.frames_consumed;
            generated += result.frames_generated;
        }

        let observed = generated as f64 / consumed as f64;
        assert!((observed - ratio).abs() < 0.05, "observed ratio {}", observed);
    }

    #[test]
    fn test_ratio_jump_rebuilds() {
        let mut engine = SincResampleEngine::create(1).unwrap();
        let input = vec![0.0f32; 256];
        let mut out = vec![0.0; 256 * 8];
        engine.convert(&input, 1.0, &mut out).unwrap();
        engine.convert(&input, 1.5, &mut out).unwrap();
        assert_eq!(engine.base_ratio, 1.0);
        engine.convert(&input, 4.0, &mut out).unwrap();
        assert_eq!(engine.base_ratio, 4.0);
    }
}
