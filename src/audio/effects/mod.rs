pub mod compressor;
pub mod crossfeed;
pub mod effects_chain;
pub mod filter;
pub mod resample;
pub mod stage;

pub use compressor::DrcCompressor;
pub use crossfeed::{HrtfCrossfeed, HrtfModel, HRTF_MODELS};
pub use effects_chain::DspChain;
pub use filter::LfeLowpassFilter;
pub use resample::ResampleStage;
pub use stage::{DspError, DspStage};

/// Magnitudes below this are flushed to zero between processing blocks
const DENORMAL_THRESHOLD: f64 = 1e-18;

/// One-pole smoothing coefficient for a time constant `tau` in seconds
///
/// Returns `1 - exp(-1 / (tau * sample_rate))`, or 1.0 (no smoothing) when
/// `tau` is not positive.
#[inline]
pub fn single_pole_coeff(sample_rate: f64, tau: f64) -> f64 {
    if tau > 0.0 {
        1.0 - (-1.0 / (tau * sample_rate)).exp()
    } else {
        1.0
    }
}

/// Exponential approach of `current` toward `target` by `coeff`
#[inline]
pub fn mix(target: f64, current: f64, coeff: f64) -> f64 {
    (target - current) * coeff + current
}

/// Flush values of subnormal magnitude to zero
#[inline]
pub fn flush_denormal(x: f64) -> f64 {
    if x.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        x
    }
}

/// Second-order analog prototype `(a0 + a1 s + a2 s^2) / (b0 + b1 s + b2 s^2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogBiquad {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

/// Normalized digital section: two pole terms and two zero terms
///
/// The section's own gain is folded into the cascade gain by [`bilinear`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DigitalBiquad {
    pub pole1: f64,
    pub pole2: f64,
    pub zero1: f64,
    pub zero2: f64,
}

/// Pre-warp the s-domain coefficients of one polynomial for cutoff `fc`
///
/// Returns the new `(c1, c2)`; `c0` is unchanged.
pub fn prewarp(c1: f64, c2: f64, fc: f64, fs: f64) -> (f64, f64) {
    let wp = 2.0 * fs * (std::f64::consts::PI * fc / fs).tan();
    (c1 / wp, c2 / (wp * wp))
}

/// Bilinear transform of an (already pre-warped) analog section
///
/// Multiplies the section gain into `gain` and returns the digital coefficients.
pub fn bilinear(analog: &AnalogBiquad, fs: f64, gain: &mut f64) -> DigitalBiquad {
    let AnalogBiquad { a0, a1, a2, b0, b1, b2 } = *analog;
    let fs2 = fs * fs;

    let ad = 4.0 * a2 * fs2 + 2.0 * a1 * fs + a0;
    let bd = 4.0 * b2 * fs2 + 2.0 * b1 * fs + b0;

    *gain *= ad / bd;

    DigitalBiquad {
        pole1: (2.0 * b0 - 8.0 * b2 * fs2) / bd,
        pole2: (4.0 * b2 * fs2 - 2.0 * b1 * fs + b0) / bd,
        zero1: (2.0 * a0 - 8.0 * a2 * fs2) / ad,
        zero2: (4.0 * a2 * fs2 - 2.0 * a1 * fs + a0) / ad,
    }
}

/// Pre-warp both polynomials for cutoff `fc` and transform to the z-domain
pub fn s_to_z(analog: &AnalogBiquad, fc: f64, fs: f64, gain: &mut f64) -> DigitalBiquad {
    let (a1, a2) = prewarp(analog.a1, analog.a2, fc, fs);
    let (b1, b2) = prewarp(analog.b1, analog.b2, fc, fs);

    let warped = AnalogBiquad {
        a1,
        a2,
        b1,
        b2,
        ..*analog
    };
    bilinear(&warped, fs, gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_pole_coeff_zero_tau() {
        assert_eq!(single_pole_coeff(48000.0, 0.0), 1.0);
        assert_eq!(single_pole_coeff(48000.0, -1.0), 1.0);
    }

    #[test]
    fn test_single_pole_coeff_known_value() {
        let coeff = single_pole_coeff(1000.0, 0.001);
        assert!((coeff - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn test_mix_moves_toward_target() {
        assert_eq!(mix(1.0, 0.0, 0.25), 0.25);
        assert_eq!(mix(1.0, 0.0, 1.0), 1.0);
        assert_eq!(mix(1.0, 0.5, 0.0), 0.5);
    }

    #[test]
    fn test_flush_denormal() {
        assert_eq!(flush_denormal(1e-300), 0.0);
        assert_eq!(flush_denormal(-1e-20), 0.0);
        assert_eq!(flush_denormal(0.5), 0.5);
        assert_eq!(flush_denormal(-1e-6), -1e-6);
    }

    #[test]
    fn test_bilinear_lowpass_has_unity_dc_gain() {
        let analog = AnalogBiquad {
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: std::f64::consts::SQRT_2,
            b2: 1.0,
        };
        let mut gain = 1.0;
        let section = s_to_z(&analog, 1000.0, 48000.0, &mut gain);

        // H(z=1) = gain * (1 + z1 + z2) / (1 + p1 + p2)
        let dc = gain * (1.0 + section.zero1 + section.zero2) / (1.0 + section.pole1 + section.pole2);
        assert!((dc - 1.0).abs() < 1e-9, "DC gain was {}", dc);
        assert!((section.zero1 - 2.0).abs() < 1e-12);
        assert!((section.zero2 - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn single_pole_coeff_in_unit_interval(rate in 1.0f64..768000.0, tau in 1e-6f64..60.0) {
            let coeff = single_pole_coeff(rate, tau);
            prop_assert!(coeff > 0.0 && coeff <= 1.0);
        }
    }
}
