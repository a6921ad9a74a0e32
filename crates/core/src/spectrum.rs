//! One-sided power spectral density estimation.
//!
//! Used by the quality analyzer to measure high-frequency energy in the
//! velocity signal. Irregularly sampled trajectories are treated as uniform
//! at the rate implied by the mean inter-sample interval.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::kinematics::mean;

/// Frequency bins and their power density.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Periodogram {
    /// Bin centre frequencies in Hz, `0..=sample_rate / 2`.
    pub frequencies: Vec<f64>,
    /// Power spectral density per bin (signal units² / Hz).
    pub power: Vec<f64>,
}

impl Periodogram {
    /// Sum of the density over all bins strictly above `cutoff_hz`.
    pub fn power_above(&self, cutoff_hz: f64) -> f64 {
        self.frequencies
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| **f > cutoff_hz)
            .map(|(_, p)| p)
            .sum()
    }
}

/// Estimate a uniform sampling rate from per-sample intervals.
///
/// Returns `0.0` when there are no intervals or their mean is not positive.
pub fn estimate_sample_rate(deltas: &[f64]) -> f64 {
    let m = mean(deltas);
    if m > 0.0 {
        1.0 / m
    } else {
        0.0
    }
}

/// Periodogram of `signal` with constant detrend and one-sided density
/// scaling (`|X_k|² / (fs · N)`, doubled for all bins except DC and Nyquist).
pub fn periodogram(signal: &[f64], sample_rate: f64) -> Periodogram {
    let n = signal.len();
    if n < 2 || !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Periodogram::default();
    }

    let m = mean(signal);
    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x - m, 0.0)).collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let bins = n / 2 + 1;
    let scale = 1.0 / (sample_rate * n as f64);
    let nyquist_bin = (n % 2 == 0).then_some(n / 2);

    let mut frequencies = Vec::with_capacity(bins);
    let mut power = Vec::with_capacity(bins);
    for (k, c) in buffer.iter().take(bins).enumerate() {
        let mut p = c.norm_sqr() * scale;
        if k != 0 && Some(k) != nyquist_bin {
            p *= 2.0;
        }
        frequencies.push(k as f64 * sample_rate / n as f64);
        power.push(p);
    }

    Periodogram { frequencies, power }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (TAU * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn sample_rate_from_mean_interval() {
        assert!((estimate_sample_rate(&[0.1, 0.1, 0.1]) - 10.0).abs() < 1e-9);
        assert_eq!(estimate_sample_rate(&[]), 0.0);
    }

    #[test]
    fn constant_signal_has_no_power() {
        let p = periodogram(&[2.0; 64], 100.0);
        assert!(p.power.iter().all(|&x| x.abs() < 1e-20));
    }

    #[test]
    fn density_integrates_to_variance() {
        let fs = 100.0;
        let n = 100;
        let p = periodogram(&sine(5.0, fs, n), fs);
        let df = fs / n as f64;
        let total: f64 = p.power.iter().sum::<f64>() * df;
        assert!((total - 0.5).abs() < 1e-9, "total = {total}");
    }

    #[test]
    fn low_frequency_tone_has_no_power_above_cutoff() {
        let p = periodogram(&sine(2.0, 100.0, 100), 100.0);
        assert!(p.power_above(10.0) < 1e-12);
    }

    #[test]
    fn high_frequency_tone_lands_above_cutoff() {
        let p = periodogram(&sine(20.0, 100.0, 100), 100.0);
        assert!(p.power_above(10.0) > 0.1);
    }

    #[test]
    fn degenerate_inputs_yield_empty_periodogram() {
        assert_eq!(periodogram(&[1.0], 10.0), Periodogram::default());
        assert_eq!(periodogram(&[1.0, 2.0], 0.0), Periodogram::default());
    }
}
