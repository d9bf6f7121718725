//! # Spectrum Module
//!
//! Magnitude spectrum of an analysis window, used to refine time-domain pitch
//! estimates to sub-bin accuracy.
//!
//! ## Features
//! - FFT plan and scratch buffers allocated once per window size (RustFFT)
//! - DC offset removal and Hann windowing before the transform
//! - Log-parabolic peak interpolation around a rough estimate

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Computes magnitude spectra for windows of one fixed size.
pub struct SpectrumAnalyzer {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            window: hann_window(size),
            buffer: vec![Complex::default(); size],
            scratch,
            magnitudes: vec![0.0; size / 2],
        }
    }

    /// Transforms `signal` and returns the magnitudes up to the Nyquist frequency.
    ///
    /// # Arguments
    /// * `signal` - Exactly `size` samples; shorter input is zero-padded, longer is truncated
    pub fn magnitudes(&mut self, signal: &[f32]) -> &[f32] {
        let len = signal.len().min(self.size);
        let mean = if len > 0 {
            signal[..len].iter().sum::<f32>() / len as f32
        } else {
            0.0
        };

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < len { signal[i] - mean } else { 0.0 };
            *slot = Complex {
                re: sample * self.window[i],
                im: 0.0,
            };
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (magnitude, c) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *magnitude = c.norm(); // .norm() is sqrt(re^2 + im^2)
        }
        &self.magnitudes
    }
}

/// Hann window coefficients for `n` samples.
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Bins searched on each side of the rough estimate.
const SEARCH_RADIUS_BINS: usize = 2;

/// Refines a frequency estimate against a magnitude spectrum.
///
/// The strongest bin within [`SEARCH_RADIUS_BINS`] of the rough estimate is
/// taken as the peak, and a parabola through the log magnitudes of the peak and
/// its neighbours locates it to a fraction of a bin.
///
/// # Arguments
/// * `magnitudes` - Magnitude spectrum up to Nyquist, as from [`SpectrumAnalyzer::magnitudes`]
/// * `rough_freq` - Initial frequency estimate in Hz
/// * `sample_rate` - Sample rate in Hz
///
/// # Returns
/// * `Some(freq)` - The refined estimate, or `rough_freq` when the peak cannot be interpolated
/// * `None` - `rough_freq` is not positive or the spectrum is too short
pub fn refine_from_spectrum(magnitudes: &[f32], rough_freq: f32, sample_rate: u32) -> Option<f32> {
    if !(rough_freq > 0.0) || magnitudes.len() < 3 {
        return None;
    }
    let bin_hz = sample_rate as f32 / (magnitudes.len() * 2) as f32;
    let centre = (rough_freq / bin_hz).round() as usize;
    let last = magnitudes.len() - 1;
    let lo = centre.saturating_sub(SEARCH_RADIUS_BINS).max(1);
    let hi = (centre + SEARCH_RADIUS_BINS).min(last - 1);
    if lo > hi {
        return Some(rough_freq);
    }

    let peak = (lo..=hi)
        .max_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]))
        .unwrap_or(centre.clamp(1, last - 1));

    let [left, mid, right] = [peak - 1, peak, peak + 1].map(|bin| magnitudes[bin].ln());
    if !(left.is_finite() && mid.is_finite() && right.is_finite()) {
        return Some(rough_freq);
    }
    let curvature = left - 2.0 * mid + right;
    if curvature.abs() < 1e-6 {
        return Some(rough_freq);
    }

    let offset = 0.5 * (left - right) / curvature;
    let refined = (peak as f32 + offset) * bin_hz;
    Some(if refined.is_finite() && refined > 0.0 {
        refined
    } else {
        rough_freq
    })
}
