//! # YIN Estimator
//!
//! A YIN implementation tuned for plucked strings:
//! - RMS gate that reports silence below the power threshold
//! - First-dip search to avoid octave errors
//! - Clarity check that rejects noise
//! - Parabolic interpolation for sub-sample accuracy
//! - Optional refinement against the magnitude spectrum

use super::spectrum::{SpectrumAnalyzer, refine_from_spectrum};
use super::{EstimatorParams, PitchEstimator};

/// Lowest frequency reported; anything below is treated as no pitch.
const MIN_FREQUENCY: f32 = 20.0;

/// Tolerance above the global minimum that still counts as the first dip.
const DIP_TOLERANCE: f32 = 0.05;

pub struct YinEstimator {
    sample_rate: u32,
    power_threshold: f32,
    /// Largest normalized difference accepted as periodic (1 - clarity).
    aperiodicity_limit: f32,
    yin_buffer: Vec<f32>,
    spectrum: Option<SpectrumAnalyzer>,
}

impl YinEstimator {
    pub fn new(params: &EstimatorParams) -> Self {
        Self {
            sample_rate: params.sample_rate,
            power_threshold: params.power_threshold,
            aperiodicity_limit: 1.0 - params.clarity_threshold,
            yin_buffer: vec![0.0; params.analysis_size / 2],
            spectrum: params
                .refine_with_spectrum
                .then(|| SpectrumAnalyzer::new(params.analysis_size)),
        }
    }

    fn detect(&mut self, signal: &[f32]) -> Option<f32> {
        let half = self.yin_buffer.len();
        if half < 3 || signal.len() < half * 2 {
            return None;
        }

        // --- Noise Gate: Calculate RMS to filter out silence/noise ---
        let rms = (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt();
        if rms < self.power_threshold {
            return None;
        }

        let yin = &mut self.yin_buffer;

        // --- Difference function ---
        yin[0] = 0.0;
        for tau in 1..half {
            let mut diff = 0.0;
            for i in 0..half {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            yin[tau] = diff;
        }

        // --- Cumulative mean normalized difference ---
        let mut running_sum = 0.0;
        yin[0] = 1.0;
        for tau in 1..half {
            running_sum += yin[tau];
            if running_sum != 0.0 {
                yin[tau] *= tau as f32 / running_sum;
            } else {
                yin[tau] = 1.0;
            }
        }

        // --- First significant dip, then walk down to its bottom ---
        let min_val = yin.iter().skip(1).cloned().fold(f32::INFINITY, f32::min);
        let threshold = min_val + DIP_TOLERANCE;

        let mut period = 0;
        for tau in 2..half {
            if yin[tau] < threshold && yin[tau] < yin[tau - 1] {
                period = tau;
                break;
            }
        }
        while period > 0 && period + 1 < half && yin[period + 1] < yin[period] {
            period += 1;
        }

        // --- Clarity check: a clear tone has a very low normalized difference ---
        if period == 0 || yin[period] > self.aperiodicity_limit {
            return None;
        }
        if period + 1 >= half {
            return None;
        }

        // --- Parabolic interpolation ---
        let y1 = yin[period - 1];
        let y2 = yin[period];
        let y3 = yin[period + 1];
        let curvature = y1 - 2.0 * y2 + y3;
        let period_float = if curvature != 0.0 {
            period as f32 + (y1 - y3) / (2.0 * curvature)
        } else {
            period as f32
        };

        let frequency = self.sample_rate as f32 / period_float;
        if frequency.is_finite() && frequency > MIN_FREQUENCY {
            Some(frequency)
        } else {
            None
        }
    }
}

impl PitchEstimator for YinEstimator {
    fn estimate(&mut self, analysis: &[f32]) -> f32 {
        let Some(rough) = self.detect(analysis) else {
            return 0.0;
        };
        match self.spectrum.as_mut() {
            Some(spectrum) => {
                let magnitudes = spectrum.magnitudes(analysis);
                refine_from_spectrum(magnitudes, rough, self.sample_rate).unwrap_or(rough)
            }
            None => rough,
        }
    }

    fn name(&self) -> &'static str {
        "yin"
    }
}
