//! McLeod pitch method backend, wrapping the `pitch-detection` crate.

use super::{EstimatorParams, PitchEstimator};
use pitch_detection::detector::PitchDetector;
use pitch_detection::detector::mcleod::McLeodDetector;

pub struct McLeodEstimator {
    detector: McLeodDetector<f32>,
    sample_rate: usize,
    /// Power threshold in the detector's units (sum of squares over the window).
    power_threshold: f32,
    clarity_threshold: f32,
}

impl McLeodEstimator {
    pub fn new(params: &EstimatorParams) -> Self {
        let size = params.analysis_size;
        Self {
            detector: McLeodDetector::new(size, size / 2),
            sample_rate: params.sample_rate as usize,
            // The detector gates on total power; convert from an RMS level.
            power_threshold: params.power_threshold * params.power_threshold * size as f32,
            clarity_threshold: params.clarity_threshold,
        }
    }
}

impl PitchEstimator for McLeodEstimator {
    fn estimate(&mut self, analysis: &[f32]) -> f32 {
        self.detector
            .get_pitch(
                analysis,
                self.sample_rate,
                self.power_threshold,
                self.clarity_threshold,
            )
            .map(|pitch| pitch.frequency)
            .filter(|frequency| frequency.is_finite() && *frequency > 0.0)
            .unwrap_or(0.0)
    }

    fn name(&self) -> &'static str {
        "mcleod"
    }
}
