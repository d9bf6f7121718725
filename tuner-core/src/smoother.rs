//! # Adaptive Smoothing Module
//!
//! A causal, time-windowed filter for raw pitch estimates. Recent estimates are
//! averaged with weights that decay exponentially with age, so a held note
//! settles quickly while single-frame jitter is damped. Silence resets the
//! filter so a new note never inherits the previous one.

use crate::config::SmoothingConfig;
use std::collections::VecDeque;
use tracing::trace;

/// A raw estimate with the monotonic time it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySample {
    pub value: f32,
    pub timestamp_ms: u64,
}

/// Exponentially weighted smoother over a bounded time window.
#[derive(Debug, Clone)]
pub struct AdaptiveSmoother {
    history: VecDeque<FrequencySample>,
    config: SmoothingConfig,
}

impl Default for AdaptiveSmoother {
    fn default() -> Self {
        Self::new(SmoothingConfig::default())
    }
}

impl AdaptiveSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.max_history + 1),
            config,
        }
    }

    /// Feeds one raw estimate and returns the smoothed frequency.
    ///
    /// # Arguments
    /// * `estimate` - Raw pitch in Hz; zero (or any non-positive value) means silence
    /// * `now_ms` - Monotonic time of the estimate in milliseconds
    ///
    /// # Returns
    /// * `0.0` on silence, after clearing the history
    /// * `estimate` unchanged while fewer than `min_samples` are held
    /// * Otherwise the weighted mean with weight `exp(-decay * age_seconds)`
    pub fn apply(&mut self, estimate: f32, now_ms: u64) -> f32 {
        if !(estimate > 0.0) || !estimate.is_finite() {
            self.history.clear();
            return 0.0;
        }

        // Keep the history ordered even if the caller's clock steps back.
        let now_ms = match self.history.back() {
            Some(last) if now_ms < last.timestamp_ms => {
                trace!(
                    "[SMOOTHER] Clock stepped back from {} to {} ms; clamping",
                    last.timestamp_ms,
                    now_ms
                );
                last.timestamp_ms
            }
            _ => now_ms,
        };

        self.history.push_back(FrequencySample {
            value: estimate,
            timestamp_ms: now_ms,
        });

        // Evict samples older than the window.
        while let Some(oldest) = self.history.front() {
            if now_ms - oldest.timestamp_ms > self.config.window_ms {
                self.history.pop_front();
            } else {
                break;
            }
        }

        // Enforce the hard capacity.
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }

        if self.history.len() < self.config.min_samples {
            return estimate;
        }

        let mut weighted_sum = 0.0_f32;
        let mut total_weight = 0.0_f32;
        for sample in &self.history {
            let age_seconds = (now_ms - sample.timestamp_ms) as f32 / 1000.0;
            let weight = (-self.config.decay_per_second * age_seconds).exp();
            weighted_sum += sample.value * weight;
            total_weight += weight;
        }

        weighted_sum / total_weight
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The retained samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &FrequencySample> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn timestamps(smoother: &AdaptiveSmoother) -> Vec<u64> {
        smoother.history().map(|s| s.timestamp_ms).collect()
    }

    #[test]
    fn silence_returns_zero_and_clears_history() {
        let mut smoother = AdaptiveSmoother::default();
        for t in [0, 10, 20, 30] {
            smoother.apply(110.0, t);
        }
        assert_eq!(smoother.len(), 4);

        assert_eq!(smoother.apply(0.0, 40), 0.0);
        assert!(smoother.is_empty());
        assert_eq!(smoother.apply(0.0, 50), 0.0);
    }

    #[test]
    fn passes_raw_value_until_three_samples() {
        let mut smoother = AdaptiveSmoother::default();
        assert_eq!(smoother.apply(100.0, 0), 100.0);
        assert_eq!(smoother.apply(120.0, 10), 120.0);
        let smoothed = smoother.apply(140.0, 20);
        assert!(smoothed > 100.0 && smoothed < 140.0);
    }

    #[test]
    fn weights_decay_with_age() {
        let mut smoother = AdaptiveSmoother::default();
        smoother.apply(100.0, 0);
        smoother.apply(100.0, 250);
        let smoothed = smoother.apply(200.0, 500);

        let w0 = (-2.0_f32 * 0.5).exp();
        let w1 = (-2.0_f32 * 0.25).exp();
        let expected = (100.0 * w0 + 100.0 * w1 + 200.0) / (w0 + w1 + 1.0);
        assert_relative_eq!(smoothed, expected, max_relative = 1e-5);
    }

    #[test]
    fn evicts_by_age_with_strict_boundary() {
        let mut smoother = AdaptiveSmoother::default();
        for t in [0, 100, 400, 600] {
            smoother.apply(110.0, t);
        }
        // At t = 600 the t = 0 sample is 600 ms old; t = 100 is exactly 500 ms and stays.
        assert_eq!(timestamps(&smoother), vec![100, 400, 600]);

        smoother.apply(110.0, 650);
        assert_eq!(timestamps(&smoother), vec![400, 600, 650]);
    }

    #[test]
    fn caps_history_at_capacity() {
        let mut smoother = AdaptiveSmoother::default();
        for i in 0..20u64 {
            smoother.apply(110.0 + i as f32, i * 10);
        }
        assert_eq!(smoother.len(), 15);
        assert_eq!(smoother.history().next().unwrap().timestamp_ms, 50);
    }

    #[test]
    fn steady_input_is_a_fixed_point() {
        let mut smoother = AdaptiveSmoother::default();
        let mut last = 0.0;
        for i in 0..30u64 {
            last = smoother.apply(196.0, i * 11);
        }
        assert_relative_eq!(last, 196.0, max_relative = 1e-6);
    }

    #[test]
    fn identical_sequences_give_identical_outputs() {
        let inputs = [(110.0, 0), (111.0, 12), (109.5, 23), (0.0, 35), (112.0, 47), (110.2, 58)];
        let run = || {
            let mut smoother = AdaptiveSmoother::default();
            inputs
                .iter()
                .map(|&(value, t)| smoother.apply(value, t))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn clock_stepping_back_keeps_history_ordered() {
        let mut smoother = AdaptiveSmoother::default();
        smoother.apply(110.0, 100);
        smoother.apply(110.0, 90);
        assert_eq!(timestamps(&smoother), vec![100, 100]);
    }
}
