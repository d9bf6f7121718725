//! # Configuration Module
//!
//! Runtime settings for the tuner pipeline. The defaults describe a guitar tuner
//! capturing mono float audio at 44.1 kHz with a 512-sample hop. Settings can be
//! loaded from a JSON file; any field missing from the file keeps its default.

use crate::error::{Result, TunerError};
use crate::estimator::EstimatorKind;
use crate::frames::SampleFormat;
use crate::target::{GuitarString, StringTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Parameters of the adaptive smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Samples older than this (relative to the newest estimate) are evicted.
    pub window_ms: u64,
    /// Hard capacity of the history.
    pub max_history: usize,
    /// Below this many samples the raw estimate is passed through.
    pub min_samples: usize,
    /// Exponential decay rate of a sample's weight, per second of age.
    pub decay_per_second: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            max_history: 15,
            min_samples: 3,
            decay_per_second: 2.0,
        }
    }
}

/// Complete configuration of a tuner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Requested capture rate in Hz.
    pub sample_rate: u32,
    /// Requested channel count. Frames are always down-mixed to mono.
    pub channels: u16,
    /// Preferred sample format when the device offers several.
    pub sample_format: SampleFormat,
    /// Samples per analysis frame (the estimator's hop).
    pub hop_size: usize,
    /// Analysis window length as a multiple of the hop size.
    pub analysis_multiplier: usize,
    pub estimator: EstimatorKind,
    /// RMS level below which the estimator reports silence.
    pub power_threshold: f32,
    /// Minimum periodicity clarity (0..1) for an estimate to count.
    pub clarity_threshold: f32,
    /// Refine YIN estimates against the FFT magnitude spectrum.
    pub refine_with_spectrum: bool,
    pub smoothing: SmoothingConfig,
    /// Auto mode only surfaces a string closer than this many Hz.
    pub match_threshold_hz: f32,
    /// Custom target frequencies, keyed by string name ("E2", "A", ...).
    pub string_overrides: BTreeMap<String, f32>,
    pub shutdown_timeout_ms: u64,
    /// Longest time the capture loop waits for audio before re-checking its stop flag.
    pub poll_interval_ms: u64,
    /// Chunks buffered between the device callback and the capture loop.
    pub device_queue_capacity: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            sample_format: SampleFormat::F32,
            hop_size: 512,
            analysis_multiplier: 4,
            estimator: EstimatorKind::Yin,
            power_threshold: 0.01,
            clarity_threshold: 0.9,
            refine_with_spectrum: false,
            smoothing: SmoothingConfig::default(),
            match_threshold_hz: 10.0,
            string_overrides: BTreeMap::new(),
            shutdown_timeout_ms: 500,
            poll_interval_ms: 20,
            device_queue_capacity: 256,
        }
    }
}

impl TunerConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - Path to a JSON document with any subset of the config fields
    ///
    /// # Returns
    /// * `Ok(config)` - Validated configuration
    /// * `Err(TunerError::Config)` - The file could not be read or parsed
    /// * `Err(TunerError::InvalidConfig)` - A value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| TunerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: TunerConfig =
            serde_json::from_str(data).map_err(|e| TunerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(invalid("channels must be at least 1"));
        }
        if self.hop_size == 0 {
            return Err(invalid("hop_size must be positive"));
        }
        if self.analysis_multiplier == 0 {
            return Err(invalid("analysis_multiplier must be at least 1"));
        }
        if !(self.power_threshold >= 0.0) {
            return Err(invalid("power_threshold must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.clarity_threshold) {
            return Err(invalid("clarity_threshold must lie in 0..=1"));
        }
        if !(self.match_threshold_hz > 0.0) {
            return Err(invalid("match_threshold_hz must be positive"));
        }
        let smoothing = &self.smoothing;
        if smoothing.max_history == 0 {
            return Err(invalid("smoothing.max_history must be positive"));
        }
        if smoothing.min_samples == 0 {
            return Err(invalid("smoothing.min_samples must be positive"));
        }
        if !(smoothing.decay_per_second >= 0.0) {
            return Err(invalid("smoothing.decay_per_second must be non-negative"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be positive"));
        }
        if self.device_queue_capacity == 0 {
            return Err(invalid("device_queue_capacity must be positive"));
        }
        self.string_table().map(|_| ())
    }

    /// Length of the estimator's analysis window in samples.
    pub fn analysis_size(&self) -> usize {
        self.hop_size * self.analysis_multiplier
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builds the string table, applying any configured overrides.
    pub fn string_table(&self) -> Result<StringTable> {
        let mut overrides = Vec::with_capacity(self.string_overrides.len());
        for (name, &frequency) in &self.string_overrides {
            let string: GuitarString = name.parse()?;
            if !(frequency > 0.0 && frequency.is_finite()) {
                return Err(invalid(&format!(
                    "string_overrides.{} must be a positive frequency",
                    name
                )));
            }
            overrides.push((string, frequency));
        }
        Ok(StringTable::with_overrides(&overrides))
    }
}

fn invalid(message: &str) -> TunerError {
    TunerError::InvalidConfig(message.to_string())
}
