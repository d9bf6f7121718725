//! # Pitch Estimation Module
//!
//! The fundamental-frequency algorithm is a replaceable backend behind the
//! [`PitchEstimator`] trait. [`PitchEstimatorAdapter`] owns the fixed-size
//! buffers the backend works on and turns each hop-sized
//! [`AudioFrame`](crate::frames::AudioFrame) into a single estimate in Hz,
//! where 0 means "no pitch".
//!
//! ## Backends
//! - [`yin::YinEstimator`]: YIN with octave-error prevention, optionally refined
//!   against the magnitude spectrum
//! - [`mcleod::McLeodEstimator`]: the McLeod pitch method from `pitch-detection`

pub mod mcleod;
pub mod spectrum;
pub mod yin;

use crate::config::TunerConfig;
use crate::error::{Result, TunerError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Smallest analysis window any backend accepts.
pub const MIN_ANALYSIS_SIZE: usize = 64;

/// A fundamental-frequency estimator.
///
/// Implementations keep whatever internal state they need for a fixed
/// `(sample_rate, analysis_size, hop_size)` triple. They are built inside the
/// capture thread and never leave it.
pub trait PitchEstimator {
    /// Estimates the pitch of an analysis window.
    ///
    /// Returns the frequency in Hz, or 0.0 when no pitch is discernible.
    fn estimate(&mut self, analysis: &[f32]) -> f32;

    fn name(&self) -> &'static str;
}

/// Which backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    Yin,
    McLeod,
}

/// Parameters shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorParams {
    pub sample_rate: u32,
    pub analysis_size: usize,
    pub hop_size: usize,
    /// RMS level below which the window counts as silence.
    pub power_threshold: f32,
    /// Required periodicity clarity in 0..=1.
    pub clarity_threshold: f32,
    pub refine_with_spectrum: bool,
}

impl EstimatorParams {
    /// Takes the estimator settings from a config and the negotiated sample rate.
    pub fn from_config(config: &TunerConfig, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            analysis_size: config.analysis_size(),
            hop_size: config.hop_size,
            power_threshold: config.power_threshold,
            clarity_threshold: config.clarity_threshold,
            refine_with_spectrum: config.refine_with_spectrum,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(TunerError::EstimatorInit("sample rate is zero".into()));
        }
        if self.hop_size == 0 {
            return Err(TunerError::EstimatorInit("hop size is zero".into()));
        }
        if self.analysis_size < self.hop_size {
            return Err(TunerError::EstimatorInit(format!(
                "analysis window ({}) is shorter than the hop ({})",
                self.analysis_size, self.hop_size
            )));
        }
        if self.analysis_size < MIN_ANALYSIS_SIZE {
            return Err(TunerError::EstimatorInit(format!(
                "analysis window ({}) is below the minimum of {} samples",
                self.analysis_size, MIN_ANALYSIS_SIZE
            )));
        }
        Ok(())
    }
}

/// Builds the requested backend.
///
/// # Returns
/// * `Err(TunerError::EstimatorInit)` - The parameters cannot drive an estimator
pub fn build_estimator(
    kind: EstimatorKind,
    params: &EstimatorParams,
) -> Result<Box<dyn PitchEstimator>> {
    params.validate()?;
    let estimator: Box<dyn PitchEstimator> = match kind {
        EstimatorKind::Yin => Box::new(yin::YinEstimator::new(params)),
        EstimatorKind::McLeod => Box::new(mcleod::McLeodEstimator::new(params)),
    };
    Ok(estimator)
}

/// Owns the estimator's input window and output slot.
///
/// The analysis window slides by one hop per frame: the oldest hop is dropped
/// and the new frame is written at the tail.
pub struct PitchEstimatorAdapter {
    estimator: Option<Box<dyn PitchEstimator>>,
    analysis: Vec<f32>,
    output: [f32; 1],
    hop_size: usize,
}

impl PitchEstimatorAdapter {
    /// Wraps a successfully built backend.
    pub fn new(estimator: Box<dyn PitchEstimator>, analysis_size: usize, hop_size: usize) -> Self {
        Self {
            estimator: Some(estimator),
            analysis: vec![0.0; analysis_size],
            output: [0.0],
            hop_size,
        }
    }

    /// An adapter with no backend. Every estimate is 0.
    pub fn disabled(hop_size: usize) -> Self {
        Self {
            estimator: None,
            analysis: Vec::new(),
            output: [0.0],
            hop_size,
        }
    }

    /// Builds the backend, degrading to a disabled adapter on failure.
    ///
    /// The initialization error, if any, is returned alongside the adapter so the
    /// caller can report it; the adapter is usable either way.
    pub fn build(kind: EstimatorKind, params: &EstimatorParams) -> (Self, Option<TunerError>) {
        match build_estimator(kind, params) {
            Ok(estimator) => {
                info!(
                    "[ESTIMATOR] Using {} ({} samples, hop {}, {} Hz)",
                    estimator.name(),
                    params.analysis_size,
                    params.hop_size,
                    params.sample_rate
                );
                (
                    Self::new(estimator, params.analysis_size, params.hop_size),
                    None,
                )
            }
            Err(e) => {
                warn!("[ESTIMATOR] {}; reporting no pitch for this session", e);
                (Self::disabled(params.hop_size), Some(e))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.estimator.is_some()
    }

    /// Estimates the pitch after appending one frame to the analysis window.
    ///
    /// # Returns
    /// * Frequency in Hz as reported by the backend, 0.0 for no pitch
    /// * 0.0 when the backend is disabled or the frame length is not the hop size
    pub fn estimate(&mut self, frame: &[f32]) -> f32 {
        let Some(estimator) = self.estimator.as_mut() else {
            return 0.0;
        };
        if frame.len() != self.hop_size {
            warn!(
                "[ESTIMATOR] Dropping frame of {} samples (expected {})",
                frame.len(),
                self.hop_size
            );
            return 0.0;
        }

        let len = self.analysis.len();
        self.analysis.copy_within(self.hop_size.., 0);
        self.analysis[len - self.hop_size..].copy_from_slice(frame);

        self.output[0] = estimator.estimate(&self.analysis);
        self.output[0]
    }
}
