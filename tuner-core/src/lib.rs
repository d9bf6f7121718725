// tuner-core/src/lib.rs

//! The core logic for the guitar tuner.
//! This crate captures audio, estimates the fundamental frequency of each
//! frame, smooths the estimates and maps them onto notes and guitar strings.
//! It is completely headless: presentation layers drive it through
//! [`pipeline::Tuner`] and consume [`pipeline::DisplayEvent`]s.

pub mod config;
pub mod device;
pub mod error;
pub mod estimator;
pub mod frames;
pub mod notes;
pub mod pipeline;
pub mod smoother;
pub mod target;
pub mod worker;

pub use config::{SmoothingConfig, TunerConfig};
pub use device::microphone::CpalBackend;
pub use device::synthetic::SyntheticBackend;
pub use device::{AudioBackend, AudioDevice, StreamRequest};
pub use error::{ErrorKind, Result, TunerError};
pub use estimator::{EstimatorKind, PitchEstimator};
pub use frames::{SampleFormat, StreamFormat};
pub use pipeline::{Command, DisplayEvent, Tuner, TunerReading};
pub use target::{GuitarString, TargetMode, TuningTarget};
pub use worker::{AcquisitionWorker, WorkerEvent, WorkerState};
