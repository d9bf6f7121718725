//! # Error Module
//!
//! Every failure the pipeline can hit is a [`TunerError`]. Errors never cross into the
//! presentation layer as panics: the worker and the consumer turn them into
//! [`DisplayEvent::Error`](crate::pipeline::DisplayEvent) values instead.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the tuner pipeline.
///
/// Payloads are plain strings so an error can be cloned into an event and
/// shipped across threads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TunerError {
    /// No usable input device, or the device rejected every format we can read.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device was found but the stream could not be built, started or kept alive.
    #[error("audio stream failed: {0}")]
    StreamFailed(String),

    /// The negotiated sample format cannot be converted into float frames.
    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    /// The pitch estimator could not be created. The session keeps running
    /// and reports no pitch.
    #[error("pitch estimator failed to initialize: {0}")]
    EstimatorInit(String),

    /// The capture thread did not confirm shutdown in time.
    #[error("capture thread did not stop within {0:?}; forced cleanup engaged")]
    ShutdownTimeout(Duration),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read or parsed.
    #[error("could not load configuration: {0}")]
    Config(String),

    /// A pipeline thread could not be spawned.
    #[error("could not spawn {0} thread")]
    Spawn(String),
}

/// Coarse classification of a [`TunerError`], used in display events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceUnavailable,
    EstimatorInitFailure,
    UnsupportedSampleFormat,
    ShutdownTimeout,
    Configuration,
    Internal,
}

impl TunerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunerError::DeviceUnavailable(_) | TunerError::StreamFailed(_) => {
                ErrorKind::DeviceUnavailable
            }
            TunerError::UnsupportedSampleFormat(_) => ErrorKind::UnsupportedSampleFormat,
            TunerError::EstimatorInit(_) => ErrorKind::EstimatorInitFailure,
            TunerError::ShutdownTimeout(_) => ErrorKind::ShutdownTimeout,
            TunerError::InvalidConfig(_) | TunerError::Config(_) => ErrorKind::Configuration,
            TunerError::Spawn(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the current capture session.
    ///
    /// Estimator failures degrade to "no pitch" and shutdown timeouts are
    /// reported after the session has already stopped.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceUnavailable | ErrorKind::UnsupportedSampleFormat
        )
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_failures_classify_as_device_errors() {
        let err = TunerError::StreamFailed("play() rejected".into());
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn estimator_failures_do_not_end_the_session() {
        let err = TunerError::EstimatorInit("hop size is zero".into());
        assert!(!err.is_fatal_to_session());
        assert_eq!(
            err.to_string(),
            "pitch estimator failed to initialize: hop size is zero"
        );
    }

    #[test]
    fn spawn_failures_are_internal_errors() {
        let err = TunerError::Spawn("consumer".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_fatal_to_session());
        assert_eq!(err.to_string(), "could not spawn consumer thread");
    }
}
