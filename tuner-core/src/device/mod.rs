//! # Audio Device Module
//!
//! The audio input is a capability interface so the capture pipeline does not
//! depend on a particular audio API. An [`AudioBackend`] is shared with the
//! worker and creates one [`AudioDevice`] per capture session, on the capture
//! thread itself (stream handles of most audio APIs are not `Send`).
//!
//! ## Backends
//! - [`microphone::CpalBackend`]: the default input device via CPAL
//! - [`synthetic::SyntheticBackend`]: a generated tone, paced in real time

pub mod microphone;
pub mod synthetic;

use crate::config::TunerConfig;
use crate::error::Result;
use crate::frames::{SampleFormat, StreamFormat};
use std::time::Duration;

/// What the pipeline asks the device for. The device may negotiate something close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Hop size, a hint for the device's callback buffer size.
    pub frames_per_buffer: usize,
    /// Chunks the device may queue before it starts counting overruns.
    pub queue_capacity: usize,
}

impl StreamRequest {
    pub fn from_config(config: &TunerConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            sample_format: config.sample_format,
            frames_per_buffer: config.hop_size,
            queue_capacity: config.device_queue_capacity,
        }
    }
}

/// One capture session's handle on an input device.
///
/// Lifecycle: `open` → `start` → `read_available`* → `stop` → `close`.
/// `stop` and `close` must be safe to call in any state.
pub trait AudioDevice {
    /// Opens the device and negotiates a stream format.
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat>;

    /// Begins capture.
    fn start(&mut self) -> Result<()>;

    /// Returns the raw bytes captured since the last call, waiting at most
    /// `timeout` for the first chunk. An empty vector means nothing arrived.
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    fn stop(&mut self);

    /// Releases the device.
    fn close(&mut self);
}

/// Creates audio devices for capture sessions.
pub trait AudioBackend: Send + Sync {
    fn create_device(&self) -> Result<Box<dyn AudioDevice>>;

    fn name(&self) -> &str;
}
