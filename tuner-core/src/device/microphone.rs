//! # Microphone Capture
//!
//! Real-time capture from the default input device using CPAL (Cross-Platform
//! Audio Library).
//!
//! ## Features
//! - Automatic input device selection
//! - Format negotiation preferring the requested channel count, format and rate
//! - Callback that only copies samples into a bounded queue and never blocks

use super::{AudioBackend, AudioDevice, StreamRequest};
use crate::error::{Result, TunerError};
use crate::frames::{SampleFormat, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Creates [`CpalDevice`]s on the default host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn create_device(&self) -> Result<Box<dyn AudioDevice>> {
        Ok(Box::new(CpalDevice::default()))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

/// Samples the callback can forward as native-endian bytes.
trait NativeBytes: Copy {
    fn append_to(self, out: &mut Vec<u8>);
}

macro_rules! native_bytes {
    ($($t:ty),*) => {
        $(impl NativeBytes for $t {
            fn append_to(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        })*
    };
}

native_bytes!(u8, i16, i32, f32);

/// An input stream on the default input device.
#[derive(Default)]
pub struct CpalDevice {
    device: Option<cpal::Device>,
    config: Option<cpal::StreamConfig>,
    format: Option<StreamFormat>,
    stream: Option<cpal::Stream>,
    chunks: Option<Receiver<Vec<u8>>>,
    errors: Option<Receiver<String>>,
    overruns: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl AudioDevice for CpalDevice {
    /// Selects the default input device and negotiates a configuration.
    ///
    /// # Returns
    /// * `Ok(format)` - The format the stream will deliver
    /// * `Err(TunerError::DeviceUnavailable)` - No input device or no configurations
    /// * `Err(TunerError::UnsupportedSampleFormat)` - No configuration in a readable format
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::DeviceUnavailable("no input device available".into()))?;

        match device.name() {
            Ok(name) => info!("[DEVICE] Using audio input device: {}", name),
            Err(e) => warn!("[DEVICE] Input device has no readable name: {}", e),
        }

        let configs = device
            .supported_input_configs()
            .map_err(|e| TunerError::DeviceUnavailable(e.to_string()))?
            .collect::<Vec<_>>();
        if configs.is_empty() {
            return Err(TunerError::DeviceUnavailable(
                "input device reports no configurations".into(),
            ));
        }

        let supported = find_supported_config(configs, request).ok_or_else(|| {
            TunerError::UnsupportedSampleFormat(
                "input device offers no u8, i16, i32 or f32 configuration".into(),
            )
        })?;

        let rate = request
            .sample_rate
            .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let sample_format = SampleFormat::try_from(supported.sample_format())?;
        let config = supported.with_sample_rate(SampleRate(rate));
        let channels = config.channels();
        let stream_config: cpal::StreamConfig = config.into();

        let format = StreamFormat {
            sample_rate: rate,
            channels,
            sample_format,
        };
        info!(
            "[DEVICE] Negotiated {} Hz, {} channel(s), {}",
            format.sample_rate, format.channels, format.sample_format
        );

        self.device = Some(device);
        self.config = Some(stream_config);
        self.format = Some(format);
        self.queue_capacity = request.queue_capacity.max(1);
        Ok(format)
    }

    fn start(&mut self) -> Result<()> {
        let (Some(device), Some(config), Some(format)) =
            (self.device.as_ref(), self.config.as_ref(), self.format)
        else {
            return Err(TunerError::DeviceUnavailable("device was not opened".into()));
        };

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(self.queue_capacity);
        let (error_tx, error_rx) = crossbeam_channel::bounded(16);
        let overruns = self.overruns.clone();

        let built = match format.sample_format {
            SampleFormat::U8 => build_input::<u8>(device, config, chunk_tx, error_tx, overruns),
            SampleFormat::I16 => build_input::<i16>(device, config, chunk_tx, error_tx, overruns),
            SampleFormat::I32 => build_input::<i32>(device, config, chunk_tx, error_tx, overruns),
            SampleFormat::F32 => build_input::<f32>(device, config, chunk_tx, error_tx, overruns),
        };
        let stream = built.map_err(|e| TunerError::StreamFailed(e.to_string()))?;
        stream
            .play()
            .map_err(|e| TunerError::StreamFailed(e.to_string()))?;

        self.stream = Some(stream);
        self.chunks = Some(chunk_rx);
        self.errors = Some(error_rx);
        debug!("[DEVICE] Input stream playing");
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(errors) = &self.errors {
            if let Ok(message) = errors.try_recv() {
                return Err(TunerError::StreamFailed(message));
            }
        }
        let Some(chunks) = &self.chunks else {
            return Err(TunerError::StreamFailed("stream is not running".into()));
        };

        let mut bytes = match chunks.recv_timeout(timeout) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TunerError::StreamFailed("input stream closed".into()));
            }
        };
        loop {
            match chunks.try_recv() {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(bytes)
    }

    fn stop(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("[DEVICE] Error pausing stream: {}", e);
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.chunks = None;
        self.errors = None;
        self.config = None;
        self.format = None;
        if self.device.take().is_some() {
            let overruns = self.overruns.swap(0, Ordering::Relaxed);
            if overruns > 0 {
                warn!("[DEVICE] {} captured chunk(s) dropped on a full queue", overruns);
            }
            debug!("[DEVICE] Input device released");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunks: Sender<Vec<u8>>,
    errors: Sender<String>,
    overruns: Arc<AtomicU64>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + NativeBytes + Send + 'static,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut bytes = Vec::with_capacity(std::mem::size_of_val(data));
            for &sample in data {
                sample.append_to(&mut bytes);
            }
            // Never block the audio callback; a full queue is counted, not waited on.
            if chunks.try_send(bytes).is_err() {
                overruns.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |err| {
            error!("[DEVICE] An error occurred on the audio stream: {}", err);
            let _ = errors.try_send(err.to_string());
        },
        None,
    )
}

/// Finds the best supported configuration for the request.
///
/// Only configurations whose sample format the accumulator can read are
/// considered. Among those, the requested channel count and sample format are
/// preferred, then the range closest to the requested rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    request: &StreamRequest,
) -> Option<SupportedStreamConfigRange> {
    let target_rate = request.sample_rate as i64;
    configs
        .into_iter()
        .filter(|c| SampleFormat::try_from(c.sample_format()).is_ok())
        .min_by_key(|c| {
            let channel_penalty = (c.channels() != request.channels) as u8;
            let format_penalty = (SampleFormat::try_from(c.sample_format()).ok()
                != Some(request.sample_format)) as u8;
            let min = c.min_sample_rate().0 as i64;
            let max = c.max_sample_rate().0 as i64;
            let rate_distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                (min - target_rate).abs().min((max - target_rate).abs())
            };
            (channel_penalty, format_penalty, rate_distance)
        })
}
