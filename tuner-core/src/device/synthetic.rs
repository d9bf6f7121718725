//! A generated sine tone standing in for a microphone.
//!
//! Samples are produced at the negotiated rate in real time and handed out in
//! chunks whose sizes deliberately do not line up with the hop size.

use super::{AudioBackend, AudioDevice, StreamRequest};
use crate::error::{Result, TunerError};
use crate::frames::{StreamFormat, encode_samples};
use std::time::{Duration, Instant};
use tracing::debug;

/// Chunk lengths (in sample frames) cycled through on each delivery.
const CHUNK_PATTERN: [usize; 5] = [441, 300, 517, 128, 733];

/// Creates [`SyntheticDevice`]s playing a fixed tone.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticBackend {
    frequency: f32,
    amplitude: f32,
}

impl SyntheticBackend {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            amplitude: 0.5,
        }
    }
}

impl AudioBackend for SyntheticBackend {
    fn create_device(&self) -> Result<Box<dyn AudioDevice>> {
        Ok(Box::new(SyntheticDevice::new(self.frequency, self.amplitude)))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

pub struct SyntheticDevice {
    frequency: f32,
    amplitude: f32,
    format: Option<StreamFormat>,
    started_at: Option<Instant>,
    produced: u64,
    chunk_index: usize,
}

impl SyntheticDevice {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
            format: None,
            started_at: None,
            produced: 0,
            chunk_index: 0,
        }
    }

    /// Sample frames that should exist by now but have not been handed out.
    fn due(&self, started_at: Instant, sample_rate: u32) -> u64 {
        let elapsed = started_at.elapsed().as_secs_f64();
        ((elapsed * sample_rate as f64) as u64).saturating_sub(self.produced)
    }
}

impl AudioDevice for SyntheticDevice {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat> {
        let format = StreamFormat {
            sample_rate: request.sample_rate,
            channels: request.channels,
            sample_format: request.sample_format,
        };
        debug!(
            "[DEVICE] Synthetic {} Hz tone at {} Hz sample rate",
            self.frequency, format.sample_rate
        );
        self.format = Some(format);
        Ok(format)
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(TunerError::DeviceUnavailable("device was not opened".into()));
        }
        self.started_at = Some(Instant::now());
        self.produced = 0;
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let (Some(format), Some(started_at)) = (self.format, self.started_at) else {
            return Err(TunerError::StreamFailed("stream is not running".into()));
        };

        let chunk = CHUNK_PATTERN[self.chunk_index % CHUNK_PATTERN.len()] as u64;
        let mut due = self.due(started_at, format.sample_rate);
        if due < chunk {
            let missing = Duration::from_secs_f64((chunk - due) as f64 / format.sample_rate as f64);
            std::thread::sleep(missing.min(timeout));
            due = self.due(started_at, format.sample_rate);
        }
        if due < chunk {
            return Ok(Vec::new());
        }
        self.chunk_index += 1;

        let channels = format.channels as usize;
        let step = self.frequency as f64 / format.sample_rate as f64;
        let mut samples = Vec::with_capacity(chunk as usize * channels);
        for n in self.produced..self.produced + chunk {
            let phase = (n as f64 * step).fract();
            let value = self.amplitude * (2.0 * std::f64::consts::PI * phase).sin() as f32;
            samples.extend(std::iter::repeat_n(value, channels));
        }
        self.produced += chunk;

        let mut bytes = Vec::new();
        encode_samples(&samples, format.sample_format, &mut bytes);
        Ok(bytes)
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn close(&mut self) {
        self.started_at = None;
        self.format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::SampleFormat;

    #[test]
    fn produces_paced_chunks_after_start() {
        let mut device = SyntheticDevice::new(110.0, 0.5);
        let request = StreamRequest {
            sample_rate: 44_100,
            channels: 1,
            sample_format: SampleFormat::F32,
            frames_per_buffer: 512,
            queue_capacity: 8,
        };
        assert!(device.read_available(Duration::from_millis(1)).is_err());

        device.open(&request).unwrap();
        device.start().unwrap();
        let mut total = 0;
        for _ in 0..10 {
            total += device.read_available(Duration::from_millis(50)).unwrap().len();
        }
        assert!(total > 0);
        assert_eq!(total % 4, 0);

        device.stop();
        device.close();
        assert!(device.read_available(Duration::from_millis(1)).is_err());
    }
}
