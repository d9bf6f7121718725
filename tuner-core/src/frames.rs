//! # Frame Accumulator Module
//!
//! Turns the raw byte stream delivered by an audio device into fixed-size mono
//! analysis frames. Chunks may arrive with any length; bytes are buffered FIFO
//! until a whole frame is available, and frames are never emitted partially.

use crate::error::{Result, TunerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One analysis frame: `hop_size` mono samples.
pub type AudioFrame = Vec<f32>;

/// Sample encodings the accumulator can convert. Bytes are native-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 8-bit, silence at 128.
    U8,
    I16,
    I32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }

    /// Decodes one sample into the -1.0..1.0 range.
    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            SampleFormat::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleFormat::I32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
            SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::I16 => "i16",
            SampleFormat::I32 => "i32",
            SampleFormat::F32 => "f32",
        };
        f.write_str(name)
    }
}

impl TryFrom<cpal::SampleFormat> for SampleFormat {
    type Error = TunerError;

    fn try_from(format: cpal::SampleFormat) -> Result<Self> {
        match format {
            cpal::SampleFormat::U8 => Ok(SampleFormat::U8),
            cpal::SampleFormat::I16 => Ok(SampleFormat::I16),
            cpal::SampleFormat::I32 => Ok(SampleFormat::I32),
            cpal::SampleFormat::F32 => Ok(SampleFormat::F32),
            other => Err(TunerError::UnsupportedSampleFormat(other.to_string())),
        }
    }
}

/// The stream layout a device actually delivers after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    /// Bytes in one interleaved sample frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

/// Buffers raw capture bytes and slices them into [`AudioFrame`]s.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    format: StreamFormat,
    frame_size_bytes: usize,
}

impl FrameAccumulator {
    /// Creates an accumulator for `hop_size`-sample frames in the given format.
    ///
    /// # Returns
    /// * `Err(TunerError::InvalidConfig)` - Zero hop size or zero channels
    pub fn new(hop_size: usize, format: StreamFormat) -> Result<Self> {
        if hop_size == 0 || format.channels == 0 {
            return Err(TunerError::InvalidConfig(format!(
                "cannot frame {} samples of {} channels",
                hop_size, format.channels
            )));
        }
        let frame_size_bytes = hop_size * format.bytes_per_frame();
        Ok(Self {
            buffer: Vec::with_capacity(frame_size_bytes * 2),
            format,
            frame_size_bytes,
        })
    }

    /// Bytes consumed by one emitted frame.
    pub fn frame_size_bytes(&self) -> usize {
        self.frame_size_bytes
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Appends a chunk and hands every completed frame to `emit`, in order.
    ///
    /// Returns the number of frames emitted.
    pub fn feed_with(&mut self, chunk: &[u8], mut emit: impl FnMut(AudioFrame)) -> usize {
        self.buffer.extend_from_slice(chunk);

        let mut emitted = 0;
        let mut offset = 0;
        // While we have enough data for a full frame, convert it.
        while self.buffer.len() - offset >= self.frame_size_bytes {
            let end = offset + self.frame_size_bytes;
            emit(self.convert(&self.buffer[offset..end]));
            offset = end;
            emitted += 1;
        }
        // Remove the consumed bytes from the front of the buffer.
        self.buffer.drain(..offset);
        emitted
    }

    /// Appends a chunk and collects the completed frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        self.feed_with(chunk, |frame| frames.push(frame));
        frames
    }

    fn convert(&self, bytes: &[u8]) -> AudioFrame {
        let sample_bytes = self.format.sample_format.bytes_per_sample();
        let channels = self.format.channels as usize;
        let bytes_per_frame = sample_bytes * channels;

        bytes
            .chunks_exact(bytes_per_frame)
            .map(|interleaved| {
                let sum: f32 = interleaved
                    .chunks_exact(sample_bytes)
                    .map(|sample| self.format.sample_format.decode(sample))
                    .sum();
                sum / channels as f32
            })
            .collect()
    }
}

/// Encodes float samples as native-endian bytes in the given format.
///
/// Devices that hand out typed buffers use this to feed the byte-oriented accumulator.
pub fn encode_samples(samples: &[f32], format: SampleFormat, out: &mut Vec<u8>) {
    out.reserve(samples.len() * format.bytes_per_sample());
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        match format {
            SampleFormat::U8 => out.push((clamped * 127.0 + 128.0).round() as u8),
            SampleFormat::I16 => {
                out.extend_from_slice(&((clamped * 32_767.0) as i16).to_ne_bytes())
            }
            SampleFormat::I32 => {
                out.extend_from_slice(&((clamped as f64 * 2_147_483_647.0) as i32).to_ne_bytes())
            }
            SampleFormat::F32 => out.extend_from_slice(&sample.to_ne_bytes()),
        }
    }
}
