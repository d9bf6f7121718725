//! # Display Rendering
//!
//! Turns display events into terminal output: one human-readable line per
//! event, or one JSON object per line with `--json`.

use anyhow::Result;
use std::io::Write;
use tuner_core::DisplayEvent;
use tuner_core::TunerReading;
use tuner_core::notes::{Accuracy, METER_RANGE};

/// Width of the meter bar in characters, centre included.
const METER_WIDTH: usize = 21;

pub struct Renderer<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    /// Writes one event. Raw per-frame pitches only appear in JSON output.
    pub fn render(&mut self, event: &DisplayEvent) -> Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, event)?;
            writeln!(self.out)?;
            return Ok(());
        }

        match event {
            DisplayEvent::Started {
                sample_rate,
                channels,
                sample_format,
            } => writeln!(
                self.out,
                "listening: {} Hz, {} channel(s), {}",
                sample_rate, channels, sample_format
            )?,
            DisplayEvent::RawPitch { .. } => return Ok(()),
            DisplayEvent::Reading(reading) => writeln!(self.out, "{}", reading_line(reading))?,
            DisplayEvent::NoSignal => writeln!(self.out, "---")?,
            DisplayEvent::TargetChanged { target: Some(target) } => writeln!(
                self.out,
                "target: {} ({:.2} Hz)",
                target.string, target.frequency
            )?,
            DisplayEvent::TargetChanged { target: None } => writeln!(self.out, "target: auto")?,
            DisplayEvent::Stopped => writeln!(self.out, "stopped")?,
            DisplayEvent::Error { kind, message } => {
                writeln!(self.out, "error ({:?}): {}", kind, message)?
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// `A2   110.12 Hz  +1.9 ct  [..........|..........]  perfect  string A`
fn reading_line(reading: &TunerReading) -> String {
    let (cents, against) = match (reading.target, reading.target_cents) {
        (Some(target), Some(cents)) => (cents, format!("target {}", target.string)),
        _ => (
            reading.cents,
            reading
                .matched_string
                .map(|s| format!("string {}", s))
                .unwrap_or_default(),
        ),
    };
    format!(
        "{:<4} {:>8.2} Hz {:>+7.1} ct  [{}]  {:<7}  {}",
        reading.note,
        reading.smoothed_hz,
        cents,
        meter_bar(reading.meter),
        accuracy_label(reading.accuracy),
        against
    )
    .trim_end()
    .to_string()
}

fn accuracy_label(accuracy: Accuracy) -> &'static str {
    match accuracy {
        Accuracy::Perfect => "perfect",
        Accuracy::Good => "good",
        Accuracy::Fair => "fair",
        Accuracy::Poor => "poor",
    }
}

/// Draws a meter position in `-50..=50` as a bar with a marker.
fn meter_bar(meter: i32) -> String {
    let meter = meter.clamp(-METER_RANGE, METER_RANGE);
    let half = (METER_WIDTH / 2) as i32;
    let centre = half as usize;
    let marker = (half + (meter * half) / METER_RANGE) as usize;

    (0..METER_WIDTH)
        .map(|i| {
            if i == marker {
                '#'
            } else if i == centre {
                '|'
            } else {
                '.'
            }
        })
        .collect()
}
