//! # Tuner Pipeline Module
//!
//! Wires the acquisition worker to the presentation layer. Raw estimates from
//! the capture thread are smoothed, mapped to notes and matched against the
//! guitar strings on a separate consumer thread, which publishes
//! [`DisplayEvent`]s in capture order.
//!
//! ```text
//! capture thread ──WorkerEvent──▶ consumer thread ──DisplayEvent──▶ presentation
//!                                      ▲
//!            presentation ──Command────┘
//! ```

use crate::config::TunerConfig;
use crate::device::AudioBackend;
use crate::error::{ErrorKind, Result, TunerError};
use crate::frames::SampleFormat;
use crate::notes::{self, Accuracy};
use crate::smoother::AdaptiveSmoother;
use crate::target::{GuitarString, TargetMode, TargetSelector, TuningTarget};
use crate::worker::{AcquisitionWorker, WorkerEvent, WorkerState};
use crossbeam_channel::{Receiver, Sender, select};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Commands the presentation sends to the consumer thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Pin a string, or return to auto matching with `None`.
    SelectTarget(Option<GuitarString>),
    Shutdown,
}

/// One smoothed reading, ready to drive a tuning indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunerReading {
    pub smoothed_hz: f32,
    /// Nearest equal-tempered note, e.g. "A2".
    pub note: String,
    pub note_frequency: f32,
    /// Deviation from the nearest note.
    pub cents: f32,
    /// The pinned string in manual mode.
    pub target: Option<TuningTarget>,
    /// Deviation from the pinned string in manual mode.
    pub target_cents: Option<f32>,
    /// The string auto matching highlights, if any.
    pub matched_string: Option<GuitarString>,
    /// Band of the displayed deviation (target cents when pinned, note cents otherwise).
    pub accuracy: Accuracy,
    /// Displayed deviation rounded and clamped to the meter range.
    pub meter: i32,
}

/// Everything the presentation layer is told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DisplayEvent {
    Started {
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
    },
    /// The unsmoothed estimate for one frame.
    RawPitch { hz: f32 },
    Reading(TunerReading),
    /// The signal went silent. Sent once per silent stretch.
    NoSignal,
    TargetChanged { target: Option<TuningTarget> },
    Stopped,
    Error { kind: ErrorKind, message: String },
}

impl From<&TunerError> for DisplayEvent {
    fn from(error: &TunerError) -> Self {
        DisplayEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Turns raw estimates into readings: smoothing, note mapping and target matching.
#[derive(Debug, Clone)]
pub struct ReadingProcessor {
    smoother: AdaptiveSmoother,
    selector: TargetSelector,
    silent: bool,
}

impl ReadingProcessor {
    pub fn new(smoother: AdaptiveSmoother, selector: TargetSelector) -> Self {
        Self {
            smoother,
            selector,
            silent: true,
        }
    }

    pub fn from_config(config: &TunerConfig) -> Result<Self> {
        Ok(Self::new(
            AdaptiveSmoother::new(config.smoothing),
            TargetSelector::new(config.string_table()?, config.match_threshold_hz),
        ))
    }

    /// Processes one raw estimate.
    ///
    /// # Arguments
    /// * `raw_hz` - Estimate for one frame, 0 for no pitch
    /// * `now_ms` - Monotonic capture time of the frame
    ///
    /// # Returns
    /// * `Some(DisplayEvent::Reading)` for a pitched frame
    /// * `Some(DisplayEvent::NoSignal)` for the first silent frame after a reading
    /// * `None` for further silent frames
    pub fn process(&mut self, raw_hz: f32, now_ms: u64) -> Option<DisplayEvent> {
        let smoothed = self.smoother.apply(raw_hz, now_ms);
        let target = self.selector.evaluate(smoothed);

        if smoothed <= 0.0 {
            if self.silent {
                return None;
            }
            self.silent = true;
            return Some(DisplayEvent::NoSignal);
        }
        self.silent = false;

        let note = notes::map_frequency(smoothed);
        let deviation = target.cents.unwrap_or(note.cents);
        Some(DisplayEvent::Reading(TunerReading {
            smoothed_hz: smoothed,
            note: note.name,
            note_frequency: note.target_frequency,
            cents: note.cents,
            target: target.pinned,
            target_cents: target.cents,
            matched_string: target.matched,
            accuracy: Accuracy::from_cents(deviation),
            meter: notes::meter_position(deviation),
        }))
    }

    pub fn select_target(&mut self, string: Option<GuitarString>) -> TargetMode {
        self.selector.select(string)
    }

    pub fn mode(&self) -> TargetMode {
        self.selector.mode()
    }

    /// Forgets the smoothing history. The target selection is kept.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.silent = true;
    }
}

/// The presentation-facing handle on the whole pipeline.
///
/// Capture errors never surface as panics or return values here: they are
/// published as [`DisplayEvent::Error`] on the event channel.
pub struct Tuner {
    worker: AcquisitionWorker,
    commands: Sender<Command>,
    consumer: Option<JoinHandle<()>>,
}

impl Tuner {
    /// Builds the pipeline in the stopped state.
    ///
    /// # Returns
    /// * `Ok((tuner, events))` - The handle and the display event stream
    /// * `Err(TunerError::InvalidConfig)` - The configuration is unusable
    pub fn new(
        config: TunerConfig,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<(Self, Receiver<DisplayEvent>)> {
        config.validate()?;
        let processor = ReadingProcessor::from_config(&config)?;

        let (worker_tx, worker_rx) = crossbeam_channel::unbounded();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (display_tx, display_rx) = crossbeam_channel::unbounded();

        let consumer = Consumer {
            processor,
            epoch: Instant::now(),
            capturing: false,
            display: display_tx,
        };
        let handle = thread::Builder::new()
            .name("tuner-consumer".to_string())
            .spawn(move || consumer.run(worker_rx, command_rx))
            .map_err(|e| {
                error!("[TUNER] Consumer thread: {}", e);
                TunerError::Spawn("consumer".into())
            })?;

        let worker = AcquisitionWorker::new(backend, config, worker_tx);
        Ok((
            Self {
                worker,
                commands: command_tx,
                consumer: Some(handle),
            },
            display_rx,
        ))
    }

    /// Starts capturing. A failure is reported as an error event and leaves
    /// the tuner stopped.
    pub fn start_capture(&self) -> WorkerState {
        if let Err(e) = self.worker.start() {
            debug!("[TUNER] start_capture failed: {}", e);
        }
        self.worker.state()
    }

    pub fn stop_capture(&self) -> WorkerState {
        if let Err(e) = self.worker.stop() {
            debug!("[TUNER] stop_capture forced: {}", e);
        }
        self.worker.state()
    }

    pub fn select_target(&self, string: Option<GuitarString>) {
        if self.commands.send(Command::SelectTarget(string)).is_err() {
            warn!("[CONSUMER] Consumer is gone; target selection dropped");
        }
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Stops capture and the consumer thread. The event stream ends afterwards.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Err(e) = self.worker.stop() {
            warn!("[TUNER] Shutdown: {}", e);
        }
        let Some(handle) = self.consumer.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if handle.join().is_err() {
            error!("[CONSUMER] Consumer thread panicked");
        }
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the consumer thread.
struct Consumer {
    processor: ReadingProcessor,
    /// Origin of the smoother's millisecond clock.
    epoch: Instant,
    capturing: bool,
    display: Sender<DisplayEvent>,
}

impl Consumer {
    fn run(mut self, worker: Receiver<WorkerEvent>, commands: Receiver<Command>) {
        debug!("[CONSUMER] Consumer thread started");
        loop {
            select! {
                recv(worker) -> event => match event {
                    Ok(event) => self.on_worker_event(event),
                    Err(_) => break,
                },
                recv(commands) -> command => match command {
                    Ok(Command::SelectTarget(string)) => self.on_select(string),
                    Ok(Command::Shutdown) | Err(_) => {
                        // Deliver whatever the worker published before shutting down.
                        for event in worker.try_iter() {
                            self.on_worker_event(event);
                        }
                        break;
                    }
                },
            }
        }
        debug!("[CONSUMER] Consumer thread finished");
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started(format) => {
                self.processor.reset();
                self.capturing = true;
                self.emit(DisplayEvent::Started {
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    sample_format: format.sample_format,
                });
            }
            WorkerEvent::Pitch { hz, captured_at } => {
                if !self.capturing {
                    return;
                }
                self.emit(DisplayEvent::RawPitch { hz });
                let now_ms = captured_at.saturating_duration_since(self.epoch).as_millis() as u64;
                if let Some(event) = self.processor.process(hz, now_ms) {
                    self.emit(event);
                }
            }
            WorkerEvent::Error(error) => {
                if error.is_fatal_to_session() {
                    error!("[CONSUMER] {}", error);
                } else {
                    warn!("[CONSUMER] {}", error);
                }
                self.emit(DisplayEvent::from(&error));
            }
            WorkerEvent::Stopped => {
                // A detached thread may still report after the forced stop.
                if !self.capturing {
                    return;
                }
                self.capturing = false;
                self.processor.reset();
                self.emit(DisplayEvent::Stopped);
            }
        }
    }

    fn on_select(&mut self, string: Option<GuitarString>) {
        let target = match self.processor.select_target(string) {
            TargetMode::Manual(target) => {
                info!("[CONSUMER] Tuning against {} ({} Hz)", target.string, target.frequency);
                Some(target)
            }
            TargetMode::Auto => {
                info!("[CONSUMER] Auto string matching");
                None
            }
        };
        self.emit(DisplayEvent::TargetChanged { target });
    }

    fn emit(&self, event: DisplayEvent) {
        // The presentation may have dropped its receiver; keep draining regardless.
        let _ = self.display.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmoothingConfig;
    use approx::assert_abs_diff_eq;

    fn reading(event: Option<DisplayEvent>) -> TunerReading {
        match event {
            Some(DisplayEvent::Reading(reading)) => reading,
            other => panic!("expected a reading, got {:?}", other),
        }
    }

    #[test]
    fn readings_follow_smoothing_and_auto_matching() {
        let mut processor = ReadingProcessor::new(AdaptiveSmoother::default(), TargetSelector::default());

        let first = reading(processor.process(110.0, 0));
        assert_eq!(first.note, "A2");
        assert_eq!(first.matched_string, Some(GuitarString::A));
        assert_eq!(first.target, None);
        assert_eq!(first.accuracy, Accuracy::Perfect);

        processor.process(112.0, 10);
        let third = reading(processor.process(111.0, 20));
        assert!(third.smoothed_hz > 110.0 && third.smoothed_hz < 112.0);
        assert_eq!(third.matched_string, Some(GuitarString::A));
    }

    #[test]
    fn processor_uses_the_configured_smoothing() {
        let config = TunerConfig {
            smoothing: SmoothingConfig {
                min_samples: 10,
                ..SmoothingConfig::default()
            },
            ..TunerConfig::default()
        };
        let mut processor = ReadingProcessor::from_config(&config).unwrap();
        processor.process(110.0, 0);
        processor.process(112.0, 10);
        assert_eq!(reading(processor.process(111.0, 20)).smoothed_hz, 111.0);
    }

    #[test]
    fn silence_is_reported_once() {
        let mut processor = ReadingProcessor::new(AdaptiveSmoother::default(), TargetSelector::default());
        assert_eq!(processor.process(0.0, 0), None);
        reading(processor.process(196.0, 10));
        assert_eq!(processor.process(0.0, 20), Some(DisplayEvent::NoSignal));
        assert_eq!(processor.process(0.0, 30), None);
        reading(processor.process(196.0, 40));
    }

    #[test]
    fn pinned_target_drives_the_meter() {
        let mut processor = ReadingProcessor::new(AdaptiveSmoother::default(), TargetSelector::default());
        processor.select_target(Some(GuitarString::LowE));

        let r = reading(processor.process(87.0, 0));
        assert_eq!(r.note, "F2");
        assert_eq!(r.matched_string, None);
        assert_eq!(r.target.map(|t| t.string), Some(GuitarString::LowE));
        let target_cents = r.target_cents.unwrap();
        assert_abs_diff_eq!(target_cents, notes::cents_between(87.0, 82.41), epsilon = 1e-3);
        assert_eq!(r.meter, 50);
        assert_eq!(r.accuracy, Accuracy::Poor);
    }

    #[test]
    fn reset_keeps_the_target() {
        let mut processor = ReadingProcessor::new(AdaptiveSmoother::default(), TargetSelector::default());
        processor.select_target(Some(GuitarString::D));
        processor.process(146.0, 0);
        processor.reset();
        assert!(matches!(processor.mode(), TargetMode::Manual(t) if t.string == GuitarString::D));
    }

    #[test]
    fn display_events_serialize_with_a_tag() {
        let json = serde_json::to_value(DisplayEvent::RawPitch { hz: 110.0 }).unwrap();
        assert_eq!(json["event"], "raw_pitch");
        assert_eq!(json["hz"], 110.0);

        let error = TunerError::DeviceUnavailable("no input device available".into());
        let json = serde_json::to_value(DisplayEvent::from(&error)).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["kind"], "device_unavailable");

        let json = serde_json::to_value(DisplayEvent::TargetChanged {
            target: Some(TuningTarget {
                string: GuitarString::HighE,
                frequency: 329.63,
            }),
        })
        .unwrap();
        assert_eq!(json["target"]["string"], "E4");
    }
}
