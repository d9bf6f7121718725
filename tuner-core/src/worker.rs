//! # Acquisition Worker Module
//!
//! Owns the lifecycle of a capture session. Each session runs on a dedicated
//! capture thread that opens the device, frames the incoming bytes, runs the
//! pitch estimator on every frame and publishes the estimates, in capture
//! order, on an unbounded channel.
//!
//! ## State machine
//! `Stopped → start() → Running → stop() → Stopped`. Both calls are idempotent
//! and serialize on an internal lock, so the device is never opened twice and
//! never released while the capture loop is still reading from it. A thread
//! detached by a forced stop keeps blocking `start()` until it has released
//! the device, and nothing it publishes after the detach reaches the channel.

use crate::config::TunerConfig;
use crate::device::{AudioBackend, AudioDevice, StreamRequest};
use crate::error::{Result, TunerError};
use crate::estimator::{EstimatorParams, PitchEstimatorAdapter};
use crate::frames::{FrameAccumulator, StreamFormat};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Events published by the capture thread, in capture order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The device is open and capturing in this format.
    Started(StreamFormat),
    /// One estimate per analysis frame; 0.0 means no pitch.
    Pitch { hz: f32, captured_at: Instant },
    /// A failure, fatal or not. A fatal failure in a running session is
    /// followed by `Stopped`; a failed startup is reported with this alone.
    Error(TunerError),
    /// The capture loop has ended and the device is released.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

/// A live capture thread.
struct Session {
    running: Arc<AtomicBool>,
    /// Set when `stop()` gave up waiting and detached the thread.
    orphaned: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    /// Disconnects when the capture thread exits.
    done: Receiver<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

#[derive(Default)]
struct Sessions {
    current: Option<Session>,
    /// Detached by a timed-out `stop()`; may still hold the device.
    detached: Option<Session>,
}

/// Starts and stops capture sessions on behalf of the presentation layer.
pub struct AcquisitionWorker {
    backend: Arc<dyn AudioBackend>,
    config: TunerConfig,
    events: Sender<WorkerEvent>,
    sessions: Mutex<Sessions>,
}

impl AcquisitionWorker {
    /// Creates a stopped worker.
    ///
    /// # Arguments
    /// * `backend` - Creates the device for each session
    /// * `config` - Stream request, framing and estimator settings
    /// * `events` - Receives every [`WorkerEvent`]
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: TunerConfig,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            backend,
            config,
            events,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        match self.lock().current.as_ref() {
            Some(session) if session.is_alive() => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    /// Opens the device and starts capturing. Does nothing if already running.
    ///
    /// Blocks until the capture thread has either started the stream or failed
    /// to. On failure the device has been released, an error event has been
    /// published and the worker is stopped.
    ///
    /// After a forced stop this first waits, up to the shutdown timeout, for the
    /// detached thread to release the device and fails with
    /// [`TunerError::DeviceUnavailable`] if it has not.
    pub fn start(&self) -> Result<()> {
        let mut sessions = self.lock();
        if let Some(current) = sessions.current.as_ref() {
            if current.is_alive() {
                debug!("[WORKER] start() ignored: already running");
                return Ok(());
            }
        }
        // A session that ended on its own (device failure) is reaped first.
        if let Some(dead) = sessions.current.take() {
            reap(dead);
        }
        if let Some(detached) = sessions.detached.take() {
            match detached.done.recv_timeout(self.config.shutdown_timeout()) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    join_quietly(detached.handle);
                    debug!("[WORKER] Detached capture thread has exited");
                }
                Err(RecvTimeoutError::Timeout) => {
                    sessions.detached = Some(detached);
                    let err = TunerError::DeviceUnavailable(
                        "a detached capture thread still holds the device".into(),
                    );
                    warn!("[WORKER] {}", err);
                    self.publish(WorkerEvent::Error(err.clone()));
                    return Err(err);
                }
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let orphaned = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<StreamFormat>>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let capture = CaptureThread {
            backend: self.backend.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            running: running.clone(),
            orphaned: orphaned.clone(),
        };
        let spawned = thread::Builder::new()
            .name("tuner-capture".to_string())
            .spawn(move || {
                // Dropped when the thread exits, including on panic.
                let _done = done_tx;
                capture.run(ready_tx);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("[WORKER] Capture thread: {}", e);
                let err = TunerError::Spawn("capture".into());
                self.publish(WorkerEvent::Error(err.clone()));
                return Err(err);
            }
        };

        match ready_rx.recv() {
            Ok(Ok(format)) => {
                info!(
                    "[WORKER] Capture running via {} ({} Hz)",
                    self.backend.name(),
                    format.sample_rate
                );
                sessions.current = Some(Session {
                    running,
                    orphaned,
                    handle,
                    done: done_rx,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                // The capture thread has already unwound the device and reported.
                join_quietly(handle);
                warn!("[WORKER] Capture failed to start: {}", e);
                Err(e)
            }
            Err(_) => {
                join_quietly(handle);
                let err =
                    TunerError::StreamFailed("capture thread exited during startup".into());
                error!("[WORKER] {}", err);
                self.publish(WorkerEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Stops capturing and waits for the capture thread. Does nothing if stopped.
    ///
    /// If the thread does not confirm shutdown within the configured timeout it
    /// is detached, a [`TunerError::ShutdownTimeout`] is published and returned,
    /// and the worker is stopped regardless.
    pub fn stop(&self) -> Result<()> {
        let mut sessions = self.lock();
        let Some(current) = sessions.current.take() else {
            debug!("[WORKER] stop() ignored: not running");
            return Ok(());
        };

        current.running.store(false, Ordering::Release);
        let timeout = self.config.shutdown_timeout();
        match current.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                join_quietly(current.handle);
                info!("[WORKER] Capture stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                // Threads cannot be killed; detach it. It still observes the
                // cleared flag and releases the device when it wakes up, but it
                // publishes nothing more; this `Stopped` stands in for its own.
                current.orphaned.store(true, Ordering::Release);
                sessions.detached = Some(current);
                let err = TunerError::ShutdownTimeout(timeout);
                error!("[WORKER] {}", err);
                self.publish(WorkerEvent::Error(err.clone()));
                self.publish(WorkerEvent::Stopped);
                Err(err)
            }
        }
    }

    fn publish(&self, event: WorkerEvent) {
        // A closed receiver means nobody is listening any more.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("[WORKER] Shutdown on drop: {}", e);
        }
    }
}

fn reap(session: Session) {
    session.running.store(false, Ordering::Release);
    join_quietly(session.handle);
}

fn join_quietly(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("[WORKER] Capture thread panicked");
    }
}

/// Everything the capture thread owns.
struct CaptureThread {
    backend: Arc<dyn AudioBackend>,
    config: TunerConfig,
    events: Sender<WorkerEvent>,
    running: Arc<AtomicBool>,
    orphaned: Arc<AtomicBool>,
}

impl CaptureThread {
    fn run(self, ready: Sender<Result<StreamFormat>>) {
        debug!("[CAPTURE] Capture thread starting");
        let mut device = match self.backend.create_device() {
            Ok(device) => device,
            Err(e) => return self.fail_startup(e, None, &ready),
        };

        let request = StreamRequest::from_config(&self.config);
        let format = match device.open(&request) {
            Ok(format) => format,
            Err(e) => return self.fail_startup(e, Some(device), &ready),
        };

        let mut accumulator = match FrameAccumulator::new(self.config.hop_size, format) {
            Ok(accumulator) => accumulator,
            Err(e) => return self.fail_startup(e, Some(device), &ready),
        };

        let params = EstimatorParams::from_config(&self.config, format.sample_rate);
        let (mut adapter, init_error) = PitchEstimatorAdapter::build(self.config.estimator, &params);

        if let Err(e) = device.start() {
            return self.fail_startup(e, Some(device), &ready);
        }

        self.publish(WorkerEvent::Started(format));
        if let Some(e) = init_error {
            self.publish(WorkerEvent::Error(e));
        }
        let _ = ready.send(Ok(format));

        let poll = self.config.poll_interval();
        let mut frames = 0u64;
        while self.running.load(Ordering::Acquire) {
            match device.read_available(poll) {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    frames += accumulator.feed_with(&chunk, |frame| {
                        let hz = adapter.estimate(&frame);
                        self.publish(WorkerEvent::Pitch {
                            hz,
                            captured_at: Instant::now(),
                        });
                    }) as u64;
                }
                Err(e) => {
                    error!("[CAPTURE] Capture aborted: {}", e);
                    self.running.store(false, Ordering::Release);
                    self.publish(WorkerEvent::Error(e));
                    break;
                }
            }
        }

        debug!("[CAPTURE] Stopping stream after {} frame(s)", frames);
        release(device);
        if self.orphaned.load(Ordering::Acquire) {
            warn!("[CAPTURE] Detached capture thread released the device late");
        }
        self.publish(WorkerEvent::Stopped);
        debug!("[CAPTURE] Capture thread finished");
    }

    /// Unwinds a failed startup: releases the device, reports, and clears the flag.
    fn fail_startup(
        &self,
        error: TunerError,
        device: Option<Box<dyn AudioDevice>>,
        ready: &Sender<Result<StreamFormat>>,
    ) {
        if let Some(device) = device {
            release(device);
        }
        self.running.store(false, Ordering::Release);
        error!("[CAPTURE] Could not start capture: {}", error);
        self.publish(WorkerEvent::Error(error.clone()));
        let _ = ready.send(Err(error));
    }

    /// Sends an event unless a forced stop has detached this thread.
    fn publish(&self, event: WorkerEvent) {
        if self.orphaned.load(Ordering::Acquire) {
            return;
        }
        let _ = self.events.send(event);
    }
}

fn release(mut device: Box<dyn AudioDevice>) {
    device.stop();
    device.close();
}
