//! Scripted audio backends for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tuner_core::frames::encode_samples;
use tuner_core::{
    AudioBackend, AudioDevice, Result, SampleFormat, StreamFormat, StreamRequest, TunerError,
    WorkerEvent,
};
use crossbeam_channel::Receiver;

/// How many times each device call was made, across all sessions.
#[derive(Debug, Default)]
pub struct Calls {
    pub creates: AtomicUsize,
    pub opens: AtomicUsize,
    pub starts: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
    /// Devices currently open, and the most ever open at once.
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
}

impl Calls {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

/// What the scripted device does. Failure counters count down across sessions,
/// so a backend can fail its first start and succeed on the next.
#[derive(Debug, Default)]
pub struct Script {
    pub open_failures: AtomicUsize,
    pub start_failures: AtomicUsize,
    /// Every read blocks for this long, ignoring the timeout, then delivers a chunk.
    pub hang: Option<Duration>,
    /// The stream breaks after this many reads.
    pub fail_after_reads: Option<usize>,
    /// Samples per delivered chunk, all silent.
    pub chunk_samples: usize,
}

pub struct ScriptedBackend {
    pub script: Arc<Script>,
    pub calls: Arc<Calls>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Script {
                chunk_samples: script.chunk_samples.max(1),
                ..script
            }),
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn silent() -> Self {
        Self::new(Script {
            chunk_samples: 300,
            ..Script::default()
        })
    }
}

impl AudioBackend for ScriptedBackend {
    fn create_device(&self) -> Result<Box<dyn AudioDevice>> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            script: self.script.clone(),
            calls: self.calls.clone(),
            format: None,
            reads: 0,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedDevice {
    script: Arc<Script>,
    calls: Arc<Calls>,
    format: Option<StreamFormat>,
    reads: usize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl AudioDevice for ScriptedDevice {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.script.open_failures) {
            return Err(TunerError::DeviceUnavailable("no input device available".into()));
        }
        let format = StreamFormat {
            sample_rate: request.sample_rate,
            channels: 1,
            sample_format: SampleFormat::F32,
        };
        self.format = Some(format);
        let live = self.calls.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(format)
    }

    fn start(&mut self) -> Result<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.script.start_failures) {
            return Err(TunerError::StreamFailed("stream refused to start".into()));
        }
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.reads += 1;
        if let Some(limit) = self.script.fail_after_reads {
            if self.reads > limit {
                return Err(TunerError::StreamFailed("device disconnected".into()));
            }
        }
        thread::sleep(self.script.hang.unwrap_or(timeout.min(Duration::from_millis(2))));
        let mut bytes = Vec::new();
        encode_samples(
            &vec![0.0; self.script.chunk_samples],
            SampleFormat::F32,
            &mut bytes,
        );
        Ok(bytes)
    }

    fn stop(&mut self) {}

    fn close(&mut self) {
        if self.format.take().is_some() {
            self.calls.live.fetch_sub(1, Ordering::SeqCst);
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Receives events until `done` matches one or the deadline passes.
pub fn collect_until<T>(
    events: &Receiver<T>,
    deadline: Duration,
    mut done: impl FnMut(&T) -> bool,
) -> Vec<T> {
    let end = Instant::now() + deadline;
    let mut seen = Vec::new();
    while let Some(left) = end.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    seen
}

pub fn is_stopped(event: &WorkerEvent) -> bool {
    matches!(event, WorkerEvent::Stopped)
}

/// Polls `condition` until it holds or the deadline passes.
pub fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
