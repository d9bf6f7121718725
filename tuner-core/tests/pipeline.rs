mod common;

use approx::assert_abs_diff_eq;
use common::{Script, ScriptedBackend, collect_until};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tuner_core::notes::Accuracy;
use tuner_core::{
    DisplayEvent, ErrorKind, GuitarString, SyntheticBackend, Tuner, TunerConfig, WorkerState,
};

fn is_reading(event: &DisplayEvent) -> bool {
    matches!(event, DisplayEvent::Reading(_))
}

#[test]
fn synthetic_a_string_is_recognised() {
    let (tuner, events) =
        Tuner::new(TunerConfig::default(), Arc::new(SyntheticBackend::new(110.0))).unwrap();
    assert_eq!(tuner.state(), WorkerState::Stopped);
    assert_eq!(tuner.start_capture(), WorkerState::Running);

    let mut readings = 0;
    let seen = collect_until(&events, Duration::from_secs(5), |event| {
        if is_reading(event) {
            readings += 1;
        }
        readings >= 20
    });
    assert_eq!(tuner.stop_capture(), WorkerState::Stopped);

    assert!(matches!(
        seen.first(),
        Some(DisplayEvent::Started { sample_rate: 44_100, channels: 1, .. })
    ));
    let Some(DisplayEvent::Reading(last)) = seen.iter().rev().find(|e| is_reading(e)) else {
        panic!("no reading in {} events", seen.len());
    };
    assert_abs_diff_eq!(last.smoothed_hz, 110.0, epsilon = 1.0);
    assert_eq!(last.note, "A2");
    assert_eq!(last.matched_string, Some(GuitarString::A));
    assert_eq!(last.target, None);
    assert!(matches!(last.accuracy, Accuracy::Perfect | Accuracy::Good));

    let tail = collect_until(&events, Duration::from_secs(2), |e| {
        matches!(e, DisplayEvent::Stopped)
    });
    assert!(matches!(tail.last(), Some(DisplayEvent::Stopped)));
}

#[test]
fn pinned_string_is_measured_against_its_target() {
    let (tuner, events) =
        Tuner::new(TunerConfig::default(), Arc::new(SyntheticBackend::new(146.0))).unwrap();
    tuner.select_target(Some(GuitarString::D));
    tuner.start_capture();

    let mut pinned = 0;
    let seen = collect_until(&events, Duration::from_secs(5), |event| {
        if matches!(event, DisplayEvent::Reading(r) if r.target_cents.is_some()) {
            pinned += 1;
        }
        pinned >= 15
    });
    tuner.shutdown();

    let changed = seen.iter().find_map(|e| match e {
        DisplayEvent::TargetChanged { target } => Some(*target),
        _ => None,
    });
    assert_eq!(changed.flatten().map(|t| t.string), Some(GuitarString::D));

    let Some(DisplayEvent::Reading(reading)) = seen.last() else {
        panic!("no pinned reading");
    };
    assert_eq!(reading.matched_string, None);
    // 146 Hz against 146.83 Hz is about 10 cents flat.
    let cents = reading.target_cents.unwrap_or_default();
    assert!(cents < -5.0 && cents > -15.0, "{} cents", cents);
    assert!(reading.meter < 0);
}

#[test]
fn device_errors_arrive_as_events_and_capture_can_be_retried() {
    let backend = ScriptedBackend::new(Script {
        open_failures: AtomicUsize::new(1),
        chunk_samples: 512,
        ..Script::default()
    });
    let calls = backend.calls.clone();
    let (tuner, events) = Tuner::new(TunerConfig::default(), Arc::new(backend)).unwrap();

    assert_eq!(tuner.start_capture(), WorkerState::Stopped);
    let seen = collect_until(&events, Duration::from_secs(2), |e| {
        matches!(e, DisplayEvent::Error { .. })
    });
    match seen.last() {
        Some(DisplayEvent::Error { kind, message }) => {
            assert_eq!(*kind, ErrorKind::DeviceUnavailable);
            assert!(message.contains("no input device"));
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    assert_eq!(tuner.start_capture(), WorkerState::Running);
    assert_eq!(calls.opens(), 2);
    tuner.stop_capture();
}

#[test]
fn silence_produces_no_readings() {
    let (tuner, events) =
        Tuner::new(TunerConfig::default(), Arc::new(ScriptedBackend::silent())).unwrap();
    tuner.start_capture();
    let seen = collect_until(&events, Duration::from_millis(300), |_| false);
    tuner.stop_capture();

    assert!(seen.iter().any(|e| matches!(e, DisplayEvent::RawPitch { hz } if *hz == 0.0)));
    assert!(!seen.iter().any(is_reading));
    assert!(!seen.iter().any(|e| matches!(e, DisplayEvent::NoSignal)));
}

#[test]
fn shutdown_closes_the_event_stream() {
    let (tuner, events) =
        Tuner::new(TunerConfig::default(), Arc::new(ScriptedBackend::silent())).unwrap();
    tuner.start_capture();
    tuner.shutdown();

    let rest: Vec<_> = events.iter().collect();
    assert!(matches!(rest.last(), Some(DisplayEvent::Stopped)));
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let config = TunerConfig {
        match_threshold_hz: 0.0,
        ..TunerConfig::default()
    };
    assert!(Tuner::new(config, Arc::new(ScriptedBackend::silent())).is_err());
}
