mod common;

use chrono::Local;
use common::*;
use ndarray::{Array1, Array4};
use rollcall::attendance::{Capabilities, CancelToken, Clock, LiveAttendance, ManualClock, SessionState};
use rollcall::camera::ImageSequenceSource;
use rollcall::common::AttendanceError;
use rollcall::core::{LivenessClassifier, LivenessModel, RecognitionEngine};
use rollcall::storage::{
    AttendanceSink, EmbeddingIndex, IdentityKey, InsertOutcome, JsonlAttendanceLedger, MemoryAttendanceSink,
    VerificationMethod,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

fn enrolled_index() -> EmbeddingIndex {
    let mut identities = BTreeMap::new();
    identities.insert(IdentityKey::new("ana"), vec![vec![1.0, 0.0, 0.0]]);
    identities.insert(IdentityKey::new("ben"), vec![vec![0.0, 1.0, 0.0]]);
    EmbeddingIndex::from_map(identities)
}

#[test]
fn confirmed_face_is_recorded_once_with_fallback_note() {
    let dir = TempDir::new().unwrap();
    let ledger = JsonlAttendanceLedger::open(dir.path().join("attendance.jsonl")).unwrap();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &ledger, &config.session);
    let index = enrolled_index();

    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 5]);
    let mut seen = Vec::new();
    let report = live
        .run(&index, &mut source, &ManualClock::new(), &CancelToken::new(), |_, face, state| {
            assert!(face.is_some());
            seen.push(state.clone());
        })
        .unwrap();

    assert!(matches!(&report.state, SessionState::Accepted { identity, .. } if identity.as_str() == "ana"));
    assert_eq!(report.frames, 3);
    assert_eq!(report.liveness_checks, 1);
    assert_eq!(report.insert, Some(InsertOutcome::Inserted));
    assert!(matches!(seen[1], SessionState::Confirming { count: 2, .. }));
    assert!(source.is_released());
    assert_eq!(source.remaining(), 2);

    let records = ledger.records_on(Local::now().date_naive()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity, IdentityKey::new("ana"));
    assert_eq!(records[0].method, VerificationMethod::Live);
    assert_eq!(records[0].note, "liveness unchecked (no model)");

    // Same person again the same day: accepted, but nothing new is written.
    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 3]);
    let again = live
        .run(&index, &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, _| {})
        .unwrap();
    assert_eq!(again.insert, Some(InsertOutcome::Duplicate));
    assert_eq!(ledger.records_on(Local::now().date_naive()).unwrap().len(), 1);
}

#[test]
fn interrupted_streak_needs_a_fresh_window() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let frames = vec![
        frame_with_face(RED),
        frame_with_face(RED),
        empty_frame(),
        frame_with_face(GREEN),
        frame_with_face(GREEN),
        frame_with_face(GREEN),
    ];
    let mut source = ImageSequenceSource::from_images(frames);
    let report = live
        .run(&enrolled_index(), &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, _| {})
        .unwrap();

    assert!(matches!(&report.state, SessionState::Accepted { identity, .. } if identity.as_str() == "ben"));
    assert_eq!(report.frames, 6);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].identity, IdentityKey::new("ben"));
}

#[test]
fn timeout_without_a_match_writes_nothing() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    // Unknown face, then the source runs dry; the session keeps ticking until the timeout.
    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(YELLOW); 4]);
    let clock = ManualClock::new();
    let report = live
        .run(&enrolled_index(), &mut source, &clock, &CancelToken::new(), |_, _, state| {
            assert_eq!(state, &SessionState::Waiting);
        })
        .unwrap();

    assert_eq!(report.state, SessionState::TimedOut);
    assert_eq!(report.frames, 4);
    assert!(report.record.is_none());
    assert!(sink.records().is_empty());
    assert!(source.is_released());
}

#[test]
fn empty_store_times_out() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 10]);
    let report = live
        .run(&EmbeddingIndex::default(), &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, _| {})
        .unwrap();

    assert_eq!(report.state, SessionState::TimedOut);
    assert!(sink.records().is_empty());
}

#[test]
fn cancellation_stops_before_the_next_frame() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let cancel = CancelToken::new();
    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 10]);
    let report = live
        .run(&enrolled_index(), &mut source, &ManualClock::new(), &cancel, |_, _, _| cancel.cancel())
        .unwrap();

    assert_eq!(report.state, SessionState::Cancelled);
    assert_eq!(report.frames, 1);
    assert!(sink.records().is_empty());
    assert!(source.is_released());
}

#[test]
fn source_failure_is_fatal_and_releases_the_source() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let mut source = FailingSource::default();
    let err = live
        .run(&enrolled_index(), &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, _| {})
        .unwrap_err();

    assert!(matches!(err, AttendanceError::Camera(_)));
    assert!(source.released);
    assert!(sink.records().is_empty());
}

#[test]
fn manual_clock_bounds_session_length() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let clock = ManualClock::new();
    let mut source = ImageSequenceSource::from_images(Vec::new());
    let start = clock.now();
    live.run(&enrolled_index(), &mut source, &clock, &CancelToken::new(), |_, _, _| {})
        .unwrap();

    let elapsed = clock.now() - start;
    assert_eq!(elapsed, Duration::from_secs(config.session.timeout_seconds));
}

#[test]
fn frame_with_unusable_face_box_counts_as_no_match() {
    let sink = MemoryAttendanceSink::new();
    let caps = Capabilities::new(Some(Box::new(GlitchyDetector::new(1))), Some(Box::new(MeanColorExtractor)), false);
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::untrained(&config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    // First box lies outside the frame, so its crop is empty.
    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 5]);
    let mut states = Vec::new();
    let report = live
        .run(&enrolled_index(), &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, state| {
            states.push(state.clone())
        })
        .unwrap();

    assert_eq!(states[0], SessionState::Waiting);
    assert!(matches!(&report.state, SessionState::Accepted { identity, .. } if identity.as_str() == "ana"));
    assert_eq!(report.frames, 4);
    assert_eq!(sink.records().len(), 1);
    assert!(source.is_released());
}

fn rejecting_model() -> LivenessModel {
    LivenessModel::from_parts(8, Array4::zeros((1, 3, 3, 3)), Array1::zeros(1), Array1::zeros(1), -5.0).unwrap()
}

#[test]
fn rejected_liveness_keeps_confirming_until_timeout() {
    let sink = MemoryAttendanceSink::new();
    let caps = capabilities();
    let config = test_config();
    let engine = RecognitionEngine::new(&config.recognition);
    let liveness = LivenessClassifier::with_model(rejecting_model(), &config.liveness);
    let live = LiveAttendance::new(&caps, &engine, &liveness, &sink, &config.session);

    let mut source = ImageSequenceSource::from_images(vec![frame_with_face(RED); 9]);
    let mut states = Vec::new();
    let report = live
        .run(&enrolled_index(), &mut source, &ManualClock::new(), &CancelToken::new(), |_, _, state| {
            states.push(state.clone())
        })
        .unwrap();

    assert_eq!(report.liveness_checks, 3);
    assert_eq!(report.spoof_rejections, 3);
    assert_eq!(
        states[2],
        SessionState::Confirming {
            identity: IdentityKey::new("ana"),
            count: 0
        }
    );
    assert_eq!(report.state, SessionState::TimedOut);
    assert!(report.record.is_none());
    assert!(sink.records().is_empty());
}
