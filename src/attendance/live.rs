//! Single-subject live attendance.
//!
//! [`LiveSession`] is the pure state machine: it only sees per-frame
//! observations, liveness results, cancellation and timeouts.
//! [`LiveAttendance`] drives it from a frame source and a clock.

use crate::attendance::capabilities::Capabilities;
use crate::attendance::CancelToken;
use crate::camera::{FrameSource, ReleaseGuard};
use crate::common::{Result, config::SessionConfig};
use crate::core::detector::FaceBox;
use crate::core::liveness::{LivenessClassifier, LivenessVerdict};
use crate::core::matcher::RecognitionEngine;
use crate::core::recognizer::crop_face;
use crate::storage::attendance::{AttendanceRecord, AttendanceSink, InsertOutcome, VerificationMethod};
use crate::storage::embedding_store::{EmbeddingIndex, IdentityKey};
use image::DynamicImage;
use std::cell::Cell;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Waiting,
    Confirming { identity: IdentityKey, count: u32 },
    Accepted { identity: IdentityKey, confidence: f32 },
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::TimedOut | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameObservation {
    /// No face, or no candidate cleared the threshold.
    NoMatch,
    Match { identity: IdentityKey, confidence: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    /// The confirmation window is full; run the liveness check once and
    /// report the result through [`LiveSession::resolve_liveness`].
    CheckLiveness { identity: IdentityKey, confidence: f32 },
    Finished,
}

#[derive(Debug, Clone)]
pub struct LiveSession {
    state: SessionState,
    window: u32,
    pending_confidence: f32,
}

impl LiveSession {
    pub fn new(confirmation_window: u32) -> Self {
        Self {
            state: SessionState::Waiting,
            window: confirmation_window.max(1),
            pending_confidence: 0.0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn observe(&mut self, observation: FrameObservation) -> Step {
        if self.state.is_terminal() {
            return Step::Finished;
        }

        let (identity, confidence) = match observation {
            FrameObservation::NoMatch => {
                self.state = SessionState::Waiting;
                return Step::Continue;
            }
            FrameObservation::Match { identity, confidence } => (identity, confidence),
        };

        let count = match &self.state {
            SessionState::Confirming { identity: current, count } if *current == identity => count + 1,
            _ => 1,
        };
        self.pending_confidence = confidence;
        self.state = SessionState::Confirming {
            identity: identity.clone(),
            count,
        };

        if count >= self.window {
            Step::CheckLiveness { identity, confidence }
        } else {
            Step::Continue
        }
    }

    /// A real face accepts the candidate; a spoof keeps confirming the same
    /// identity from a zero count.
    pub fn resolve_liveness(&mut self, is_real: bool) -> Step {
        let SessionState::Confirming { identity, count } = &self.state else {
            return if self.state.is_terminal() { Step::Finished } else { Step::Continue };
        };
        if *count < self.window {
            return Step::Continue;
        }

        let identity = identity.clone();
        if is_real {
            self.state = SessionState::Accepted {
                identity,
                confidence: self.pending_confidence,
            };
            Step::Finished
        } else {
            self.state = SessionState::Confirming { identity, count: 0 };
            Step::Continue
        }
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
        }
    }

    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::TimedOut;
        }
    }
}

/// Time source for the driver loop.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on.
pub struct ManualClock {
    start: Instant,
    elapsed: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Clone)]
pub struct LiveSessionReport {
    pub state: SessionState,
    pub frames: u32,
    pub liveness_checks: u32,
    pub spoof_rejections: u32,
    pub record: Option<AttendanceRecord>,
    pub insert: Option<InsertOutcome>,
}

pub struct LiveAttendance<'a> {
    capabilities: &'a Capabilities,
    engine: &'a RecognitionEngine,
    liveness: &'a LivenessClassifier,
    sink: &'a dyn AttendanceSink,
    config: &'a SessionConfig,
}

impl<'a> LiveAttendance<'a> {
    pub fn new(
        capabilities: &'a Capabilities,
        engine: &'a RecognitionEngine,
        liveness: &'a LivenessClassifier,
        sink: &'a dyn AttendanceSink,
        config: &'a SessionConfig,
    ) -> Self {
        Self {
            capabilities,
            engine,
            liveness,
            sink,
            config,
        }
    }

    /// Runs one session to a terminal state against `index`.
    ///
    /// A source error is returned immediately. Detection or embedding errors
    /// on a single frame count as no match. The source is released on every exit. `on_frame` sees each frame, the subject's
    /// box if one was found, and the state after the frame was processed.
    pub fn run(
        &self,
        index: &EmbeddingIndex,
        source: &mut dyn FrameSource,
        clock: &dyn Clock,
        cancel: &CancelToken,
        mut on_frame: impl FnMut(&DynamicImage, Option<&FaceBox>, &SessionState),
    ) -> Result<LiveSessionReport> {
        let mut guard = ReleaseGuard::new(source);
        let detector = self.capabilities.detector()?;
        let extractor = self.capabilities.extractor()?;

        let started = clock.now();
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let interval = Duration::from_millis(self.config.frame_interval_ms);

        let mut session = LiveSession::new(self.config.confirmation_frames);
        let mut report = LiveSessionReport {
            state: SessionState::Waiting,
            frames: 0,
            liveness_checks: 0,
            spoof_rejections: 0,
            record: None,
            insert: None,
        };

        loop {
            if cancel.is_cancelled() {
                session.cancel();
                break;
            }
            if clock.now().saturating_duration_since(started) >= timeout {
                session.time_out();
                break;
            }

            if let Some(frame) = guard.next_frame()? {
                report.frames += 1;

                // Largest face is the subject; bystanders further back are ignored.
                let subject = match detector.detect(&frame) {
                    Ok(faces) => faces.into_iter().max_by(|a, b| a.area().total_cmp(&b.area())),
                    Err(e) => {
                        tracing::warn!("Detection failed on frame {}: {}", report.frames, e);
                        None
                    }
                };

                let (observation, crop) = match &subject {
                    None => (FrameObservation::NoMatch, None),
                    Some(face) => match extractor.extract(&frame, face) {
                        Ok(embedding) => {
                            let recognition = self.engine.recognize(index, &embedding, false);
                            match recognition.matched() {
                                Some(candidate) => (
                                    FrameObservation::Match {
                                        identity: candidate.identity.clone(),
                                        confidence: candidate.confidence,
                                    },
                                    crop_face(&frame, face),
                                ),
                                None => (FrameObservation::NoMatch, None),
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Embedding failed on frame {}: {}", report.frames, e);
                            (FrameObservation::NoMatch, None)
                        }
                    },
                };

                if let Step::CheckLiveness { identity, confidence } = session.observe(observation) {
                    let crop = crop.unwrap_or_else(|| frame.clone());
                    let verdict = self.liveness.predict(&crop);
                    report.liveness_checks += 1;

                    if let Step::Finished = session.resolve_liveness(verdict.is_real) {
                        let record = AttendanceRecord::now(
                            identity,
                            confidence,
                            VerificationMethod::Live,
                            liveness_note(&verdict),
                        );
                        report.insert = Some(self.sink.insert_unique(record.clone())?);
                        report.record = Some(record);
                    } else {
                        report.spoof_rejections += 1;
                        tracing::warn!(
                            "Liveness check failed for {} (confidence {:.2}); confirmation restarted",
                            identity,
                            verdict.confidence
                        );
                    }
                }

                on_frame(&frame, subject.as_ref(), session.state());
                if session.state().is_terminal() {
                    break;
                }
            }

            clock.sleep(interval);
        }

        report.state = session.state().clone();
        tracing::info!("Live session ended: {:?} after {} frames", report.state, report.frames);
        Ok(report)
    }
}

fn liveness_note(verdict: &LivenessVerdict) -> String {
    if verdict.model_present {
        format!("liveness confirmed ({:.2})", verdict.confidence)
    } else {
        "liveness unchecked (no model)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(identity: &str) -> FrameObservation {
        FrameObservation::Match {
            identity: identity.into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn consecutive_matches_reach_the_window() {
        let mut session = LiveSession::new(3);
        assert_eq!(session.observe(seen("a")), Step::Continue);
        assert_eq!(session.observe(seen("a")), Step::Continue);
        assert_eq!(
            session.observe(seen("a")),
            Step::CheckLiveness {
                identity: "a".into(),
                confidence: 0.8
            }
        );

        assert_eq!(session.resolve_liveness(true), Step::Finished);
        assert_eq!(
            session.state(),
            &SessionState::Accepted {
                identity: "a".into(),
                confidence: 0.8
            }
        );
        assert_eq!(session.observe(seen("b")), Step::Finished);
    }

    #[test]
    fn no_match_resets_to_waiting() {
        let mut session = LiveSession::new(3);
        session.observe(seen("a"));
        session.observe(seen("a"));
        session.observe(FrameObservation::NoMatch);
        assert_eq!(session.state(), &SessionState::Waiting);

        session.observe(seen("a"));
        assert_eq!(
            session.state(),
            &SessionState::Confirming {
                identity: "a".into(),
                count: 1
            }
        );
    }

    #[test]
    fn different_identity_restarts_count() {
        let mut session = LiveSession::new(3);
        session.observe(seen("a"));
        session.observe(seen("a"));
        session.observe(seen("b"));
        assert_eq!(
            session.state(),
            &SessionState::Confirming {
                identity: "b".into(),
                count: 1
            }
        );
    }

    #[test]
    fn spoof_resets_counter_but_keeps_confirming() {
        let mut session = LiveSession::new(2);
        session.observe(seen("a"));
        assert!(matches!(session.observe(seen("a")), Step::CheckLiveness { .. }));

        assert_eq!(session.resolve_liveness(false), Step::Continue);
        assert_eq!(
            session.state(),
            &SessionState::Confirming {
                identity: "a".into(),
                count: 0
            }
        );
        assert_eq!(session.observe(seen("a")), Step::Continue);
    }

    #[test]
    fn cancel_and_timeout_are_terminal_and_sticky() {
        let mut session = LiveSession::new(3);
        session.observe(seen("a"));
        session.cancel();
        assert_eq!(session.state(), &SessionState::Cancelled);
        session.time_out();
        assert_eq!(session.state(), &SessionState::Cancelled);

        let mut session = LiveSession::new(3);
        session.time_out();
        assert_eq!(session.state(), &SessionState::TimedOut);
        assert_eq!(session.resolve_liveness(true), Step::Finished);
    }

    #[test]
    fn manual_clock_moves_only_when_slept() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
    }
}
