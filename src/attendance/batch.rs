use crate::attendance::capabilities::Capabilities;
use crate::common::Result;
use crate::core::detector::FaceBox;
use crate::core::matcher::{MatchOutcome, RecognitionEngine};
use crate::storage::attendance::{AttendanceRecord, AttendanceSink, InsertOutcome, VerificationMethod};
use crate::storage::embedding_store::{EmbeddingIndex, IdentityKey};
use chrono::NaiveDateTime;
use image::DynamicImage;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum UnidentifiedReason {
    NoEnrolledIdentities,
    BelowThreshold { closest: IdentityKey, distance: f32 },
    NoCandidates,
}

impl fmt::Display for UnidentifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEnrolledIdentities => write!(f, "no enrolled identities"),
            Self::BelowThreshold { distance, .. } => {
                write!(f, "below confidence threshold (distance {:.3})", distance)
            }
            Self::NoCandidates => write!(f, "no candidates"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceResolution {
    Identified { identity: IdentityKey, confidence: f32 },
    Unidentified(UnidentifiedReason),
}

#[derive(Debug, Clone)]
pub struct ResolvedFace {
    pub face: FaceBox,
    pub resolution: FaceResolution,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub faces_detected: usize,
    pub identified: usize,
    pub unidentified: usize,
    pub new_records: usize,
    pub duplicates: usize,
    pub faces: Vec<ResolvedFace>,
    pub recorded: Vec<IdentityKey>,
}

/// Marks attendance for everyone recognised in one group photo.
///
/// No confirmation window and no liveness check: a still upload cannot be
/// liveness-checked, so each face is resolved independently.
pub struct BatchIdentifier<'a> {
    capabilities: &'a Capabilities,
    engine: &'a RecognitionEngine,
    sink: &'a dyn AttendanceSink,
}

impl<'a> BatchIdentifier<'a> {
    pub fn new(capabilities: &'a Capabilities, engine: &'a RecognitionEngine, sink: &'a dyn AttendanceSink) -> Self {
        Self {
            capabilities,
            engine,
            sink,
        }
    }

    pub fn resolve_faces(&self, image: &DynamicImage, index: &EmbeddingIndex) -> Result<Vec<ResolvedFace>> {
        let detector = self.capabilities.detector()?;
        let extractor = self.capabilities.extractor()?;

        let faces = detector.detect(image)?;
        let mut resolved = Vec::with_capacity(faces.len());

        for face in faces {
            let resolution = match extractor.extract(image, &face) {
                Ok(embedding) => match self.engine.recognize(index, &embedding, false).outcome {
                    MatchOutcome::Matched(m) => FaceResolution::Identified {
                        identity: m.candidate.identity,
                        confidence: m.candidate.confidence,
                    },
                    MatchOutcome::BelowThreshold(m) => FaceResolution::Unidentified(UnidentifiedReason::BelowThreshold {
                        closest: m.candidate.identity,
                        distance: m.candidate.mean_distance,
                    }),
                    MatchOutcome::NoCandidates => FaceResolution::Unidentified(UnidentifiedReason::NoCandidates),
                    MatchOutcome::EmptyStore => FaceResolution::Unidentified(UnidentifiedReason::NoEnrolledIdentities),
                },
                Err(e) => {
                    tracing::warn!("Embedding extraction failed for a detected face: {}", e);
                    FaceResolution::Unidentified(UnidentifiedReason::NoCandidates)
                }
            };
            resolved.push(ResolvedFace { face, resolution });
        }

        Ok(resolved)
    }

    /// Resolves every face, then writes one record per identified person
    /// unless they already have one for the day of `when`.
    pub fn identify(&self, image: &DynamicImage, index: &EmbeddingIndex, when: NaiveDateTime) -> Result<BatchReport> {
        let faces = self.resolve_faces(image, index)?;
        let mut report = BatchReport {
            faces_detected: faces.len(),
            ..BatchReport::default()
        };

        for resolved in &faces {
            match &resolved.resolution {
                FaceResolution::Identified { identity, confidence } => {
                    report.identified += 1;
                    let record = AttendanceRecord::at(
                        identity.clone(),
                        when,
                        *confidence,
                        VerificationMethod::BatchUpload,
                        "group photo",
                    );
                    match self.sink.insert_unique(record)? {
                        InsertOutcome::Inserted => {
                            report.new_records += 1;
                            report.recorded.push(identity.clone());
                        }
                        InsertOutcome::Duplicate => report.duplicates += 1,
                    }
                }
                FaceResolution::Unidentified(reason) => {
                    report.unidentified += 1;
                    tracing::debug!("Unidentified face at ({:.0}, {:.0}): {}", resolved.face.x1, resolved.face.y1, reason);
                }
            }
        }

        report.faces = faces;
        tracing::info!(
            "Batch: {} faces, {} identified, {} unidentified, {} new records, {} duplicates",
            report.faces_detected,
            report.identified,
            report.unidentified,
            report.new_records,
            report.duplicates
        );
        Ok(report)
    }
}
