use crate::attendance::capabilities::Capabilities;
use crate::attendance::CancelToken;
use crate::camera::{FrameSource, ReleaseGuard, list_images};
use crate::common::{AttendanceError, Config, EnrollmentFailure, Result};
use crate::core::augment::Augmenter;
use crate::core::quality::QualityAssessor;
use crate::core::validator::{TrainingReport, TrainingValidator};
use crate::storage::embedding_store::{EmbeddingStore, IdentityKey};
use crate::storage::roster::Roster;
use image::DynamicImage;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct CaptureReport {
    pub frames: Vec<DynamicImage>,
    pub attempts: u32,
    pub rejected: u32,
    /// Improvement hints for the most recent rejected frame.
    pub last_feedback: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub identity: IdentityKey,
    pub source_images: usize,
    pub training_images: usize,
    /// Training images that produced no embedding.
    pub skipped_images: usize,
    pub embeddings_added: usize,
    pub total_embeddings: usize,
    pub validation: TrainingReport,
}

#[derive(Debug, Default)]
pub struct BulkEnrollmentReport {
    pub enrolled: Vec<EnrollmentReport>,
    /// Folder name and reason for each identity that failed to train.
    pub failed: Vec<(String, String)>,
    /// Folders that matched no roster entry.
    pub unmatched: Vec<String>,
}

/// Capture, augmentation, embedding extraction, validation and storage for
/// one identity at a time.
pub struct Enroller<'a> {
    capabilities: &'a Capabilities,
    store: &'a EmbeddingStore,
    config: &'a Config,
}

impl<'a> Enroller<'a> {
    pub fn new(capabilities: &'a Capabilities, store: &'a EmbeddingStore, config: &'a Config) -> Self {
        Self {
            capabilities,
            store,
            config,
        }
    }

    /// Pulls frames until the target count of quality-gated, single-face
    /// frames is reached, the attempt cap is hit, or the source runs dry.
    /// The source is released on every exit path.
    pub fn capture(&self, source: &mut dyn FrameSource, cancel: Option<&CancelToken>) -> Result<CaptureReport> {
        let mut guard = ReleaseGuard::new(source);
        let detector = self.capabilities.detector()?;
        let assessor = QualityAssessor::new(&self.config.quality);
        let settings = &self.config.enrollment;
        let interval = Duration::from_millis(settings.capture_interval_ms);

        let mut report = CaptureReport {
            frames: Vec::new(),
            attempts: 0,
            rejected: 0,
            last_feedback: Vec::new(),
        };

        while report.frames.len() < settings.target_captures && report.attempts < settings.max_attempts {
            // Every attempt after the first waits one interval.
            if report.attempts > 0 && !interval.is_zero() {
                std::thread::sleep(interval);
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                tracing::info!("Capture cancelled after {} attempts", report.attempts);
                break;
            }

            let frame = match guard.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) if report.attempts == 0 => {
                    return Err(AttendanceError::Enrollment(EnrollmentFailure::SourceUnavailable(
                        "source produced no frames".into(),
                    )))
                }
                Ok(None) => break,
                Err(e) if report.attempts == 0 => {
                    return Err(AttendanceError::Enrollment(EnrollmentFailure::SourceUnavailable(e.to_string())))
                }
                Err(e) => return Err(e),
            };
            report.attempts += 1;

            let faces = match detector.detect(&frame) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!("Detection failed on capture attempt {}: {}", report.attempts, e);
                    report.rejected += 1;
                    continue;
                }
            };

            if faces.len() > 1 {
                tracing::debug!("Rejected frame {}: {} faces in view", report.attempts, faces.len());
                report.rejected += 1;
                report.last_feedback = vec!["Only the person enrolling should be in view".to_string()];
                continue;
            }

            let score = assessor.assess(&frame, faces.first());
            if score.meets_minimum(self.config.quality.min_score) {
                tracing::debug!(
                    "Accepted frame {} ({}/{}), {}",
                    report.attempts,
                    report.frames.len() + 1,
                    settings.target_captures,
                    score.get_quality_assessment()
                );
                report.frames.push(frame);
            } else {
                report.rejected += 1;
                report.last_feedback = score.get_improvement_suggestions(&self.config.quality);
                tracing::debug!("Rejected frame {}: {}", report.attempts, score.get_quality_assessment());
            }
        }

        if report.frames.is_empty() {
            return Err(AttendanceError::Enrollment(EnrollmentFailure::NoUsableFrames {
                attempts: report.attempts,
            }));
        }

        tracing::info!(
            "Captured {} frames in {} attempts ({} rejected)",
            report.frames.len(),
            report.attempts,
            report.rejected
        );
        Ok(report)
    }

    /// Augments `images`, extracts one embedding per image from its first
    /// detected face, validates the set and appends it to the store.
    ///
    /// Validation is advisory: a low-consistency set is logged and still stored.
    pub fn train(&self, identity: &IdentityKey, images: &[DynamicImage]) -> Result<EnrollmentReport> {
        let detector = self.capabilities.detector()?;
        let extractor = self.capabilities.extractor()?;

        let training_images = if self.capabilities.augmentation_enabled() && self.config.augmentation.enabled {
            Augmenter::new(&self.config.augmentation).expand(images)
        } else {
            images.to_vec()
        };

        let mut embeddings = Vec::with_capacity(training_images.len());
        for (i, image) in training_images.iter().enumerate() {
            let faces = match detector.detect(image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!("Detection failed on training image {}: {}", i, e);
                    continue;
                }
            };
            let Some(face) = faces.first() else {
                tracing::debug!("No face in training image {}", i);
                continue;
            };

            match extractor.extract(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => tracing::warn!("Embedding extraction failed on training image {}: {}", i, e),
            }
        }

        if embeddings.is_empty() {
            return Err(AttendanceError::Enrollment(EnrollmentFailure::NoFacesDetected {
                images: training_images.len(),
            }));
        }

        let validation = TrainingValidator::new(&self.config.validation).validate(&embeddings);
        if !validation.is_valid {
            tracing::warn!(
                "Low consistency for {}: average distance {:.3} (consistency {:.2}); storing anyway",
                identity,
                validation.average_distance,
                validation.consistency
            );
        }

        let embeddings_added = embeddings.len();
        let total_embeddings = self.store.append(identity, embeddings)?;

        tracing::info!(
            "Enrolled {}: {} new embeddings from {} training images ({} total)",
            identity,
            embeddings_added,
            training_images.len(),
            total_embeddings
        );

        Ok(EnrollmentReport {
            identity: identity.clone(),
            source_images: images.len(),
            training_images: training_images.len(),
            skipped_images: training_images.len() - embeddings_added,
            embeddings_added,
            total_embeddings,
            validation,
        })
    }

    pub fn enroll_from_source(
        &self,
        identity: &IdentityKey,
        source: &mut dyn FrameSource,
        cancel: Option<&CancelToken>,
    ) -> Result<EnrollmentReport> {
        let capture = self.capture(source, cancel)?;
        self.train(identity, &capture.frames)
    }

    /// Enrolls from a tree with one sub-folder of photos per person. Folder
    /// names are matched against the roster by key or display name.
    pub fn enroll_directory_tree(&self, root: &Path, roster: &dyn Roster) -> Result<BulkEnrollmentReport> {
        let mut folders: Vec<_> = fs::read_dir(root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        let mut report = BulkEnrollmentReport::default();
        for folder in folders {
            let name = match folder.file_name().and_then(|n| n.to_str()) {
                Some(name) if name != "__MACOSX" && !name.starts_with('.') => name.to_string(),
                _ => continue,
            };

            let Some(entry) = roster.find(&name) else {
                tracing::warn!("No roster entry matches folder '{}', skipping", name);
                report.unmatched.push(name);
                continue;
            };

            let images: Vec<DynamicImage> = list_images(&folder)?
                .iter()
                .filter_map(|path| match image::open(path) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable image {}: {}", path.display(), e);
                        None
                    }
                })
                .collect();

            if images.is_empty() {
                report.failed.push((name, "no readable images".to_string()));
                continue;
            }

            match self.train(&entry.identity, &images) {
                Ok(enrolled) => report.enrolled.push(enrolled),
                Err(AttendanceError::Enrollment(reason)) => report.failed.push((name, reason.to_string())),
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Bulk enrollment: {} enrolled, {} failed, {} unmatched",
            report.enrolled.len(),
            report.failed.len(),
            report.unmatched.len()
        );
        Ok(report)
    }
}
