use crate::common::{AttendanceError, Config, DataPaths, Result};
use crate::core::detector::{FaceDetect, OnnxFaceDetector};
use crate::core::liveness::{LivenessClassifier, LivenessStatus};
use crate::core::recognizer::{EmbeddingExtract, OnnxEmbeddingExtractor};
use std::fmt;

/// Optional collaborators, resolved once at startup. Call sites ask for a
/// capability and get `AttendanceError::Unavailable` when it is missing.
pub struct Capabilities {
    detector: Option<Box<dyn FaceDetect>>,
    extractor: Option<Box<dyn EmbeddingExtract>>,
    augmentation: bool,
}

impl Capabilities {
    pub fn new(
        detector: Option<Box<dyn FaceDetect>>,
        extractor: Option<Box<dyn EmbeddingExtract>>,
        augmentation: bool,
    ) -> Self {
        Self {
            detector,
            extractor,
            augmentation,
        }
    }

    /// Loads the ONNX models named in `config`. A model that fails to load
    /// leaves its capability unavailable and is logged, not returned.
    pub fn resolve(config: &Config, paths: &DataPaths) -> Self {
        let level = config.models.optimization_level;

        let detector_path = paths.resolve_model(&config.models.detector_path);
        let detector = match OnnxFaceDetector::new(&detector_path, &config.detector, level) {
            Ok(d) => Some(Box::new(d) as Box<dyn FaceDetect>),
            Err(e) => {
                tracing::warn!("Face detector unavailable: {}", e);
                None
            }
        };

        let recognizer_path = paths.resolve_model(&config.models.recognizer_path);
        let extractor = match OnnxEmbeddingExtractor::new(&recognizer_path, &config.recognizer, level) {
            Ok(e) => Some(Box::new(e) as Box<dyn EmbeddingExtract>),
            Err(e) => {
                tracing::warn!("Embedding extractor unavailable: {}", e);
                None
            }
        };

        Self::new(detector, extractor, config.augmentation.enabled)
    }

    pub fn detector(&self) -> Result<&dyn FaceDetect> {
        self.detector
            .as_deref()
            .ok_or(AttendanceError::Unavailable("face detector"))
    }

    pub fn extractor(&self) -> Result<&dyn EmbeddingExtract> {
        self.extractor
            .as_deref()
            .ok_or(AttendanceError::Unavailable("embedding extractor"))
    }

    pub fn augmentation_enabled(&self) -> bool {
        self.augmentation
    }

    pub fn report(&self, liveness: &LivenessClassifier) -> CapabilityReport {
        CapabilityReport {
            detector: self.detector.is_some(),
            extractor: self.extractor.is_some(),
            augmentation: self.augmentation,
            liveness: liveness.status(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityReport {
    pub detector: bool,
    pub extractor: bool,
    pub augmentation: bool,
    pub liveness: LivenessStatus,
}

impl CapabilityReport {
    pub fn recognition_ready(&self) -> bool {
        self.detector && self.extractor
    }
}

impl fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |ok: bool| if ok { "available" } else { "UNAVAILABLE" };
        writeln!(f, "Face detector:       {}", state(self.detector))?;
        writeln!(f, "Embedding extractor: {}", state(self.extractor))?;
        writeln!(f, "Augmentation:        {}", if self.augmentation { "enabled" } else { "disabled" })?;
        match self.liveness {
            LivenessStatus::Trained => write!(f, "Liveness model:      trained"),
            LivenessStatus::PermissiveFallback => write!(
                f,
                "Liveness model:      NOT TRAINED - permissive fallback, every face passes"
            ),
        }
    }
}
