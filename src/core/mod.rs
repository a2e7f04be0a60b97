pub mod augment;
pub mod detector;
pub mod liveness;
pub mod matcher;
pub mod onnx;
pub mod quality;
pub mod recognizer;
pub mod validator;

pub use augment::Augmenter;
pub use detector::{FaceBox, FaceDetect, OnnxFaceDetector};
pub use liveness::{LivenessClassifier, LivenessModel, LivenessStatus, LivenessVerdict};
pub use matcher::{MatchOutcome, Recognition, RecognitionCandidate, RecognitionEngine, ThresholdMode};
pub use quality::{QualityAssessor, QualityScore};
pub use recognizer::{Embedding, EmbeddingExtract, OnnxEmbeddingExtractor, euclidean_distance};
pub use validator::{TrainingReport, TrainingValidator};
