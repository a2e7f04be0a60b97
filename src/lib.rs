// Core modules
pub mod attendance;
pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod storage;

// Re-export commonly used types
pub use attendance::{BatchIdentifier, CancelToken, Capabilities, Enroller, LiveAttendance, SessionState};
pub use camera::{FrameSource, ImageSequenceSource};
pub use common::{AttendanceError, Config, DataPaths, Result};
pub use core::{
    Embedding, EmbeddingExtract, FaceBox, FaceDetect, LivenessClassifier, QualityAssessor, RecognitionEngine,
};
pub use storage::{AttendanceRecord, AttendanceSink, EmbeddingStore, IdentityKey, JsonlAttendanceLedger};
