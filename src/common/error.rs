use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Import rejected: {0}")]
    Import(#[from] ImportError),

    #[error("Enrollment failed: {0}")]
    Enrollment(EnrollmentFailure),

    #[error("Capability unavailable: {0}")]
    Unavailable(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Reasons an untrusted embedding snapshot is refused before anything is applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("snapshot is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("snapshot is not valid JSON: {0}")]
    Malformed(String),

    #[error("snapshot root is not a mapping")]
    NotAMapping,

    #[error("snapshot field `{0}` is missing or has the wrong type")]
    MissingField(&'static str),

    #[error("snapshot lists {identities} identities but {embeddings} embeddings")]
    CardinalityMismatch { identities: usize, embeddings: usize },

    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    InconsistentDimensions {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("embedding {0} contains a non-finite value")]
    NonFiniteValue(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentFailure {
    /// The frame source could not produce the first frame.
    SourceUnavailable(String),
    /// Every capture attempt was rejected by the quality gate.
    NoUsableFrames { attempts: u32 },
    /// None of the training images yielded a single-face embedding.
    NoFacesDetected { images: usize },
}

impl std::fmt::Display for EnrollmentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnavailable(reason) => write!(f, "frame source unavailable: {}", reason),
            Self::NoUsableFrames { attempts } => {
                write!(f, "no usable frames after {} attempts", attempts)
            }
            Self::NoFacesDetected { images } => {
                write!(f, "no faces detected in {} training images", images)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
