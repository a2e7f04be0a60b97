use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{AttendanceError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,
    pub quality: QualityConfig,
    pub augmentation: AugmentationConfig,
    pub enrollment: EnrollmentConfig,
    pub validation: ValidationConfig,
    pub recognition: RecognitionConfig,
    pub liveness: LivenessConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: u32,
    pub warmup_delay_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            warmup_frames: 5,
            warmup_delay_ms: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    /// ONNX Runtime graph optimization level (0-3).
    pub optimization_level: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/face_detector.onnx"),
            recognizer_path: PathBuf::from("models/face_embedder.onnx"),
            optimization_level: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub detection_confidence: f32,
    pub nms_iou_threshold: f32,
    /// Upper bound on faces returned per image; group photos need more than a handful.
    pub max_faces: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            detection_confidence: 0.5,
            nms_iou_threshold: 0.45,
            max_faces: 64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
    /// 1 for grayscale embedding models, 3 for RGB.
    pub channels: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: 112,
            normalization_value: 127.5,
            channels: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QualityConfig {
    /// Variance of the Laplacian that maps to a sharpness score of 1.0.
    pub sharpness_scale: f32,
    pub ideal_brightness: f32,
    pub face_ratio_min: f32,
    pub face_ratio_max: f32,
    pub sharpness_weight: f32,
    pub brightness_weight: f32,
    pub face_size_weight: f32,
    /// Composite score a capture frame must reach to be accepted.
    pub min_score: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sharpness_scale: 500.0,
            ideal_brightness: 127.5,
            face_ratio_min: 0.20,
            face_ratio_max: 0.40,
            sharpness_weight: 0.35,
            brightness_weight: 0.25,
            face_size_weight: 0.40,
            min_score: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    pub variants_per_image: usize,
    pub flip_probability: f64,
    pub max_rotation_degrees: f32,
    pub scale_min: f32,
    pub scale_max: f32,
    pub brightness_min: f32,
    pub brightness_max: f32,
    pub max_blur_sigma: f32,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            variants_per_image: 2,
            flip_probability: 0.5,
            max_rotation_degrees: 10.0,
            scale_min: 0.9,
            scale_max: 1.1,
            brightness_min: 0.8,
            brightness_max: 1.2,
            max_blur_sigma: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub target_captures: usize,
    pub max_attempts: u32,
    pub capture_interval_ms: u64,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            target_captures: 30,
            max_attempts: 150,
            capture_interval_ms: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ValidationConfig {
    pub sample_cap: usize,
    pub acceptable_distance: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_cap: 50,
            acceptable_distance: 0.6,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecognitionConfig {
    pub strict_threshold: f32,
    pub default_threshold: f32,
    pub relaxed_threshold: f32,
    /// Gap between best and runner-up mean distance that unlocks the relaxed threshold.
    pub margin: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            strict_threshold: 0.45,
            default_threshold: 0.50,
            relaxed_threshold: 0.55,
            margin: 0.10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LivenessConfig {
    pub input_size: u32,
    pub filters: usize,
    pub epochs: usize,
    pub patience: usize,
    pub validation_split: f32,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            input_size: 64,
            filters: 8,
            epochs: 10,
            patience: 3,
            validation_split: 0.2,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub confirmation_frames: u32,
    pub timeout_seconds: u64,
    pub frame_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confirmation_frames: 3,
            timeout_seconds: 30,
            frame_interval_ms: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub max_import_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_import_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendanceError::Config(format!(
                "Config file not found: {}. Please create it from configs/rollcall.example.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AttendanceError::Config(format!("parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise falls back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(invalid(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(invalid(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(invalid("Detector input dimensions must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detector.detection_confidence) {
            return Err(invalid(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.detection_confidence
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(invalid(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }
        if self.recognizer.channels != 1 && self.recognizer.channels != 3 {
            return Err(invalid(format!(
                "Recognizer channels must be 1 or 3, got {}", self.recognizer.channels
            )));
        }

        let q = &self.quality;
        let weight_sum = q.sharpness_weight + q.brightness_weight + q.face_size_weight;
        if (weight_sum - 1.0).abs() > 1e-3 {
            return Err(invalid(format!("Quality weights must sum to 1.0, got {:.3}", weight_sum)));
        }
        if q.face_ratio_min <= 0.0 || q.face_ratio_min >= q.face_ratio_max || q.face_ratio_max > 1.0 {
            return Err(invalid(format!(
                "Face ratio band must satisfy 0 < min < max <= 1, got {}..{}",
                q.face_ratio_min, q.face_ratio_max
            )));
        }
        if q.sharpness_scale <= 0.0 || q.ideal_brightness <= 0.0 {
            return Err(invalid("Sharpness scale and ideal brightness must be positive".to_string()));
        }

        let a = &self.augmentation;
        if a.scale_min <= 0.0 || a.scale_min > a.scale_max {
            return Err(invalid("Augmentation scale range is empty".to_string()));
        }
        if a.brightness_min <= 0.0 || a.brightness_min > a.brightness_max {
            return Err(invalid("Augmentation brightness range is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&a.flip_probability) {
            return Err(invalid("Flip probability must be between 0.0 and 1.0".to_string()));
        }

        if self.enrollment.target_captures == 0 || self.enrollment.max_attempts == 0 {
            return Err(invalid("Enrollment target and attempt cap must be at least 1".to_string()));
        }
        if self.validation.sample_cap < 2 {
            return Err(invalid("Validation sample cap must be at least 2".to_string()));
        }

        let r = &self.recognition;
        if !(r.strict_threshold <= r.default_threshold && r.default_threshold <= r.relaxed_threshold) {
            return Err(invalid(format!(
                "Thresholds must satisfy strict <= default <= relaxed, got {} / {} / {}",
                r.strict_threshold, r.default_threshold, r.relaxed_threshold
            )));
        }
        if r.strict_threshold <= 0.0 || r.margin < 0.0 {
            return Err(invalid("Recognition thresholds must be positive".to_string()));
        }

        let l = &self.liveness;
        if l.input_size < 4 || l.filters == 0 || l.epochs == 0 {
            return Err(invalid("Liveness model needs input >= 4 px, >= 1 filter and >= 1 epoch".to_string()));
        }
        if !(l.validation_split > 0.0 && l.validation_split < 1.0) {
            return Err(invalid(format!(
                "Liveness validation split must be in (0, 1), got {}", l.validation_split
            )));
        }

        if self.session.confirmation_frames == 0 {
            return Err(invalid("Confirmation window must be at least 1 frame".to_string()));
        }
        if self.session.timeout_seconds < 1 || self.session.timeout_seconds > 600 {
            return Err(invalid(format!(
                "Session timeout must be between 1 and 600 seconds, got {}",
                self.session.timeout_seconds
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> AttendanceError {
    AttendanceError::Config(message)
}
