//! Real-versus-reproduced face classifier.
//!
//! A deliberately small convolutional model: one bank of 3x3 RGB filters,
//! ReLU, global average pooling and a logistic output. It is trained in
//! process from labelled crops and persisted as a framed artifact.
//!
//! When no trained artifact exists every prediction passes with confidence
//! 0.5. This permissive fallback keeps attendance flowing on fresh
//! installs; it is reported through [`LivenessStatus::PermissiveFallback`]
//! and logged at warn level so operators can see that spoof checks are off.

use crate::common::{AttendanceError, Result, config::LivenessConfig};
use crate::storage::artifact;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array1, Array3, Array4, Axis};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MODEL_MAGIC: &[u8; 4] = b"RCLV";
const MODEL_VERSION: u32 = 1;
const FALLBACK_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessVerdict {
    pub is_real: bool,
    pub confidence: f32,
    /// False when the verdict came from the permissive fallback.
    pub model_present: bool,
}

impl LivenessVerdict {
    fn fallback() -> Self {
        Self {
            is_real: true,
            confidence: FALLBACK_CONFIDENCE,
            model_present: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Trained,
    PermissiveFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub samples: usize,
    pub validation_samples: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub validation_loss: f32,
    pub validation_accuracy: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessModel {
    input_size: u32,
    /// `(filter, channel, ky, kx)`
    kernels: Array4<f32>,
    conv_bias: Array1<f32>,
    dense_weights: Array1<f32>,
    dense_bias: f32,
}

impl LivenessModel {
    pub fn new(input_size: u32, filters: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0f32 / 27.0).sqrt();
        let kernels = Array4::from_shape_fn((filters, 3, 3, 3), |_| rng.gen_range(-bound..bound));
        let dense_weights = Array1::from_shape_fn(filters, |_| rng.gen_range(-0.5..0.5));
        Self {
            input_size,
            kernels,
            conv_bias: Array1::from_elem(filters, 0.1),
            dense_weights,
            dense_bias: 0.0,
        }
    }

    /// Builds a model from explicit weights, e.g. one exported elsewhere.
    /// `kernels` is `(filter, 3, 3, 3)`; bias and dense weights have one entry per filter.
    pub fn from_parts(
        input_size: u32,
        kernels: Array4<f32>,
        conv_bias: Array1<f32>,
        dense_weights: Array1<f32>,
        dense_bias: f32,
    ) -> Result<Self> {
        let (filters, channels, kh, kw) = kernels.dim();
        if filters == 0 || channels != 3 || kh != 3 || kw != 3 {
            return Err(AttendanceError::Model(format!(
                "liveness kernels must be (n, 3, 3, 3), got {:?}",
                kernels.dim()
            )));
        }
        if conv_bias.len() != filters || dense_weights.len() != filters {
            return Err(AttendanceError::Model(format!(
                "liveness model has {} filters but {} biases and {} dense weights",
                filters,
                conv_bias.len(),
                dense_weights.len()
            )));
        }
        if input_size < 4 {
            return Err(AttendanceError::Model(format!("liveness input size {} is too small", input_size)));
        }

        Ok(Self {
            input_size,
            kernels,
            conv_bias,
            dense_weights,
            dense_bias,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Resizes to the model input and scales pixels to `[0, 1]`, channel first.
    pub fn preprocess(&self, image: &DynamicImage) -> Array3<f32> {
        preprocess(image, self.input_size)
    }

    /// Probability that `input` shows a live face.
    pub fn probability(&self, input: &Array3<f32>) -> f32 {
        let pre = self.convolve(input);
        let pooled = pool(&pre);
        sigmoid(self.dense_weights.dot(&pooled) + self.dense_bias)
    }

    pub fn verdict(&self, image: &DynamicImage) -> LivenessVerdict {
        let p = self.probability(&self.preprocess(image));
        let is_real = p > 0.5;
        LivenessVerdict {
            is_real,
            confidence: if is_real { p } else { 1.0 - p },
            model_present: true,
        }
    }

    /// Valid 3x3 convolution; returns pre-activations `(filter, h - 2, w - 2)`.
    fn convolve(&self, x: &Array3<f32>) -> Array3<f32> {
        let (_, h, w) = x.dim();
        let filters = self.kernels.dim().0;
        let (oh, ow) = (h.saturating_sub(2), w.saturating_sub(2));
        let mut pre = Array3::<f32>::zeros((filters, oh, ow));

        for f in 0..filters {
            let bias = self.conv_bias[f];
            for i in 0..oh {
                for j in 0..ow {
                    let mut acc = bias;
                    for c in 0..3 {
                        for dy in 0..3 {
                            for dx in 0..3 {
                                acc += self.kernels[[f, c, dy, dx]] * x[[c, i + dy, j + dx]];
                            }
                        }
                    }
                    pre[[f, i, j]] = acc;
                }
            }
        }
        pre
    }

    /// One SGD step on a single labelled sample; returns the loss before the update.
    fn train_step(&mut self, x: &Array3<f32>, label: f32, learning_rate: f32) -> f32 {
        let pre = self.convolve(x);
        let pooled = pool(&pre);
        let p = sigmoid(self.dense_weights.dot(&pooled) + self.dense_bias);
        let loss = binary_cross_entropy(p, label);

        let grad_logit = p - label;
        let (filters, oh, ow) = pre.dim();
        let area = (oh * ow).max(1) as f32;

        for f in 0..filters {
            let grad_pooled = grad_logit * self.dense_weights[f];
            self.dense_weights[f] -= learning_rate * grad_logit * pooled[f];

            let scale = grad_pooled / area;
            if scale == 0.0 {
                continue;
            }

            let mut grad_kernel = [[[0.0f32; 3]; 3]; 3];
            let mut grad_bias = 0.0f32;
            for i in 0..oh {
                for j in 0..ow {
                    if pre[[f, i, j]] <= 0.0 {
                        continue;
                    }
                    grad_bias += 1.0;
                    for (c, plane) in grad_kernel.iter_mut().enumerate() {
                        for (dy, row) in plane.iter_mut().enumerate() {
                            for (dx, g) in row.iter_mut().enumerate() {
                                *g += x[[c, i + dy, j + dx]];
                            }
                        }
                    }
                }
            }

            for (c, plane) in grad_kernel.iter().enumerate() {
                for (dy, row) in plane.iter().enumerate() {
                    for (dx, g) in row.iter().enumerate() {
                        self.kernels[[f, c, dy, dx]] -= learning_rate * scale * g;
                    }
                }
            }
            self.conv_bias[f] -= learning_rate * scale * grad_bias;
        }
        self.dense_bias -= learning_rate * grad_logit;

        loss
    }

    /// Trains a fresh model with a seeded validation split and early stopping.
    /// The returned model carries the weights of the best validation epoch.
    pub fn fit(samples: &[(Array3<f32>, f32)], config: &LivenessConfig) -> Result<(Self, TrainingSummary)> {
        let reals = samples.iter().filter(|(_, y)| *y > 0.5).count();
        if reals == 0 || reals == samples.len() {
            return Err(AttendanceError::Model(
                "Liveness training needs at least one real and one fake sample".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);

        let n = samples.len();
        let validation_count = ((n as f32 * config.validation_split).round() as usize).clamp(1, n - 1);
        let (validation, train) = order.split_at(validation_count);
        let mut train = train.to_vec();

        let mut model = Self::new(config.input_size, config.filters, &mut rng);
        let mut best = model.clone();
        let mut best_loss = f32::INFINITY;
        let mut best_epoch = 0;
        let mut stale_epochs = 0;
        let mut epochs_run = 0;

        for epoch in 1..=config.epochs {
            epochs_run = epoch;
            train.shuffle(&mut rng);

            let mut train_loss = 0.0;
            for &i in &train {
                let (x, y) = &samples[i];
                train_loss += model.train_step(x, *y, config.learning_rate);
            }
            train_loss /= train.len() as f32;

            let val_loss = validation
                .iter()
                .map(|&i| binary_cross_entropy(model.probability(&samples[i].0), samples[i].1))
                .sum::<f32>()
                / validation.len() as f32;

            tracing::debug!(
                "Liveness epoch {}: train loss {:.4}, validation loss {:.4}",
                epoch,
                train_loss,
                val_loss
            );

            if val_loss < best_loss {
                best_loss = val_loss;
                best = model.clone();
                best_epoch = epoch;
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
                if stale_epochs >= config.patience {
                    tracing::debug!("Early stopping after epoch {}", epoch);
                    break;
                }
            }
        }

        let correct = validation
            .iter()
            .filter(|&&i| (best.probability(&samples[i].0) > 0.5) == (samples[i].1 > 0.5))
            .count();

        let summary = TrainingSummary {
            samples: n,
            validation_samples: validation.len(),
            epochs_run,
            best_epoch,
            validation_loss: best_loss,
            validation_accuracy: correct as f32 / validation.len() as f32,
        };
        Ok((best, summary))
    }
}

/// Shared liveness gate. Inference clones the current model `Arc` and never
/// blocks training; training swaps the new model in only after it is persisted.
pub struct LivenessClassifier {
    path: PathBuf,
    config: LivenessConfig,
    model: RwLock<Option<Arc<LivenessModel>>>,
    train_lock: Mutex<()>,
}

impl LivenessClassifier {
    pub fn load(path: impl Into<PathBuf>, config: &LivenessConfig) -> Self {
        let path = path.into();
        let model = load_model(&path);
        Self {
            path,
            config: config.clone(),
            model: RwLock::new(model.map(Arc::new)),
            train_lock: Mutex::new(()),
        }
    }

    /// Classifier that never has a model; every verdict is the fallback.
    pub fn untrained(config: &LivenessConfig) -> Self {
        Self {
            path: PathBuf::new(),
            config: config.clone(),
            model: RwLock::new(None),
            train_lock: Mutex::new(()),
        }
    }

    pub fn with_model(model: LivenessModel, config: &LivenessConfig) -> Self {
        Self {
            path: PathBuf::new(),
            config: config.clone(),
            model: RwLock::new(Some(Arc::new(model))),
            train_lock: Mutex::new(()),
        }
    }

    pub fn status(&self) -> LivenessStatus {
        if self.model.read().is_some() {
            LivenessStatus::Trained
        } else {
            LivenessStatus::PermissiveFallback
        }
    }

    pub fn predict(&self, image: &DynamicImage) -> LivenessVerdict {
        let model = self.model.read().clone();
        match model {
            Some(model) => model.verdict(image),
            None => LivenessVerdict::fallback(),
        }
    }

    /// Trains on labelled crops, persists the model, then makes it current.
    pub fn train(&self, real: &[DynamicImage], fake: &[DynamicImage]) -> Result<TrainingSummary> {
        let _guard = self.train_lock.lock();

        let size = self.config.input_size;
        let samples: Vec<(Array3<f32>, f32)> = real
            .iter()
            .map(|img| (preprocess(img, size), 1.0))
            .chain(fake.iter().map(|img| (preprocess(img, size), 0.0)))
            .collect();

        tracing::info!(
            "Training liveness model on {} real and {} fake samples",
            real.len(),
            fake.len()
        );
        let (model, summary) = LivenessModel::fit(&samples, &self.config)?;

        if !self.path.as_os_str().is_empty() {
            artifact::write_artifact(&self.path, MODEL_MAGIC, MODEL_VERSION, &model)?;
        }
        *self.model.write() = Some(Arc::new(model));

        tracing::info!(
            "Liveness model trained: validation accuracy {:.2} (best epoch {} of {})",
            summary.validation_accuracy,
            summary.best_epoch,
            summary.epochs_run
        );
        Ok(summary)
    }
}

fn load_model(path: &Path) -> Option<LivenessModel> {
    if !path.exists() {
        tracing::warn!(
            "No liveness model at {}; liveness checks are disabled (every face passes)",
            path.display()
        );
        return None;
    }

    match artifact::read_artifact::<LivenessModel>(path, MODEL_MAGIC, MODEL_VERSION) {
        Ok(model) => {
            tracing::info!("Loaded liveness model from {}", path.display());
            Some(model)
        }
        Err(e) => {
            tracing::warn!(
                "Liveness model {} is unreadable ({}); liveness checks are disabled",
                path.display(),
                e
            );
            None
        }
    }
}

fn preprocess(image: &DynamicImage, size: u32) -> Array3<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let mut array = Array3::<f32>::zeros((3, size as usize, size as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            array[[c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    array
}

fn pool(pre: &Array3<f32>) -> Array1<f32> {
    pre.axis_iter(Axis(0))
        .map(|plane| {
            let n = plane.len().max(1) as f32;
            plane.iter().map(|v| v.max(0.0)).sum::<f32>() / n
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn binary_cross_entropy(p: f32, label: f32) -> f32 {
    let p = p.clamp(1e-7, 1.0 - 1e-7);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([value, value, value])))
    }

    fn noisy(base: u8, seed: u64) -> DynamicImage {
        let mut rng = StdRng::seed_from_u64(seed);
        DynamicImage::ImageRgb8(RgbImage::from_fn(16, 16, |_, _| {
            let v = base.saturating_add(rng.gen_range(0..40));
            Rgb([v, v, v])
        }))
    }

    /// Mean-brightness model: bright crops are "real".
    fn brightness_model() -> LivenessModel {
        LivenessModel {
            input_size: 8,
            kernels: Array4::from_elem((1, 3, 3, 3), 1.0 / 27.0),
            conv_bias: Array1::zeros(1),
            dense_weights: Array1::from_elem(1, 10.0),
            dense_bias: -5.0,
        }
    }

    fn small_config() -> LivenessConfig {
        LivenessConfig {
            input_size: 8,
            filters: 8,
            epochs: 40,
            patience: 40,
            learning_rate: 0.2,
            ..LivenessConfig::default()
        }
    }

    #[test]
    fn missing_model_is_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = LivenessClassifier::load(dir.path().join("liveness_model.bin"), &LivenessConfig::default());

        assert_eq!(classifier.status(), LivenessStatus::PermissiveFallback);
        let verdict = classifier.predict(&solid(0));
        assert!(verdict.is_real);
        assert_eq!(verdict.confidence, 0.5);
        assert!(!verdict.model_present);
    }

    #[test]
    fn corrupt_model_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liveness_model.bin");
        std::fs::write(&path, b"garbage").unwrap();

        let classifier = LivenessClassifier::load(&path, &LivenessConfig::default());
        assert_eq!(classifier.status(), LivenessStatus::PermissiveFallback);
    }

    #[test]
    fn trained_model_classifies_and_reports_confidence() {
        let classifier = LivenessClassifier::with_model(brightness_model(), &small_config());
        assert_eq!(classifier.status(), LivenessStatus::Trained);

        let real = classifier.predict(&solid(255));
        assert!(real.is_real);
        assert!(real.confidence > 0.99);
        assert!(real.model_present);

        let fake = classifier.predict(&solid(0));
        assert!(!fake.is_real);
        assert!(fake.confidence > 0.99);
    }

    #[test]
    fn from_parts_checks_shapes() {
        let built = LivenessModel::from_parts(
            8,
            Array4::from_elem((1, 3, 3, 3), 1.0 / 27.0),
            Array1::zeros(1),
            Array1::from_elem(1, 10.0),
            -5.0,
        )
        .unwrap();
        assert_eq!(built, brightness_model());

        let err = LivenessModel::from_parts(8, Array4::zeros((2, 3, 3, 3)), Array1::zeros(1), Array1::zeros(2), 0.0)
            .unwrap_err();
        assert!(matches!(err, AttendanceError::Model(_)));
    }

    #[test]
    fn model_survives_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liveness_model.bin");
        artifact::write_artifact(&path, MODEL_MAGIC, MODEL_VERSION, &brightness_model()).unwrap();

        let classifier = LivenessClassifier::load(&path, &small_config());
        assert_eq!(classifier.status(), LivenessStatus::Trained);
        assert!(!classifier.predict(&solid(10)).is_real);
    }

    #[test]
    fn training_requires_both_classes() {
        let classifier = LivenessClassifier::untrained(&small_config());
        let err = classifier.train(&[solid(200), solid(220)], &[]).unwrap_err();
        assert!(matches!(err, AttendanceError::Model(_)));
        assert_eq!(classifier.status(), LivenessStatus::PermissiveFallback);
    }

    #[test]
    fn training_separates_bright_from_dark_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liveness_model.bin");
        let classifier = LivenessClassifier::load(&path, &small_config());

        let real: Vec<_> = (0..12).map(|i| noisy(190, i)).collect();
        let fake: Vec<_> = (0..12).map(|i| noisy(10, 100 + i)).collect();
        let summary = classifier.train(&real, &fake).unwrap();

        assert_eq!(summary.samples, 24);
        assert_eq!(summary.validation_samples, 5);
        assert_eq!(classifier.status(), LivenessStatus::Trained);
        assert!(classifier.predict(&noisy(195, 999)).is_real);
        assert!(!classifier.predict(&noisy(5, 998)).is_real);

        let reloaded = LivenessClassifier::load(&path, &small_config());
        assert_eq!(reloaded.status(), LivenessStatus::Trained);
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let samples: Vec<_> = (0..6)
            .map(|i| (preprocess(&noisy(if i % 2 == 0 { 200 } else { 20 }, i), 8), (i % 2 == 0) as u8 as f32))
            .collect();
        let (a, _) = LivenessModel::fit(&samples, &small_config()).unwrap();
        let (b, _) = LivenessModel::fit(&samples, &small_config()).unwrap();
        assert_eq!(a, b);
    }
}
