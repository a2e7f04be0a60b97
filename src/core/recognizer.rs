use crate::common::{AttendanceError, Result, config::RecognizerConfig};
use crate::core::detector::FaceBox;
use crate::core::onnx::OnnxModel;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use ort::Value;
use std::path::Path;

pub type Embedding = Vec<f32>;

/// Turns a face region into a fixed-length embedding comparable by distance.
pub trait EmbeddingExtract {
    fn extract(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding>;
}

pub struct OnnxEmbeddingExtractor {
    model: OnnxModel,
    config: RecognizerConfig,
}

impl OnnxEmbeddingExtractor {
    pub fn new(model_path: &Path, config: &RecognizerConfig, optimization_level: u32) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load("face_embedder", model_path, optimization_level)?,
            config: config.clone(),
        })
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let size = self.config.input_size as usize;
        let norm_val = self.config.normalization_value;

        if self.config.channels == 1 {
            let gray = img.to_luma8();
            let mut array = Array4::<f32>::zeros((1, 1, size, size));
            for (x, y, pixel) in gray.enumerate_pixels() {
                array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm_val) / norm_val;
            }
            return array;
        }

        let rgb = img.to_rgb8();
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                array[[0, c, y, x]] = (pixel[c] as f32 - norm_val) / norm_val;
            }
        }
        array
    }
}

impl EmbeddingExtract for OnnxEmbeddingExtractor {
    fn extract(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face).ok_or(AttendanceError::NoFaceDetected)?;
        let resized = face_img.resize_exact(
            self.config.input_size,
            self.config.input_size,
            FilterType::Triangle,
        );

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(&cow_array)?;
        let outputs = self.model.session.run(ort::inputs![input_tensor]?)?;

        let raw = (!outputs.is_empty())
            .then(|| &outputs[0])
            .ok_or_else(|| AttendanceError::Model("Embedding model produced no output".into()))?
            .try_extract_tensor::<f32>()?
            .to_owned()
            .into_raw_vec();

        Ok(l2_normalize(raw))
    }
}

/// Crops `face` out of `image`, clamped to the image bounds.
/// Returns `None` when the clamped region is empty.
pub fn crop_face(image: &DynamicImage, face: &FaceBox) -> Option<DynamicImage> {
    let (img_w, img_h) = (image.width() as f32, image.height() as f32);
    let x1 = face.x1.clamp(0.0, img_w);
    let y1 = face.y1.clamp(0.0, img_h);
    let x2 = face.x2.clamp(0.0, img_w);
    let y2 = face.y2.clamp(0.0, img_h);

    let width = (x2 - x1) as u32;
    let height = (y2 - y1) as u32;
    if width == 0 || height == 0 {
        return None;
    }

    Some(image.crop_imm(x1 as u32, y1 as u32, width, height))
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn distance_is_zero_for_identical_vectors() {
        let a = [0.1, 0.2, 0.3];
        assert_eq!(euclidean_distance(&a, &a), 0.0);
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn crop_is_clamped_to_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 80));
        let crop = crop_face(&image, &FaceBox::new(-10.0, 60.0, 50.0, 200.0, 0.9)).unwrap();
        assert_eq!((crop.width(), crop.height()), (50, 20));

        assert!(crop_face(&image, &FaceBox::new(120.0, 0.0, 140.0, 10.0, 0.9)).is_none());
    }
}
