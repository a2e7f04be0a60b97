use crate::common::{AttendanceError, Result, config::DetectorConfig};
use crate::core::onnx::OnnxModel;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use ort::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Face detection primitive. Implementations are swappable; the attendance
/// flows only ever see bounding boxes in original-image coordinates.
pub trait FaceDetect {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>>;
}

/// YOLO-style single-class face detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    model: OnnxModel,
    config: DetectorConfig,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path, config: &DetectorConfig, optimization_level: u32) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load("face_detector", model_path, optimization_level)?,
            config: config.clone(),
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
            array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
            array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
        }

        array
    }
}

impl FaceDetect for OnnxFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let input_width = self.config.input_width;
        let input_height = self.config.input_height;

        let img_array = if image.width() == input_width && image.height() == input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(input_width, input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(&cow_array)?;
        let outputs = self.model.session.run(ort::inputs![input_tensor]?)?;

        let output = match (!outputs.is_empty()).then(|| &outputs[0]) {
            Some(value) => value.try_extract_tensor::<f32>()?.to_owned(),
            None => return Ok(Vec::new()),
        };
        let shape = output.shape().to_vec();
        let data = output
            .as_slice()
            .ok_or_else(|| AttendanceError::Model("Detector output is not contiguous".into()))?;

        let candidates = decode_predictions(data, &shape, input_width as f32, input_height as f32);
        let mut faces = non_max_suppression(candidates, self.config.nms_iou_threshold);
        faces.retain(|face| face.confidence >= self.config.detection_confidence);
        faces.truncate(self.config.max_faces);

        let scale_x = orig_width / input_width as f32;
        let scale_y = orig_height / input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Decodes raw YOLO output into boxes in detector-input coordinates.
///
/// Accepts `[1, N, 5+]`, the transposed `[1, 5+, N]` layout, and `[N, 5+]`.
/// Each prediction is `[x_center, y_center, width, height, score, ...]`.
pub fn decode_predictions(output: &[f32], shape: &[usize], input_width: f32, input_height: f32) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape.len() {
        3 if (5..=16).contains(&shape[1]) && shape[2] > shape[1] => (shape[2], shape[1], true),
        3 => (shape[1], shape[2], false),
        2 => (shape[0], shape[1], false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };

    if prediction_length < 4 || output.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, field: usize| -> f32 {
        if is_transposed {
            output[field * num_predictions + i]
        } else {
            output[i * prediction_length + field]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let confidence = if prediction_length > 4 { at(i, 4) } else { 0.0 };
        // Skip empty anchors early; the real threshold is applied after NMS.
        if confidence <= 0.001 {
            continue;
        }

        let (xc, yc, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let scale = if xc > 1.0 || yc > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { input_width };

        let (xc, yc, w, h) = (xc * scale, yc * scale, w * scale, h * scale);
        let x1 = (xc - w / 2.0).max(0.0);
        let y1 = (yc - h / 2.0).max(0.0);
        let x2 = (xc + w / 2.0).min(input_width);
        let y2 = (yc + h / 2.0).min(input_height);

        if x2 - x1 > 10.0 && y2 - y1 > 10.0 {
            faces.push(FaceBox::new(x1, y1, x2, y2, confidence));
        }
    }

    faces
}

/// Greedy NMS; the result is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
