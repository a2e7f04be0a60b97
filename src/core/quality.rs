use crate::common::config::QualityConfig;
use crate::core::detector::FaceBox;
use image::DynamicImage;
use imageproc::filter::laplacian_filter;

/// Capture-time signal quality of one frame. Every sub-score is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityScore {
    pub sharpness: f32,
    pub brightness: f32,
    /// Face height as a fraction of frame height; 0 when no face was found.
    pub face_size_ratio: f32,
    pub face_size: f32,
    pub composite: f32,
    pub face_found: bool,
}

impl QualityScore {
    fn zero() -> Self {
        Self {
            sharpness: 0.0,
            brightness: 0.0,
            face_size_ratio: 0.0,
            face_size: 0.0,
            composite: 0.0,
            face_found: false,
        }
    }

    pub fn meets_minimum(&self, min_score: f32) -> bool {
        self.composite >= min_score
    }

    pub fn get_quality_assessment(&self) -> String {
        let quality_level = if self.composite >= 0.8 {
            "Excellent"
        } else if self.composite >= 0.7 {
            "Good"
        } else if self.composite >= 0.6 {
            "Acceptable"
        } else if self.composite >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        };

        format!("Quality: {} (score: {:.2})", quality_level, self.composite)
    }

    /// Operator hints for a rejected capture frame.
    pub fn get_improvement_suggestions(&self, config: &QualityConfig) -> Vec<String> {
        let mut suggestions = Vec::new();

        if !self.face_found {
            suggestions.push("No face found - look directly at the camera".to_string());
            return suggestions;
        }

        if self.face_size_ratio < config.face_ratio_min {
            suggestions.push("Face is too small - move closer to the camera".to_string());
        } else if self.face_size_ratio > config.face_ratio_max {
            suggestions.push("Face is too large - move back from the camera".to_string());
        }

        if self.sharpness < 0.3 {
            suggestions.push("Image is blurry - hold still".to_string());
        }

        if self.brightness < 0.5 {
            suggestions.push("Adjust lighting - the image is too dark or too bright".to_string());
        }

        suggestions
    }
}

pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: &QualityConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Scores `image` given the primary detected face, if any.
    ///
    /// Without a face the composite is 0 whatever the other sub-scores are.
    pub fn assess(&self, image: &DynamicImage, face: Option<&FaceBox>) -> QualityScore {
        if image.width() == 0 || image.height() == 0 {
            return QualityScore::zero();
        }

        let gray = image.to_luma8();
        let sharpness = (laplacian_variance(&gray) / self.config.sharpness_scale).clamp(0.0, 1.0);

        let pixel_count = (gray.width() * gray.height()) as f64;
        let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / pixel_count;
        let ideal = self.config.ideal_brightness;
        let brightness = (1.0 - ((mean as f32 - ideal).abs() / ideal)).clamp(0.0, 1.0);

        let Some(face) = face else {
            return QualityScore {
                sharpness,
                brightness,
                ..QualityScore::zero()
            };
        };

        let face_size_ratio = (face.height() / image.height() as f32).clamp(0.0, 1.0);
        let face_size = self.face_size_score(face_size_ratio);

        let composite = self.config.sharpness_weight * sharpness
            + self.config.brightness_weight * brightness
            + self.config.face_size_weight * face_size;

        QualityScore {
            sharpness,
            brightness,
            face_size_ratio,
            face_size,
            composite: composite.clamp(0.0, 1.0),
            face_found: true,
        }
    }

    /// 1 inside the configured band, tapering linearly to 0 at ratio 0 and 1.
    fn face_size_score(&self, ratio: f32) -> f32 {
        let (min, max) = (self.config.face_ratio_min, self.config.face_ratio_max);
        let score = if ratio < min {
            ratio / min
        } else if ratio > max {
            (1.0 - ratio) / (1.0 - max)
        } else {
            1.0
        };
        score.clamp(0.0, 1.0)
    }
}

fn laplacian_variance(gray: &image::GrayImage) -> f32 {
    let lap = laplacian_filter(gray);
    let count = (lap.width() * lap.height()) as f64;
    if count == 0.0 {
        return 0.0;
    }

    let mean = lap.pixels().map(|p| p[0] as f64).sum::<f64>() / count;
    let variance = lap
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count;

    variance as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn flat(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, Luma([value])))
    }

    fn checkerboard() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(100, 100, |x, y| {
            if (x + y) % 2 == 0 { Luma([255]) } else { Luma([0]) }
        }))
    }

    fn face_of_height(h: f32) -> FaceBox {
        FaceBox::new(30.0, 10.0, 60.0, 10.0 + h, 0.9)
    }

    #[test]
    fn no_face_forces_zero_composite() {
        let assessor = QualityAssessor::new(&QualityConfig::default());
        let score = assessor.assess(&checkerboard(), None);

        assert_eq!(score.composite, 0.0);
        assert!(score.sharpness > 0.0);
        assert!(!score.face_found);
    }

    #[test]
    fn zero_size_image_scores_zero() {
        let assessor = QualityAssessor::new(&QualityConfig::default());
        let empty = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        let score = assessor.assess(&empty, Some(&face_of_height(10.0)));
        assert_eq!(score, QualityScore::zero());
    }

    #[test]
    fn sharp_frames_score_higher_than_flat_ones() {
        let assessor = QualityAssessor::new(&QualityConfig::default());
        let face = face_of_height(30.0);

        let flat_score = assessor.assess(&flat(128), Some(&face));
        let sharp_score = assessor.assess(&checkerboard(), Some(&face));

        assert_eq!(flat_score.sharpness, 0.0);
        assert_eq!(sharp_score.sharpness, 1.0);
        assert!(sharp_score.composite > flat_score.composite);
    }

    #[test]
    fn brightness_peaks_at_ideal_intensity() {
        let assessor = QualityAssessor::new(&QualityConfig::default());
        let face = face_of_height(30.0);

        let mid = assessor.assess(&flat(128), Some(&face)).brightness;
        let dark = assessor.assess(&flat(10), Some(&face)).brightness;
        assert!(mid > 0.99);
        assert!(dark < 0.1);
    }

    #[test]
    fn face_size_tapers_outside_band() {
        let assessor = QualityAssessor::new(&QualityConfig::default());
        let image = flat(128);

        let inside = assessor.assess(&image, Some(&face_of_height(30.0)));
        let small = assessor.assess(&image, Some(&face_of_height(10.0)));
        let large = assessor.assess(&image, Some(&face_of_height(70.0)));

        assert_eq!(inside.face_size, 1.0);
        assert!((small.face_size - 0.5).abs() < 1e-5);
        assert!((large.face_size - 0.5).abs() < 1e-5);
        assert!(inside.composite > small.composite);
    }

    #[test]
    fn suggestions_explain_rejection() {
        let config = QualityConfig::default();
        let assessor = QualityAssessor::new(&config);
        let score = assessor.assess(&flat(10), Some(&face_of_height(5.0)));

        let suggestions = score.get_improvement_suggestions(&config);
        assert!(suggestions.iter().any(|s| s.contains("too small")));
        assert!(suggestions.iter().any(|s| s.contains("blurry")));
        assert!(suggestions.iter().any(|s| s.contains("lighting")));
    }
}
