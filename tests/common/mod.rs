#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use rollcall::attendance::Capabilities;
use rollcall::camera::FrameSource;
use rollcall::common::{AttendanceError, Config, Result};
use rollcall::core::detector::{FaceBox, FaceDetect};
use rollcall::core::recognizer::{Embedding, EmbeddingExtract, crop_face, l2_normalize};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BACKGROUND: u8 = 128;
pub const FRAME_SIZE: u32 = 100;
pub const FACE_SIZE: u32 = 30;

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const YELLOW: [u8; 3] = [255, 255, 0];

/// Any pixel far from the gray background is part of a face. Each vertical
/// strip of `strip_width` pixels holds at most one face.
pub struct StripDetector {
    pub strip_width: u32,
}

impl FaceDetect for StripDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let rgb = image.to_rgb8();
        let mut faces = Vec::new();

        let mut x0 = 0;
        while x0 < rgb.width() {
            let x_end = (x0 + self.strip_width).min(rgb.width());
            let mut bounds: Option<(u32, u32, u32, u32)> = None;
            for y in 0..rgb.height() {
                for x in x0..x_end {
                    if rgb.get_pixel(x, y).0.iter().any(|&c| c.abs_diff(BACKGROUND) > 40) {
                        bounds = Some(match bounds {
                            None => (x, y, x, y),
                            Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
                        });
                    }
                }
            }
            if let Some((a, b, c, d)) = bounds {
                faces.push(FaceBox::new(a as f32, b as f32, (c + 1) as f32, (d + 1) as f32, 0.99));
            }
            x0 = x_end;
        }

        Ok(faces)
    }
}

/// Reports a box far outside the frame on the first `glitches` calls, then
/// behaves like a `StripDetector`.
pub struct GlitchyDetector {
    pub inner: StripDetector,
    pub glitches: usize,
    calls: AtomicUsize,
}

impl GlitchyDetector {
    pub fn new(glitches: usize) -> Self {
        Self {
            inner: StripDetector {
                strip_width: FRAME_SIZE,
            },
            glitches,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FaceDetect for GlitchyDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.glitches {
            return Ok(vec![FaceBox::new(500.0, 500.0, 520.0, 520.0, 0.99)]);
        }
        self.inner.detect(image)
    }
}

/// Fails the first `failures` calls outright, then behaves like a `StripDetector`.
pub struct FlakyDetector {
    pub inner: StripDetector,
    pub failures: usize,
    calls: AtomicUsize,
}

impl FlakyDetector {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: StripDetector {
                strip_width: FRAME_SIZE,
            },
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FaceDetect for FlakyDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(AttendanceError::Model("inference failed".into()));
        }
        self.inner.detect(image)
    }
}

/// Embeds a face as its normalised mean colour.
pub struct MeanColorExtractor;

impl EmbeddingExtract for MeanColorExtractor {
    fn extract(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let crop = crop_face(image, face).ok_or(AttendanceError::NoFaceDetected)?.to_rgb8();
        let count = (crop.width() * crop.height()) as f32;
        let mut sums = [0.0f32; 3];
        for pixel in crop.pixels() {
            for (sum, &c) in sums.iter_mut().zip(pixel.0.iter()) {
                *sum += c as f32 / 255.0;
            }
        }
        Ok(l2_normalize(sums.iter().map(|s| s / count).collect()))
    }
}

/// Source whose every read fails, as an unplugged camera would.
#[derive(Default)]
pub struct FailingSource {
    pub released: bool,
}

impl FrameSource for FailingSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Err(AttendanceError::Camera("device disappeared".into()))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

pub fn capabilities() -> Capabilities {
    Capabilities::new(
        Some(Box::new(StripDetector {
            strip_width: FRAME_SIZE,
        })),
        Some(Box::new(MeanColorExtractor)),
        false,
    )
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.augmentation.enabled = false;
    config.enrollment.capture_interval_ms = 0;
    config.enrollment.target_captures = 5;
    config.enrollment.max_attempts = 20;
    config.session.confirmation_frames = 3;
    config.session.timeout_seconds = 2;
    config.session.frame_interval_ms = 100;
    config
}

pub fn empty_frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([BACKGROUND; 3])))
}

fn paint_face(image: &mut RgbImage, x0: u32, color: [u8; 3]) {
    let offset = (FRAME_SIZE - FACE_SIZE) / 2;
    for y in offset..offset + FACE_SIZE {
        for x in x0 + offset..x0 + offset + FACE_SIZE {
            image.put_pixel(x, y, Rgb(color));
        }
    }
}

/// Gray frame with one centred face whose height is 30% of the frame.
pub fn frame_with_face(color: [u8; 3]) -> DynamicImage {
    group_photo(&[color])
}

/// One face per 100-pixel strip, left to right.
pub fn group_photo(colors: &[[u8; 3]]) -> DynamicImage {
    let mut image = RgbImage::from_pixel(FRAME_SIZE * colors.len() as u32, FRAME_SIZE, Rgb([BACKGROUND; 3]));
    for (i, &color) in colors.iter().enumerate() {
        paint_face(&mut image, i as u32 * FRAME_SIZE, color);
    }
    DynamicImage::ImageRgb8(image)
}
