use crate::common::config::AugmentationConfig;
use image::{DynamicImage, Rgb, RgbImage, imageops};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, Projection, warp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Multiplies the enrollment set with randomized photometric and geometric variants.
pub struct Augmenter {
    config: AugmentationConfig,
    rng: StdRng,
}

impl Augmenter {
    pub fn new(config: &AugmentationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config: config.clone(),
            rng,
        }
    }

    /// Returns every input image followed by its variants, so the result has
    /// `len * (1 + variants_per_image)` entries. Inputs are not modified.
    pub fn expand(&mut self, images: &[DynamicImage]) -> Vec<DynamicImage> {
        let mut out = Vec::with_capacity(images.len() * (1 + self.config.variants_per_image));
        for image in images {
            out.push(image.clone());
            for _ in 0..self.config.variants_per_image {
                out.push(self.variant(image));
            }
        }
        out
    }

    pub fn variant(&mut self, image: &DynamicImage) -> DynamicImage {
        let mut rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return DynamicImage::ImageRgb8(rgb);
        }

        if self.rng.gen_bool(self.config.flip_probability) {
            rgb = imageops::flip_horizontal(&rgb);
        }

        let max_rot = self.config.max_rotation_degrees.abs();
        let degrees = self.rng.gen_range(-max_rot..=max_rot);
        let scale = self.rng.gen_range(self.config.scale_min..=self.config.scale_max);
        rgb = rotate_and_scale(&rgb, degrees, scale);

        let factor = self.rng.gen_range(self.config.brightness_min..=self.config.brightness_max);
        multiply_brightness(&mut rgb, factor);

        let sigma = self.rng.gen_range(0.0..=self.config.max_blur_sigma.max(0.0));
        // gaussian_blur_f32 panics on sigma <= 0; tiny sigmas are a no-op anyway.
        if sigma > 0.05 {
            rgb = gaussian_blur_f32(&rgb, sigma);
        }

        DynamicImage::ImageRgb8(rgb)
    }
}

/// Rotates by `degrees` and scales by `scale` about the image center,
/// keeping the original dimensions. Uncovered pixels are black.
fn rotate_and_scale(image: &RgbImage, degrees: f32, scale: f32) -> RgbImage {
    let cx = image.width() as f32 / 2.0;
    let cy = image.height() as f32 / 2.0;

    let projection = Projection::translate(cx, cy)
        * Projection::rotate(degrees.to_radians())
        * Projection::scale(scale, scale)
        * Projection::translate(-cx, -cy);

    warp(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
}

fn multiply_brightness(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(32, 24, |x, _| Rgb([value, (x * 8) as u8, 50])))
    }

    fn seeded() -> AugmentationConfig {
        AugmentationConfig {
            seed: Some(7),
            ..AugmentationConfig::default()
        }
    }

    #[test]
    fn expand_keeps_originals_and_adds_variants() {
        let mut augmenter = Augmenter::new(&seeded());
        let inputs = vec![sample(100), sample(150)];

        let out = augmenter.expand(&inputs);

        assert_eq!(out.len(), 6);
        assert_eq!(out[0].to_rgb8(), inputs[0].to_rgb8());
        assert_eq!(out[3].to_rgb8(), inputs[1].to_rgb8());
        assert!(out.iter().all(|img| img.width() == 32 && img.height() == 24));
    }

    #[test]
    fn same_seed_is_reproducible() {
        let image = sample(120);
        let a = Augmenter::new(&seeded()).variant(&image);
        let b = Augmenter::new(&seeded()).variant(&image);
        assert_eq!(a.to_rgb8(), b.to_rgb8());
    }

    #[test]
    fn brightness_multiply_saturates() {
        let mut image = RgbImage::from_pixel(2, 2, Rgb([200, 100, 0]));
        multiply_brightness(&mut image, 1.5);
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 150, 0]));
    }

    #[test]
    fn identity_transform_preserves_pixels() {
        let image = sample(90).to_rgb8();
        let out = rotate_and_scale(&image, 0.0, 1.0);
        assert_eq!(out.get_pixel(10, 10), image.get_pixel(10, 10));
    }

    #[test]
    fn zero_variants_returns_inputs_only() {
        let config = AugmentationConfig {
            variants_per_image: 0,
            ..seeded()
        };
        let out = Augmenter::new(&config).expand(&[sample(1)]);
        assert_eq!(out.len(), 1);
    }
}
