// THEORY:
// Augmentations are opaque `image -> image` transforms applied to the background
// frame and to every representative image before compositing. The engine never
// looks inside them; it only relies on one contract that it cannot check:
//
//     an augmentation changes appearance, never geometry.
//
// Pixel `(x, y)` of the output must still show what pixel `(x, y)` of the input
// showed, otherwise the object boxes harvested from the pristine masks silently stop
// matching the pixels they label. Colour shifts, contrast changes and small blurs are
// fine; flips, crops, resizes and rotations are not.
//
// Randomness comes from the caller's generator so that a seeded run is reproducible.

use crate::error::ValidationError;
use image::{RgbImage, imageops};
use imageproc::filter::gaussian_blur_f32;
use rand::{Rng, RngCore};
use serde::Deserialize;

pub trait Augmentation: Send + Sync {
    fn apply(&self, image: &RgbImage, rng: &mut dyn RngCore) -> RgbImage;
}

/// Leaves the image untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Augmentation for Identity {
    fn apply(&self, image: &RgbImage, _rng: &mut dyn RngCore) -> RgbImage {
        image.clone()
    }
}

/// Any deterministic closure is an augmentation.
impl<F> Augmentation for F
where
    F: Fn(&RgbImage) -> RgbImage + Send + Sync,
{
    fn apply(&self, image: &RgbImage, _rng: &mut dyn RngCore) -> RgbImage {
        self(image)
    }
}

/// Random brightness, contrast and hue shifts, followed by an occasional gaussian blur.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColorBlur {
    /// Brightness offset is drawn from `-max_brightness..=max_brightness`.
    pub max_brightness: i32,
    /// Contrast change in percent, drawn from `-max_contrast..=max_contrast`.
    pub max_contrast: f32,
    /// Hue rotation in degrees, drawn from `-max_hue..=max_hue`.
    pub max_hue: i32,
    pub blur_probability: f64,
    /// Blur sigma is drawn from `0.5..=max_sigma`.
    pub max_sigma: f32,
}

impl Default for ColorBlur {
    fn default() -> Self {
        Self {
            max_brightness: 40,
            max_contrast: 20.0,
            max_hue: 15,
            blur_probability: 0.3,
            max_sigma: 1.5,
        }
    }
}

const MIN_SIGMA: f32 = 0.5;

impl ColorBlur {
    /// Rejects ranges the sampler cannot draw from.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_brightness == i32::MIN || self.max_hue == i32::MIN {
            return Err(ValidationError::InvalidConfig("color range out of bounds".to_string()));
        }
        if !self.max_contrast.is_finite() || !self.max_sigma.is_finite() {
            return Err(ValidationError::InvalidConfig(format!(
                "contrast {} and blur sigma {} must be finite",
                self.max_contrast, self.max_sigma
            )));
        }
        if !(0.0..=1.0).contains(&self.blur_probability) {
            return Err(ValidationError::InvalidConfig(format!(
                "blur probability {} is not in [0, 1]",
                self.blur_probability
            )));
        }
        Ok(())
    }
}

impl Augmentation for ColorBlur {
    fn apply(&self, image: &RgbImage, rng: &mut dyn RngCore) -> RgbImage {
        let brightness = self.max_brightness.abs();
        let contrast = self.max_contrast.abs();
        let hue = self.max_hue.abs();

        let mut out = imageops::brighten(image, rng.random_range(-brightness..=brightness));
        out = imageops::contrast(&out, rng.random_range(-contrast..=contrast));
        out = imageops::huerotate(&out, rng.random_range(-hue..=hue));

        if self.max_sigma > MIN_SIGMA && rng.random_bool(self.blur_probability.clamp(0.0, 1.0)) {
            out = gaussian_blur_f32(&out, rng.random_range(MIN_SIGMA..=self.max_sigma));
        }
        out
    }
}
