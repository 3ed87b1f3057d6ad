// THEORY:
// Rigid rotation of an image together with its mask. The two must land on exactly
// the same geometry, so both are warped with one `Projection` and nearest-neighbour
// sampling; nearest sampling also keeps a mask binary without a separate threshold.
//
// Two canvas policies exist:
// - **expanded**: the output grows to contain the whole rotated content (used when
//   a cropped object is spun before being pasted);
// - **same size**: the output keeps the input size, corners rotated out of frame
//   are lost (used by the rotation sweep).
// In both cases pixels with no source are filled with zero.
//
// Angles are in degrees, positive is counter-clockwise as seen on screen. The
// rotation centre is the centre of the pixel grid, so a 0° rotation is the identity
// and 180° maps column `x` to `width - 1 - x`.
//
// `RandomRotation` is the angle-sampling policy. It is a plain value handed to each
// call together with the caller's generator; nothing is shared between objects.

use crate::core_modules::mask::{BACKGROUND, Mask};
use crate::error::GeometryError;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use rand::Rng;
use serde::Deserialize;

/// Tolerance used when sizing an expanded canvas, so that a 90° turn of a
/// `w×h` image is exactly `h×w`.
const EXPAND_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    degrees: f32,
    expand: bool,
}

impl Rotation {
    /// Output canvas grows to fit the rotated content.
    pub fn expanded(degrees: f32) -> Self {
        Self {
            degrees,
            expand: true,
        }
    }

    /// Output canvas keeps the input size.
    pub fn same_size(degrees: f32) -> Self {
        Self {
            degrees,
            expand: false,
        }
    }

    pub fn degrees(&self) -> f32 {
        self.degrees
    }

    /// Output size for an input of `width×height`.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if !self.expand {
            return (width, height);
        }
        let radians = (self.degrees as f64).to_radians();
        let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
        let (w, h) = (width as f64, height as f64);
        let out_w = (w * cos + h * sin - EXPAND_TOLERANCE).ceil().max(1.0);
        let out_h = (w * sin + h * cos - EXPAND_TOLERANCE).ceil().max(1.0);
        (out_w as u32, out_h as u32)
    }

    /// Maps input pixel coordinates to output pixel coordinates.
    fn projection(&self, width: u32, height: u32) -> Projection {
        let (out_w, out_h) = self.output_size(width, height);
        let in_center = ((width as f32 - 1.0) / 2.0, (height as f32 - 1.0) / 2.0);
        let out_center = ((out_w as f32 - 1.0) / 2.0, (out_h as f32 - 1.0) / 2.0);
        // y grows downwards, so a counter-clockwise turn is a negative angle
        let theta = -self.degrees.to_radians();
        Projection::translate(out_center.0, out_center.1)
            * Projection::rotate(theta)
            * Projection::translate(-in_center.0, -in_center.1)
    }

    pub fn apply_rgb(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let (out_w, out_h) = self.output_size(width, height);
        let mut out = RgbImage::new(out_w, out_h);
        warp_into(
            image,
            &self.projection(width, height),
            Interpolation::Nearest,
            Rgb([0, 0, 0]),
            &mut out,
        );
        out
    }

    pub fn apply_gray(&self, plane: &GrayImage) -> GrayImage {
        let (width, height) = plane.dimensions();
        let (out_w, out_h) = self.output_size(width, height);
        let mut out = GrayImage::new(out_w, out_h);
        warp_into(
            plane,
            &self.projection(width, height),
            Interpolation::Nearest,
            Luma([BACKGROUND]),
            &mut out,
        );
        out
    }

    /// Rotates a mask; nearest sampling only ever copies 0 or 255, so the result
    /// is binary by construction.
    pub fn apply_mask(&self, mask: &Mask) -> Mask {
        Mask::from_binary_plane(self.apply_gray(mask.as_gray()))
    }

    /// Rotates an image and its aligned mask with the same geometry.
    pub fn apply_pair(&self, image: &RgbImage, mask: &Mask) -> Result<(RgbImage, Mask), GeometryError> {
        if image.dimensions() != mask.dimensions() {
            return Err(GeometryError::DimensionMismatch {
                expected: image.dimensions(),
                actual: mask.dimensions(),
            });
        }
        Ok((self.apply_rgb(image), self.apply_mask(mask)))
    }
}

/// Uniform angle in `[0, max_degrees]` with a random direction, so the default of
/// 180° covers the whole circle.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RandomRotation {
    pub max_degrees: f32,
}

impl Default for RandomRotation {
    fn default() -> Self {
        Self { max_degrees: 180.0 }
    }
}

impl RandomRotation {
    pub fn new(max_degrees: f32) -> Self {
        Self {
            max_degrees: max_degrees.abs(),
        }
    }

    pub fn sample_degrees<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let magnitude = if self.max_degrees > 0.0 {
            rng.random_range(0.0..=self.max_degrees)
        } else {
            0.0
        };
        if rng.random_bool(0.5) { -magnitude } else { magnitude }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Rotation {
        Rotation::expanded(self.sample_degrees(rng))
    }
}
