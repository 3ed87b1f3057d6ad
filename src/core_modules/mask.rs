// THEORY:
// A `Mask` is the binary plane every other module speaks: "is this pixel part of
// the thing?" It is stored as an 8-bit `GrayImage` holding only 0 and 255 so that
// the same cropping and warping machinery used for RGB images applies to masks
// unchanged. The constructors are the only way in, and all of them re-binarize,
// so a `Mask` never holds an intermediate value.
//
// A `ClasswiseMask` stacks one `Mask` per semantic class. The planes are
// independent: a pixel may be set in several planes or in none.

use crate::core_modules::bounding_box::{self, BoundingBox};
use crate::error::GeometryError;
use image::{GrayImage, Luma};

/// Value stored for a set pixel.
pub const FOREGROUND: u8 = 255;
/// Value stored for an unset pixel.
pub const BACKGROUND: u8 = 0;

/// A binary `H×W` plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    plane: GrayImage,
}

impl Mask {
    /// An all-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            plane: GrayImage::new(width, height),
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        Self {
            plane: GrayImage::from_fn(width, height, |x, y| Luma([encode(f(x, y))])),
        }
    }

    /// Binarizes a grayscale plane: every value strictly above `threshold` is set.
    pub fn from_gray(gray: &GrayImage, threshold: u8) -> Self {
        Self::from_fn(gray.width(), gray.height(), |x, y| gray.get_pixel(x, y)[0] > threshold)
    }

    /// Wraps a plane that is already known to hold only 0 and 255.
    pub(crate) fn from_binary_plane(plane: GrayImage) -> Self {
        Self { plane }
    }

    pub fn width(&self) -> u32 {
        self.plane.width()
    }

    pub fn height(&self) -> u32 {
        self.plane.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.plane.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.plane.get_pixel(x, y)[0] == FOREGROUND
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.plane.put_pixel(x, y, Luma([encode(value)]));
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.plane.as_raw().iter().filter(|&&v| v == FOREGROUND).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.plane.as_raw().contains(&FOREGROUND)
    }

    /// Coordinates `(x, y)` of every set pixel in raster order.
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.plane
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == FOREGROUND)
            .map(|(x, y, _)| (x, y))
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.plane
    }

    /// Smallest box enclosing every set pixel.
    pub fn tight_box(&self) -> Result<BoundingBox, GeometryError> {
        bounding_box::tight_box(self)
    }
}

fn encode(value: bool) -> u8 {
    if value { FOREGROUND } else { BACKGROUND }
}

/// A stack of `n_class` independent binary planes of identical size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasswiseMask {
    width: u32,
    height: u32,
    planes: Vec<Mask>,
}

impl ClasswiseMask {
    pub fn from_planes(width: u32, height: u32, planes: Vec<Mask>) -> Result<Self, GeometryError> {
        if let Some(bad) = planes.iter().find(|p| p.dimensions() != (width, height)) {
            return Err(GeometryError::DimensionMismatch {
                expected: (width, height),
                actual: bad.dimensions(),
            });
        }
        Ok(Self {
            width,
            height,
            planes,
        })
    }

    /// Builds the planes from a VOC-style label map where pixel value `i + 1`
    /// marks class `i` and 0 is background.
    pub fn from_label_map(labels: &GrayImage, n_class: usize) -> Self {
        let (width, height) = labels.dimensions();
        let planes = (0..n_class)
            .map(|i_class| {
                let value = i_class + 1;
                Mask::from_fn(width, height, |x, y| labels.get_pixel(x, y)[0] as usize == value)
            })
            .collect();
        Self {
            width,
            height,
            planes,
        }
    }

    pub fn n_class(&self) -> usize {
        self.planes.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn plane(&self, class_id: usize) -> Option<&Mask> {
        self.planes.get(class_id)
    }

    pub fn planes(&self) -> &[Mask] {
        &self.planes
    }
}
