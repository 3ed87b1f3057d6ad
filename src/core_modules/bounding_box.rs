// THEORY:
// Pure geometry. A `BoundingBox` is the tight, axis-aligned rectangle around the
// set pixels of a mask, expressed as half-open pixel ranges: rows `top..bottom`
// and columns `left..right`. Because a box is only ever produced from a non-empty
// mask, both its width and height are positive.
//
// Detection tooling disagrees on how a box is written down, so the same box can
// be rendered in four conventions:
// - pascal_voc:     (x_min, y_min, x_max, y_max) in pixels
// - coco:           (x_min, y_min, width, height) in pixels
// - albumentations: pascal_voc divided by the image size
// - yolo:           (x_center, y_center, width, height) divided by the image size
//
// The conventions form a closed set (`BboxFormat`), so selection is a `match`.

use crate::core_modules::mask::Mask;
use crate::error::{GeometryError, ValidationError};
use std::fmt;
use std::str::FromStr;

/// A box in source-image pixel coordinates, `top < bottom` and `left < right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    top: u32,
    bottom: u32,
    left: u32,
    right: u32,
}

impl BoundingBox {
    pub fn new(top: u32, bottom: u32, left: u32, right: u32) -> Result<Self, GeometryError> {
        if top >= bottom || left >= right {
            return Err(GeometryError::DegenerateBox {
                top,
                bottom,
                left,
                right,
            });
        }
        Ok(Self {
            top,
            bottom,
            left,
            right,
        })
    }

    pub fn top(&self) -> u32 {
        self.top
    }

    pub fn bottom(&self) -> u32 {
        self.bottom
    }

    pub fn left(&self) -> u32 {
        self.left
    }

    pub fn right(&self) -> u32 {
        self.right
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// The same box shifted down by `dy` rows and right by `dx` columns.
    pub fn translate(&self, dy: u32, dx: u32) -> Self {
        Self {
            top: self.top + dy,
            bottom: self.bottom + dy,
            left: self.left + dx,
            right: self.right + dx,
        }
    }

    /// `(x_min, y_min, x_max, y_max)`
    pub fn to_pascal_voc(&self) -> [u32; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    /// `(x_min, y_min, width, height)`
    pub fn to_coco(&self) -> [u32; 4] {
        [self.left, self.top, self.width(), self.height()]
    }

    /// Normalized `(x_min, y_min, x_max, y_max)`.
    pub fn to_albumentations(&self, image_width: u32, image_height: u32) -> [f64; 4] {
        let (w, h) = (image_width as f64, image_height as f64);
        [
            self.left as f64 / w,
            self.top as f64 / h,
            self.right as f64 / w,
            self.bottom as f64 / h,
        ]
    }

    /// Normalized `(x_center, y_center, width, height)`.
    pub fn to_yolo(&self, image_width: u32, image_height: u32) -> [f64; 4] {
        let [x_min, y_min, x_max, y_max] = self.to_pascal_voc().map(f64::from);
        let x_center = 0.5 * (x_min + x_max);
        let y_center = 0.5 * (y_min + y_max);
        let width = x_max - x_min;
        let height = y_max - y_min;

        // normalize so that everything will be in [0, 1]
        let (w, h) = (image_width as f64, image_height as f64);
        [x_center / w, y_center / h, width / w, height / h]
    }

    /// Inverse of [`BoundingBox::to_yolo`], rounding each edge to the nearest pixel.
    pub fn from_yolo(yolo: [f64; 4], image_width: u32, image_height: u32) -> Result<Self, GeometryError> {
        let [x_center, y_center, width, height] = yolo;
        let (w, h) = (image_width as f64, image_height as f64);
        let edge = |v: f64| v.round().max(0.0) as u32;
        Self::new(
            edge((y_center - 0.5 * height) * h),
            edge((y_center + 0.5 * height) * h),
            edge((x_center - 0.5 * width) * w),
            edge((x_center + 0.5 * width) * w),
        )
    }

    /// Renders the box in `format`. Pixel formats are returned as exact integers in `f64`.
    pub fn convert(&self, format: BboxFormat, image_width: u32, image_height: u32) -> [f64; 4] {
        match format {
            BboxFormat::PascalVoc => self.to_pascal_voc().map(f64::from),
            BboxFormat::Coco => self.to_coco().map(f64::from),
            BboxFormat::Albumentations => self.to_albumentations(image_width, image_height),
            BboxFormat::Yolo => self.to_yolo(image_width, image_height),
        }
    }
}

/// Tight box of a single plane. Fails on an all-false mask.
pub fn tight_box(mask: &Mask) -> Result<BoundingBox, GeometryError> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut any = false;

    for (x, y) in mask.foreground() {
        any = true;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    if !any {
        return Err(GeometryError::EmptyMask);
    }
    BoundingBox::new(min_y, max_y + 1, min_x, max_x + 1)
}

/// One box per plane, in input order.
pub fn tight_boxes<'a>(masks: impl IntoIterator<Item = &'a Mask>) -> Result<Vec<BoundingBox>, GeometryError> {
    masks.into_iter().map(tight_box).collect()
}

/// The closed set of box conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BboxFormat {
    PascalVoc,
    Albumentations,
    Coco,
    Yolo,
}

impl BboxFormat {
    pub const ALL: [BboxFormat; 4] = [
        BboxFormat::PascalVoc,
        BboxFormat::Albumentations,
        BboxFormat::Coco,
        BboxFormat::Yolo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BboxFormat::PascalVoc => "pascal_voc",
            BboxFormat::Albumentations => "albumentations",
            BboxFormat::Coco => "coco",
            BboxFormat::Yolo => "yolo",
        }
    }
}

impl FromStr for BboxFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownBboxFormat(s.to_string()))
    }
}

impl fmt::Display for BboxFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
