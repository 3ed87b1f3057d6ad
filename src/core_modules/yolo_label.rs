// THEORY:
// A `YoloLabel` is the detection label of one output image: an ordered list of
// `(class_id, box)` entries, one per placed object, in placement order. The label
// owns the image size, and entries are stored in pixels and normalized only when
// the label is written out. Each entry remembers the frame its box is measured in:
// boxes added directly are in the label's own image, while a harvested object keeps
// the frame of the image it came from.
//
// The text form is the main artifact of the whole tool and is reproduced
// byte-for-byte: one `class_id x_center y_center width height` row per entry,
// space separated, newline terminated. Floats are written the way Python's
// `str(float)` writes them (shortest round-trip digits, `1.0` rather than `1`,
// `5e-05` rather than `5e-5`) so that labels match the ones produced by the
// existing Python tooling.

use crate::core_modules::bounding_box::BoundingBox;
use crate::core_modules::foreground_object::ForegroundObject;
use crate::error::ValidationError;
use image::GenericImageView;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelEntry {
    pub class_id: usize,
    pub bbox: BoundingBox,
    /// `(width, height)` of the image `bbox` is measured in.
    pub frame: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoloLabel {
    image_width: u32,
    image_height: u32,
    entries: Vec<LabelEntry>,
}

impl YoloLabel {
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            entries: Vec::new(),
        }
    }

    /// An empty label sized for `image`.
    pub fn for_image<I: GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height)
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Appends a box given in this label's image coordinates.
    pub fn add(&mut self, class_id: usize, bbox: BoundingBox) {
        self.entries.push(LabelEntry {
            class_id,
            bbox,
            frame: (self.image_width, self.image_height),
        });
    }

    /// Appends an object at its own box, tagged with its own class and
    /// normalized by the image it was harvested from.
    pub fn add_object(&mut self, object: &ForegroundObject) {
        self.entries.push(LabelEntry {
            class_id: object.class_id(),
            bbox: object.bbox(),
            frame: object.source_size(),
        });
    }

    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pascal VOC boxes `(x_min, y_min, x_max, y_max)`, in insertion order.
    pub fn to_pascal_voc(&self) -> Vec<[u32; 4]> {
        self.entries.iter().map(|e| e.bbox.to_pascal_voc()).collect()
    }

    /// Human-readable class name of every entry, in insertion order.
    pub fn class_names<'a>(&self, classes: &'a [String]) -> Result<Vec<&'a str>, ValidationError> {
        self.entries
            .iter()
            .map(|e| {
                classes
                    .get(e.class_id)
                    .map(String::as_str)
                    .ok_or(ValidationError::ClassOutOfRange {
                        class_id: e.class_id,
                        n_class: classes.len(),
                    })
            })
            .collect()
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_text())
    }
}

impl fmt::Display for YoloLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let (frame_width, frame_height) = entry.frame;
            let [x_center, y_center, width, height] = entry.bbox.to_yolo(frame_width, frame_height);
            writeln!(
                f,
                "{} {} {} {} {}",
                entry.class_id,
                python_float(x_center),
                python_float(y_center),
                python_float(width),
                python_float(height)
            )?;
        }
        Ok(())
    }
}

/// `Debug` already gives the shortest round-trip digits and switches to
/// scientific notation at the same thresholds as Python; only the exponent
/// needs a sign and at least two digits.
fn python_float(value: f64) -> String {
    let repr = format!("{value:?}");
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => repr,
    }
}
