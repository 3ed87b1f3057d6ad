// THEORY:
// The rotation sweep produces domain-adaptation data from a single representative
// image: the image and its classwise mask are turned together by every whole degree
// from 0 to 359, and each turned mask is decomposed afresh to label the turned image.
//
// Key architectural principles:
// 1.  **No randomness**: the same input always yields the same 360 samples.
// 2.  **Same-size canvas**: unlike object placement, the frame does not grow. Corners
//     turned out of frame are lost and uncovered areas are zero. Components may merge,
//     split or be clipped as a result; the labels simply describe what is left.
// 3.  **Pristine input**: the sweep reads the pristine image, so it is unaffected by
//     any substitution currently installed on the representative image.
// 4.  **Lazy**: samples are produced one at a time by an iterator, so a caller writing
//     them to disk never holds more than one in memory.

use crate::core_modules::bounding_box::tight_box;
use crate::core_modules::mask::ClasswiseMask;
use crate::core_modules::mask_decomposer::mask_decomposer;
use crate::core_modules::representative_image::RepresentativeImage;
use crate::core_modules::rotation::Rotation;
use crate::core_modules::yolo_label::YoloLabel;
use crate::error::GeometryError;
use image::RgbImage;
use std::ops::Range;

/// Number of samples in a full sweep, one per whole degree.
pub const SWEEP_STEPS: u32 = 360;

#[derive(Debug, Clone)]
pub struct RotatedSample {
    pub degrees: u32,
    pub image: RgbImage,
    pub label: YoloLabel,
}

/// Turns `image` and `classwise` by `degrees` on a same-size canvas and labels the result.
pub fn rotate_sample(image: &RgbImage, classwise: &ClasswiseMask, degrees: u32) -> Result<RotatedSample, GeometryError> {
    if image.dimensions() != classwise.dimensions() {
        return Err(GeometryError::DimensionMismatch {
            expected: image.dimensions(),
            actual: classwise.dimensions(),
        });
    }

    let rotation = Rotation::same_size(degrees as f32);
    let rotated_image = rotation.apply_rgb(image);
    let (width, height) = rotated_image.dimensions();
    let planes = classwise.planes().iter().map(|plane| rotation.apply_mask(plane)).collect();
    let rotated_mask = ClasswiseMask::from_planes(width, height, planes)?;

    let n_class = rotated_mask.n_class();
    let objectwise = mask_decomposer::decompose(&rotated_mask, n_class);
    let mut label = YoloLabel::new(width, height);
    for (i_class, components) in &objectwise {
        for component in components {
            label.add(*i_class, tight_box(component)?);
        }
    }

    Ok(RotatedSample {
        degrees,
        image: rotated_image,
        label,
    })
}

/// Iterator over the samples of a sweep.
pub struct RotationSweep<'a> {
    image: &'a RgbImage,
    classwise: &'a ClasswiseMask,
    degrees: Range<u32>,
}

impl<'a> RotationSweep<'a> {
    /// A sweep over an arbitrary sub-range of degrees, used to split the work.
    pub fn over(image: &'a RgbImage, classwise: &'a ClasswiseMask, degrees: Range<u32>) -> Self {
        Self {
            image,
            classwise,
            degrees,
        }
    }
}

impl Iterator for RotationSweep<'_> {
    type Item = Result<RotatedSample, GeometryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let degrees = self.degrees.next()?;
        Some(rotate_sample(self.image, self.classwise, degrees))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.degrees.size_hint()
    }
}

impl ExactSizeIterator for RotationSweep<'_> {}

/// The full 0..360 sweep of a representative image.
pub fn sweep(rep_image: &RepresentativeImage) -> RotationSweep<'_> {
    RotationSweep::over(rep_image.pristine(), rep_image.classwise_mask(), 0..SWEEP_STEPS)
}
