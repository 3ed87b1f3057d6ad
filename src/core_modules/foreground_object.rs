// THEORY:
// A `ForegroundObject` is one segmented instance harvested from a representative
// image: the instance's tight box plus the image and mask pixels inside that box.
// It is the unit the compositor pastes.
//
// Key principles:
// 1.  **Aligned crops**: the cropped image and the cropped mask always cover the
//     same rectangle. Both are cut by one generic `crop`, which selects the spatial
//     axes of any `image` buffer regardless of how many channels a pixel carries.
// 2.  **Refreshable pixels**: the cropped image is a copy of the owning image's live
//     pixels. When the owner swaps its image in place (augmentation), it re-crops
//     every object so that the object always shows the owner's current appearance.
//     The box and the mask never change.
// 3.  **Masked paste**: placement copies only the pixels under the (rotated) mask;
//     everything else on the destination canvas is left untouched.
// 4.  **Injected randomness**: the rotation policy and the generator are parameters
//     of every random operation.

use crate::core_modules::bounding_box::{BboxFormat, BoundingBox};
use crate::core_modules::mask::Mask;
use crate::core_modules::rotation::{RandomRotation, Rotation};
use crate::error::GeometryError;
use image::{ImageBuffer, Pixel, RgbImage, imageops};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ForegroundObject {
    class_id: usize,
    class_name: String,
    bbox: BoundingBox,
    /// Size of the image the object was harvested from.
    source_size: (u32, u32),
    image_cropped: RgbImage,
    mask_cropped: Mask,
}

impl ForegroundObject {
    /// Harvests the instance marked by `mask` out of `image`.
    pub fn from_mask(
        image: &RgbImage,
        mask: &Mask,
        class_id: usize,
        class_name: impl Into<String>,
    ) -> Result<Self, GeometryError> {
        if image.dimensions() != mask.dimensions() {
            return Err(GeometryError::DimensionMismatch {
                expected: image.dimensions(),
                actual: mask.dimensions(),
            });
        }
        let bbox = mask.tight_box()?;
        let image_cropped = crop(&bbox, image);
        let mask_cropped = Mask::from_binary_plane(crop(&bbox, mask.as_gray()));
        Ok(Self {
            class_id,
            class_name: class_name.into(),
            bbox,
            source_size: image.dimensions(),
            image_cropped,
            mask_cropped,
        })
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// `(width, height)` of the image the object was harvested from.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn image_cropped(&self) -> &RgbImage {
        &self.image_cropped
    }

    pub fn mask_cropped(&self) -> &Mask {
        &self.mask_cropped
    }

    /// Cuts this object's box out of any buffer aligned with the source image.
    pub fn crop<P>(&self, buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>>
    where
        P: Pixel + 'static,
        P::Subpixel: 'static,
    {
        crop(&self.bbox, buffer)
    }

    /// Re-crops from the owner's current pixels. The owner guarantees `image`
    /// is the same size as the one the object was harvested from.
    pub(crate) fn refresh(&mut self, image: &RgbImage) {
        self.image_cropped = crop(&self.bbox, image);
    }

    /// The object's box in its source image, in the requested convention.
    pub fn bbox_to(&self, format: BboxFormat) -> [f64; 4] {
        let (width, height) = self.source_size;
        self.bbox.convert(format, width, height)
    }

    /// Rotates the crop and its mask with the same geometry on an expanded canvas.
    /// If nearest sampling loses every mask pixel (objects a pixel or two wide),
    /// the unrotated crop is returned instead.
    pub fn transform(&self, rotation: Rotation) -> TransformedObject {
        let image = rotation.apply_rgb(&self.image_cropped);
        let mask = rotation.apply_mask(&self.mask_cropped);
        if mask.is_empty() {
            debug!(
                class = %self.class_name,
                degrees = rotation.degrees(),
                "rotation erased the object mask; keeping the unrotated crop"
            );
            return TransformedObject {
                image: self.image_cropped.clone(),
                mask: self.mask_cropped.clone(),
                degrees: 0.0,
            };
        }
        TransformedObject {
            image,
            mask,
            degrees: rotation.degrees(),
        }
    }

    pub fn random_rigid_transform<R: Rng + ?Sized>(&self, policy: &RandomRotation, rng: &mut R) -> TransformedObject {
        self.transform(policy.sample(rng))
    }

    /// Randomly rotates the object and pastes it at a random position on
    /// `background` (in place). Returns the pasted object's box in the
    /// background's coordinates.
    pub fn place<R: Rng + ?Sized>(
        &self,
        background: &mut RgbImage,
        policy: &RandomRotation,
        rng: &mut R,
    ) -> Result<BoundingBox, GeometryError> {
        let transformed = self.random_rigid_transform(policy, rng);
        let (top, left) = transformed.sample_offset(background.dimensions(), rng)?;
        transformed.paste_onto(background, top, left)
    }
}

/// Selects rows `top..bottom` and columns `left..right` of any pixel type.
fn crop<P>(bbox: &BoundingBox, buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    imageops::crop_imm(buffer, bbox.left(), bbox.top(), bbox.width(), bbox.height()).to_image()
}

/// A rotated crop ready to be pasted. Image and mask share their dimensions.
#[derive(Debug, Clone)]
pub struct TransformedObject {
    image: RgbImage,
    mask: Mask,
    degrees: f32,
}

impl TransformedObject {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn degrees(&self) -> f32 {
        self.degrees
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Uniform `(top, left)` with `top` in `[0, H - h)` and `left` in `[0, W - w)`.
    pub fn sample_offset<R: Rng + ?Sized>(
        &self,
        canvas_size: (u32, u32),
        rng: &mut R,
    ) -> Result<(u32, u32), GeometryError> {
        let (canvas_width, canvas_height) = canvas_size;
        let (w, h) = self.dimensions();
        if h >= canvas_height || w >= canvas_width {
            return Err(GeometryError::ObjectTooLarge {
                object_width: w,
                object_height: h,
                canvas_width,
                canvas_height,
            });
        }
        let top = rng.random_range(0..canvas_height - h);
        let left = rng.random_range(0..canvas_width - w);
        Ok((top, left))
    }

    /// Copies the pixels under the mask onto `background` with the crop's top-left
    /// corner at `(top, left)`; returns the mask's tight box in background coordinates.
    pub fn paste_onto(&self, background: &mut RgbImage, top: u32, left: u32) -> Result<BoundingBox, GeometryError> {
        let (canvas_width, canvas_height) = background.dimensions();
        let (w, h) = self.dimensions();
        if top + h > canvas_height || left + w > canvas_width {
            return Err(GeometryError::ObjectTooLarge {
                object_width: w,
                object_height: h,
                canvas_width: canvas_width.saturating_sub(left),
                canvas_height: canvas_height.saturating_sub(top),
            });
        }

        for (x, y) in self.mask.foreground() {
            background.put_pixel(left + x, top + y, *self.image.get_pixel(x, y));
        }

        Ok(self.mask.tight_box()?.translate(top, left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn source() -> (RgbImage, Mask) {
        let image = RgbImage::from_fn(20, 16, |x, y| Rgb([x as u8 + 1, y as u8 + 1, 200]));
        // an L-shaped object inside rows 3..9, columns 5..12
        let mask = Mask::from_fn(20, 16, |x, y| {
            ((3..9).contains(&y) && (5..7).contains(&x)) || ((7..9).contains(&y) && (5..12).contains(&x))
        });
        (image, mask)
    }

    #[test]
    fn crops_share_extent_with_the_box() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 1, "leaf").unwrap();
        assert_eq!(object.bbox(), BoundingBox::new(3, 9, 5, 12).unwrap());
        assert_eq!(object.image_cropped().dimensions(), (7, 6));
        assert_eq!(object.mask_cropped().dimensions(), (7, 6));
        assert_eq!(object.image_cropped().get_pixel(0, 0), image.get_pixel(5, 3));
        assert!(object.mask_cropped().get(0, 0));
        assert!(!object.mask_cropped().get(6, 0));
    }

    #[test]
    fn crop_selects_spatial_axes_for_any_channel_count() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        let gray = GrayImage::from_fn(20, 16, |x, y| Luma([(x * 16 + y) as u8]));
        let cropped = object.crop(&gray);
        assert_eq!(cropped.dimensions(), object.image_cropped().dimensions());
        assert_eq!(cropped.get_pixel(2, 1)[0], (7 * 16 + 4) as u8);
    }

    #[test]
    fn harvesting_requires_aligned_mask() {
        let (image, _) = source();
        let err = ForegroundObject::from_mask(&image, &Mask::new(3, 3), 0, "leaf").unwrap_err();
        assert!(matches!(err, GeometryError::DimensionMismatch { .. }));
        let err = ForegroundObject::from_mask(&image, &Mask::new(20, 16), 0, "leaf").unwrap_err();
        assert_eq!(err, GeometryError::EmptyMask);
    }

    #[test]
    fn bbox_to_uses_the_source_frame() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        assert_eq!(object.bbox_to(BboxFormat::PascalVoc), [5.0, 3.0, 12.0, 9.0]);
        assert_eq!(object.bbox_to(BboxFormat::Coco), [5.0, 3.0, 7.0, 6.0]);
        assert_eq!(object.bbox_to(BboxFormat::Yolo), object.bbox().to_yolo(20, 16));
    }

    #[test]
    fn masked_paste_only_touches_masked_pixels() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        let transformed = object.transform(Rotation::expanded(30.0));

        let original = RgbImage::from_pixel(40, 30, Rgb([9, 9, 9]));
        let mut background = original.clone();
        let (top, left) = (11, 17);
        let bbox = transformed.paste_onto(&mut background, top, left).unwrap();

        let (w, h) = transformed.dimensions();
        for (x, y, pixel) in background.enumerate_pixels() {
            let inside = (left..left + w).contains(&x) && (top..top + h).contains(&y);
            if inside && transformed.mask().get(x - left, y - top) {
                assert_eq!(pixel, transformed.image().get_pixel(x - left, y - top));
            } else {
                assert_eq!(pixel, original.get_pixel(x, y));
            }
        }
        assert_eq!(bbox, transformed.mask().tight_box().unwrap().translate(top, left));
    }

    #[test]
    fn placement_stays_on_canvas() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let policy = RandomRotation::default();
        for _ in 0..50 {
            let mut background = RgbImage::new(64, 48);
            let bbox = object.place(&mut background, &policy, &mut rng).unwrap();
            assert!(bbox.right() <= 64 && bbox.bottom() <= 48);
            assert!(bbox.width() > 0 && bbox.height() > 0);
        }
    }

    #[test]
    fn oversized_object_fails_explicitly() {
        let (image, mask) = source();
        let object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut background = RgbImage::new(7, 7);
        let err = object
            .place(&mut background, &RandomRotation::new(0.0), &mut rng)
            .unwrap_err();
        assert!(matches!(err, GeometryError::ObjectTooLarge { object_width: 7, .. }));
        assert_eq!(background, RgbImage::new(7, 7));
    }

    #[test]
    fn refresh_recrops_from_new_pixels() {
        let (image, mask) = source();
        let mut object = ForegroundObject::from_mask(&image, &mask, 0, "leaf").unwrap();
        let inverted = RgbImage::from_fn(20, 16, |x, y| {
            let p = image.get_pixel(x, y);
            Rgb([255 - p[0], 255 - p[1], 255 - p[2]])
        });
        object.refresh(&inverted);
        assert_eq!(object.image_cropped().get_pixel(0, 0), inverted.get_pixel(5, 3));
        assert_eq!(object.bbox(), BoundingBox::new(3, 9, 5, 12).unwrap());
    }
}
