// THEORY:
// A `RepresentativeImage` is a still frame with a segmentation mask, used only as
// a quarry of foreground objects. It owns three things:
//
// 1.  **A live image**: the pixels objects are currently cropped from. It may be
//     overwritten in place by an image of the same size (an augmented copy), which
//     re-crops every object so the objects take on the new appearance.
// 2.  **A pristine copy**: the image as loaded. The live image can always be
//     restored to it, and the substitution guards in `substitution` do so on every
//     exit path.
// 3.  **Its objects**: every connected component of every class plane, harvested
//     once at construction. Boxes and masks never change afterwards, which is why
//     an appearance-only augmentation keeps all labels valid.
//
// Construction is an explicit factory: `new` takes decoded pixels and validates
// them, `load` does the file I/O and then delegates to `new`.

use crate::core_modules::file_name::parse_file_name;
use crate::core_modules::foreground_object::ForegroundObject;
use crate::core_modules::mask::ClasswiseMask;
use crate::core_modules::mask_decomposer::mask_decomposer;
use crate::core_modules::substitution::ImageSubstitution;
use crate::error::{GeometryError, Result, StateError, ValidationError};
use image::RgbImage;
use std::path::Path;
use std::time::Duration;

/// Which objects to return from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectQuery<'a> {
    All,
    ClassId(usize),
    ClassName(&'a str),
}

#[derive(Debug, Clone)]
pub struct RepresentativeImage {
    name: String,
    timestamp: Option<Duration>,
    classes: Vec<String>,
    image: RgbImage,
    pristine: RgbImage,
    classwise_mask: ClasswiseMask,
    /// Indexed by class id.
    objects: Vec<Vec<ForegroundObject>>,
    substituted: bool,
}

impl RepresentativeImage {
    /// Validates the inputs and harvests every object. `classes[i]` names plane `i`.
    pub fn new(
        name: impl Into<String>,
        image: RgbImage,
        classwise_mask: ClasswiseMask,
        classes: &[String],
    ) -> Result<Self> {
        if image.dimensions() != classwise_mask.dimensions() {
            return Err(GeometryError::DimensionMismatch {
                expected: image.dimensions(),
                actual: classwise_mask.dimensions(),
            }
            .into());
        }
        if classwise_mask.n_class() != classes.len() {
            return Err(ValidationError::ClassCountMismatch {
                planes: classwise_mask.n_class(),
                classes: classes.len(),
            }
            .into());
        }

        let objectwise = mask_decomposer::decompose(&classwise_mask, classes.len());
        let mut objects = Vec::with_capacity(classes.len());
        for (i_class, class_name) in classes.iter().enumerate() {
            let class_objects = objectwise
                .get(&i_class)
                .map(|masks| {
                    masks
                        .iter()
                        .map(|mask| ForegroundObject::from_mask(&image, mask, i_class, class_name.as_str()))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default();
            objects.push(class_objects);
        }

        Ok(Self {
            name: name.into(),
            timestamp: None,
            classes: classes.to_vec(),
            pristine: image.clone(),
            image,
            classwise_mask,
            objects,
            substituted: false,
        })
    }

    /// Reads `<stem>_<MMSS>.<ext>` and its 8-bit label map.
    pub fn load(image_path: &Path, mask_path: &Path, classes: &[String]) -> Result<Self> {
        let parsed = parse_file_name(image_path)?;
        let timestamp = parsed.timestamp()?;
        let image = image::open(image_path)?.to_rgb8();
        let labels = image::open(mask_path)?.to_luma8();
        let classwise_mask = ClasswiseMask::from_label_map(&labels, classes.len());
        let name = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| parsed.stem.clone());
        let mut rep_image = Self::new(name, image, classwise_mask, classes)?;
        rep_image.timestamp = Some(timestamp);
        Ok(rep_image)
    }

    /// File stem of the image, e.g. `field_0130`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the field recording, from the `MMSS` part of the file name.
    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The live image.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pristine(&self) -> &RgbImage {
        &self.pristine
    }

    pub fn classwise_mask(&self) -> &ClasswiseMask {
        &self.classwise_mask
    }

    pub fn is_substituted(&self) -> bool {
        self.substituted
    }

    pub fn class_id(&self, class_name: &str) -> Result<usize, ValidationError> {
        self.classes
            .iter()
            .position(|c| c == class_name)
            .ok_or_else(|| ValidationError::UnknownClassName(class_name.to_string()))
    }

    pub fn objects(&self, query: ObjectQuery<'_>) -> Result<Vec<&ForegroundObject>, ValidationError> {
        let i_class = match query {
            ObjectQuery::All => return Ok(self.objects.iter().flatten().collect()),
            ObjectQuery::ClassId(i_class) => i_class,
            ObjectQuery::ClassName(name) => self.class_id(name)?,
        };
        self.objects
            .get(i_class)
            .map(|objects| objects.iter().collect())
            .ok_or(ValidationError::ClassOutOfRange {
                class_id: i_class,
                n_class: self.classes.len(),
            })
    }

    /// Overwrites the live image in place and re-crops every object. The new image
    /// must match in size and must preserve spatial alignment with the original;
    /// the latter is the caller's responsibility.
    pub fn set_image(&mut self, new_image: &RgbImage) -> Result<(), StateError> {
        if new_image.dimensions() != self.image.dimensions() {
            return Err(StateError::SizeMismatch {
                expected: self.image.dimensions(),
                actual: new_image.dimensions(),
            });
        }
        self.image.copy_from_slice(new_image.as_raw());
        self.refresh_objects();
        Ok(())
    }

    /// Installs `replacement` as the live image until the returned guard is dropped.
    pub fn substitute(&mut self, replacement: &RgbImage) -> Result<ImageSubstitution<'_>, StateError> {
        self.check_substitute(replacement)?;
        Ok(ImageSubstitution::install(self, replacement))
    }

    /// Runs `f` with `replacement` installed and restores the pristine image
    /// afterwards, whether `f` succeeds, fails or panics.
    pub fn with_image_as<T, E>(
        &mut self,
        replacement: &RgbImage,
        f: impl FnOnce(&RepresentativeImage) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StateError>,
    {
        let guard = self.substitute(replacement)?;
        f(&guard)
    }

    /// Puts the pristine pixels back. Only needed to recover from a leaked guard.
    pub fn restore(&mut self) {
        self.image.copy_from_slice(self.pristine.as_raw());
        self.refresh_objects();
        self.substituted = false;
    }

    pub(crate) fn check_substitute(&self, replacement: &RgbImage) -> Result<(), StateError> {
        if self.substituted {
            return Err(StateError::AlreadySubstituted(self.name.clone()));
        }
        if replacement.dimensions() != self.image.dimensions() {
            return Err(StateError::SizeMismatch {
                expected: self.image.dimensions(),
                actual: replacement.dimensions(),
            });
        }
        Ok(())
    }

    /// Installs a replacement that already passed `check_substitute`.
    pub(crate) fn install_unchecked(&mut self, replacement: &RgbImage) {
        self.image.copy_from_slice(replacement.as_raw());
        self.refresh_objects();
        self.substituted = true;
    }

    fn refresh_objects(&mut self) {
        let image = &self.image;
        for object in self.objects.iter_mut().flatten() {
            object.refresh(image);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core_modules::mask::Mask;
    use image::Rgb;

    pub(crate) fn classes() -> Vec<String> {
        vec!["fruit".to_string(), "leaf".to_string(), "stem".to_string()]
    }

    /// 40×30 image: two fruits, one leaf, no stem.
    pub(crate) fn sample_image(name: &str) -> RepresentativeImage {
        let image = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8 * 5, y as u8 * 7, 100]));
        let fruit = Mask::from_fn(40, 30, |x, y| {
            ((2..6).contains(&x) && (3..7).contains(&y)) || ((20..24).contains(&x) && (20..25).contains(&y))
        });
        let leaf = Mask::from_fn(40, 30, |x, y| (30..36).contains(&x) && (5..9).contains(&y));
        let stem = Mask::new(40, 30);
        let classwise = ClasswiseMask::from_planes(40, 30, vec![fruit, leaf, stem]).unwrap();
        RepresentativeImage::new(name, image, classwise, &classes()).unwrap()
    }

    #[test]
    fn objects_are_harvested_per_class() {
        let rep = sample_image("field_0001");
        assert_eq!(rep.objects(ObjectQuery::ClassId(0)).unwrap().len(), 2);
        assert_eq!(rep.objects(ObjectQuery::ClassId(1)).unwrap().len(), 1);
        assert!(rep.objects(ObjectQuery::ClassId(2)).unwrap().is_empty());
        assert_eq!(rep.objects(ObjectQuery::All).unwrap().len(), 3);
    }

    #[test]
    fn class_name_and_id_queries_agree() {
        let rep = sample_image("field_0001");
        for (i_class, name) in classes().iter().enumerate() {
            let by_id: Vec<_> = rep
                .objects(ObjectQuery::ClassId(i_class))
                .unwrap()
                .into_iter()
                .map(|o| o.bbox())
                .collect();
            let by_name: Vec<_> = rep
                .objects(ObjectQuery::ClassName(name))
                .unwrap()
                .into_iter()
                .map(|o| o.bbox())
                .collect();
            assert_eq!(by_id, by_name);
        }
    }

    #[test]
    fn unknown_classes_are_rejected() {
        let rep = sample_image("field_0001");
        assert!(matches!(
            rep.objects(ObjectQuery::ClassName("trunk")),
            Err(ValidationError::UnknownClassName(_))
        ));
        assert!(matches!(
            rep.objects(ObjectQuery::ClassId(3)),
            Err(ValidationError::ClassOutOfRange { class_id: 3, n_class: 3 })
        ));
    }

    #[test]
    fn set_image_recrops_objects_and_checks_size() {
        let mut rep = sample_image("field_0001");
        let white = RgbImage::from_pixel(40, 30, Rgb([255, 255, 255]));
        rep.set_image(&white).unwrap();
        for object in rep.objects(ObjectQuery::All).unwrap() {
            assert!(object.image_cropped().pixels().all(|p| *p == Rgb([255, 255, 255])));
        }
        assert_ne!(rep.image(), rep.pristine());

        let err = rep.set_image(&RgbImage::new(10, 10)).unwrap_err();
        assert_eq!(
            err,
            StateError::SizeMismatch {
                expected: (40, 30),
                actual: (10, 10)
            }
        );
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let classwise = ClasswiseMask::from_planes(8, 8, vec![Mask::new(8, 8)]).unwrap();
        let err = RepresentativeImage::new("x", RgbImage::new(9, 8), classwise, &["a".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SynthError::Geometry(GeometryError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn plane_count_must_match_class_count() {
        let classwise = ClasswiseMask::from_planes(8, 8, vec![Mask::new(8, 8)]).unwrap();
        let err = RepresentativeImage::new("x", RgbImage::new(8, 8), classwise, &classes()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SynthError::Validation(ValidationError::ClassCountMismatch { planes: 1, classes: 3 })
        ));
    }
}
