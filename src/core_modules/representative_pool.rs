// THEORY:
// A `RepresentativePool` gathers every representative image taken from one field
// recording (they share a file-name stem, e.g. `orchard_0130.png`,
// `orchard_0245.png`). The pool is the object supply of a synthesis call: objects
// are queried across all of its images, and augmented substitutes are installed
// into all of its images at once through a `PoolSubstitution`.
//
// Because installing substitutes mutates the images in place, a pool can only take
// part in one synthesis call at a time. `&mut` access enforces that; independent
// pools share nothing and can be processed in parallel.

use crate::core_modules::file_name::parse_file_name;
use crate::core_modules::foreground_object::ForegroundObject;
use crate::core_modules::representative_image::{ObjectQuery, RepresentativeImage};
use crate::core_modules::substitution::PoolSubstitution;
use crate::error::{Result, ValidationError};
use image::RgbImage;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RepresentativePool {
    name: String,
    classes: Vec<String>,
    images: Vec<RepresentativeImage>,
}

impl RepresentativePool {
    pub fn new(name: impl Into<String>, classes: Vec<String>, images: Vec<RepresentativeImage>) -> Self {
        Self {
            name: name.into(),
            classes,
            images,
        }
    }

    /// Loads every `<stem>_<MMSS><extension>` image in `rep_dir`, sorted by file name,
    /// with its label map `<mask_dir>/<image stem>.png`.
    pub fn load(stem: &str, rep_dir: &Path, mask_dir: &Path, extension: &str, classes: &[String]) -> Result<Self> {
        let extension = normalize_extension(extension);
        let mut paths: Vec<PathBuf> = fs::read_dir(rep_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&extension))
            })
            .filter(|path| {
                parse_file_name(path).is_ok_and(|parsed| parsed.stem == stem && parsed.time.is_some())
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for p_image in paths {
            let mask_name = match p_image.file_stem() {
                Some(image_stem) => format!("{}.png", image_stem.to_string_lossy()),
                None => continue,
            };
            let p_mask = mask_dir.join(mask_name);
            debug!(image = %p_image.display(), mask = %p_mask.display(), "loading representative image");
            images.push(RepresentativeImage::load(&p_image, &p_mask, classes)?);
        }

        info!(pool = stem, images = images.len(), "representative pool loaded");
        Ok(Self::new(stem, classes.to_vec(), images))
    }

    /// Groups the timestamped images of `rep_dir` by stem and loads one pool per stem.
    pub fn discover(rep_dir: &Path, mask_dir: &Path, extension: &str, classes: &[String]) -> Result<Vec<Self>> {
        let extension = normalize_extension(extension);
        let mut stems = BTreeSet::new();
        for entry in fs::read_dir(rep_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(&extension) {
                continue;
            }
            match parse_file_name(&path) {
                Ok(parsed) if parsed.time.is_some() => {
                    stems.insert(parsed.stem);
                }
                _ => debug!(file = name, "skipping file without a MMSS timestamp"),
            }
        }
        stems
            .into_iter()
            .map(|stem| Self::load(&stem, rep_dir, mask_dir, &extension, classes))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_class(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[RepresentativeImage] {
        &self.images
    }

    pub(crate) fn images_mut(&mut self) -> &mut [RepresentativeImage] {
        &mut self.images
    }

    /// Objects matching `query` across all images, image by image.
    pub fn objects(&self, query: ObjectQuery<'_>) -> Result<Vec<&ForegroundObject>, ValidationError> {
        match query {
            ObjectQuery::ClassName(name) if !self.classes.iter().any(|c| c == name) => {
                return Err(ValidationError::UnknownClassName(name.to_string()));
            }
            ObjectQuery::ClassId(class_id) if class_id >= self.classes.len() => {
                return Err(ValidationError::ClassOutOfRange {
                    class_id,
                    n_class: self.classes.len(),
                });
            }
            _ => {}
        }
        let mut objects = Vec::new();
        for rep_image in &self.images {
            objects.extend(rep_image.objects(query)?);
        }
        Ok(objects)
    }

    /// Number of objects available per class.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for object in self.images.iter().flat_map(|r| r.objects(ObjectQuery::All).unwrap_or_default()) {
            if let Some(count) = counts.get_mut(object.class_id()) {
                *count += 1;
            }
        }
        counts
    }

    /// Installs one substitute per image (same order as `images()`) until the guard drops.
    pub fn substitute_all(&mut self, substitutes: &[RgbImage]) -> Result<PoolSubstitution<'_>> {
        PoolSubstitution::install(self, substitutes)
    }
}

fn normalize_extension(extension: &str) -> String {
    if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::representative_image::tests::{classes, sample_image};
    use image::{GrayImage, Luma, Rgb};

    fn pool() -> RepresentativePool {
        RepresentativePool::new(
            "field",
            classes(),
            vec![sample_image("field_0001"), sample_image("field_0002")],
        )
    }

    #[test]
    fn objects_span_every_image() {
        let pool = pool();
        assert_eq!(pool.objects(ObjectQuery::All).unwrap().len(), 6);
        assert_eq!(pool.objects(ObjectQuery::ClassName("fruit")).unwrap().len(), 4);
        assert_eq!(pool.class_counts(), vec![4, 2, 0]);
    }

    #[test]
    fn name_and_id_queries_return_the_same_sequence() {
        let pool = pool();
        let by_name: Vec<_> = pool
            .objects(ObjectQuery::ClassName("leaf"))
            .unwrap()
            .into_iter()
            .map(|o| (o.class_id(), o.bbox()))
            .collect();
        let by_id: Vec<_> = pool
            .objects(ObjectQuery::ClassId(1))
            .unwrap()
            .into_iter()
            .map(|o| (o.class_id(), o.bbox()))
            .collect();
        assert_eq!(by_name, by_id);
    }

    #[test]
    fn unknown_queries_fail_even_on_an_empty_pool() {
        let empty = RepresentativePool::new("empty", classes(), Vec::new());
        assert!(empty.objects(ObjectQuery::ClassName("trunk")).is_err());
        assert!(empty.objects(ObjectQuery::ClassId(9)).is_err());
        assert!(empty.objects(ObjectQuery::All).unwrap().is_empty());
    }

    #[test]
    fn loads_images_matching_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        let rep_dir = dir.path().join("rep");
        let mask_dir = dir.path().join("masks");
        fs::create_dir_all(&rep_dir).unwrap();
        fs::create_dir_all(&mask_dir).unwrap();

        for name in ["orchard_0130", "orchard_0005", "vineyard_0100"] {
            RgbImage::from_pixel(16, 12, Rgb([10, 20, 30]))
                .save(rep_dir.join(format!("{name}.png")))
                .unwrap();
            GrayImage::from_fn(16, 12, |x, y| Luma([if x < 4 && y < 4 { 1 } else if x > 10 { 2 } else { 0 }]))
                .save(mask_dir.join(format!("{name}.png")))
                .unwrap();
        }

        let classes = vec!["fruit".to_string(), "leaf".to_string()];
        let pool = RepresentativePool::load("orchard", &rep_dir, &mask_dir, "png", &classes).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.images()[0].name(), "orchard_0005");
        assert_eq!(pool.images()[1].timestamp(), Some(std::time::Duration::from_secs(90)));
        assert_eq!(pool.class_counts(), vec![2, 2]);

        let pools = RepresentativePool::discover(&rep_dir, &mask_dir, ".png", &classes).unwrap();
        let names: Vec<_> = pools.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["orchard", "vineyard"]);
    }

    #[test]
    fn stems_that_prefix_each_other_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let rep_dir = dir.path().join("rep");
        let mask_dir = dir.path().join("masks");
        fs::create_dir_all(&rep_dir).unwrap();
        fs::create_dir_all(&mask_dir).unwrap();

        for name in ["orchard_0130", "orchard_b_0200", "orchard_notes"] {
            RgbImage::new(8, 8).save(rep_dir.join(format!("{name}.png"))).unwrap();
            GrayImage::from_fn(8, 8, |x, _| Luma([u8::from(x < 2)]))
                .save(mask_dir.join(format!("{name}.png")))
                .unwrap();
        }

        let classes = vec!["fruit".to_string()];
        let pools = RepresentativePool::discover(&rep_dir, &mask_dir, ".png", &classes).unwrap();
        let grouped: Vec<(String, Vec<String>)> = pools
            .iter()
            .map(|p| (p.name().to_string(), p.images().iter().map(|i| i.name().to_string()).collect()))
            .collect();
        assert_eq!(
            grouped,
            vec![
                ("orchard".to_string(), vec!["orchard_0130".to_string()]),
                ("orchard_b".to_string(), vec!["orchard_b_0200".to_string()]),
            ]
        );
    }
}
