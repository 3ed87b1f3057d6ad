// THEORY:
// The `pipeline` module is the top-level API of the engine: one call to
// `Synthesizer::synthesize` turns a background frame and a pool of representative
// images into one synthetic training image and its detection label.
//
// A call walks through a fixed sequence of phases:
//
//     Idle -> AugmentingSources -> Compositing -> Restoring -> Done
//                      \                \              \
//                       +----------------+---------------+--> Failed
//
// 1.  **Idle**: preconditions are checked (non-empty pool, usable class
//     probabilities). A failure here leaves nothing to undo.
// 2.  **AugmentingSources**: the background frame is augmented into the working
//     canvas, every representative image is augmented, and the augmented copies are
//     installed into the pool through one `PoolSubstitution` guard.
// 3.  **Compositing**: `n ~ round(N(mean, sd))` objects are drawn and placed on the
//     canvas, each placement adding one label entry.
// 4.  **Restoring**: the guard is dropped and the pool is pristine again. Because the
//     guard restores in `Drop`, this also happens when compositing fails or panics.
//
// The augmented copies only change appearance, so the boxes harvested from the
// pristine masks stay valid while they are installed. That is a contract on the
// augmentations, not something the engine checks.

use crate::core_modules::augmentation::Augmentation;
use crate::core_modules::foreground_object::ForegroundObject;
use crate::core_modules::representative_image::ObjectQuery;
use crate::core_modules::representative_pool::RepresentativePool;
use crate::core_modules::rotation::RandomRotation;
use crate::core_modules::yolo_label::YoloLabel;
use crate::error::{GeometryError, Result, ValidationError};
use image::RgbImage;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::IndexedRandom;
use rand_distr::Normal;
use serde::Deserialize;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::augmentation::{ColorBlur, Identity};

/// What to do when a rotated object does not fit on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OversizePolicy {
    /// Fail the whole call.
    Abort,
    /// Draw a new class, object and rotation, up to `max_attempts` tries per object.
    Resample { max_attempts: usize },
}

impl Default for OversizePolicy {
    fn default() -> Self {
        OversizePolicy::Resample { max_attempts: 8 }
    }
}

/// Configuration for the Synthesizer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub object_count_mean: f64,
    pub object_count_std_dev: f64,
    /// Probability of drawing each class, indexed by class id. `None` draws
    /// uniformly over all objects of the pool instead.
    pub class_probabilities: Option<Vec<f64>>,
    pub rotation: RandomRotation,
    pub oversize_policy: OversizePolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            object_count_mean: 6.0,
            object_count_std_dev: 1.5,
            class_probabilities: None,
            rotation: RandomRotation::default(),
            oversize_policy: OversizePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisPhase {
    Idle,
    AugmentingSources,
    Compositing,
    Restoring,
    Done,
    Failed,
}

/// One synthetic training sample.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub image: RgbImage,
    pub label: YoloLabel,
}

pub struct Synthesizer {
    config: SynthesisConfig,
    object_count: Normal<f64>,
    class_weights: Option<WeightedIndex<f64>>,
    phase: SynthesisPhase,
}

impl Synthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self, ValidationError> {
        let object_count = Normal::new(config.object_count_mean, config.object_count_std_dev)
            .map_err(|e| ValidationError::InvalidObjectCount(e.to_string()))?;
        let class_weights = config
            .class_probabilities
            .as_ref()
            .map(|p| WeightedIndex::new(p).map_err(|e| ValidationError::InvalidProbabilities(e.to_string())))
            .transpose()?;
        Ok(Self {
            config,
            object_count,
            class_weights,
            phase: SynthesisPhase::Idle,
        })
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Phase reached by the last call; `Done` or `Failed` once a call has returned.
    pub fn phase(&self) -> SynthesisPhase {
        self.phase
    }

    /// `round(N(mean, sd))`, never negative.
    pub fn sample_object_count<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.object_count.sample(rng).round().max(0.0) as usize
    }

    /// Composites randomly chosen objects of `pool` onto an augmented copy of `frame`.
    /// `pool` is left exactly as it was, whatever the outcome.
    pub fn synthesize<R: Rng>(
        &mut self,
        frame: &RgbImage,
        pool: &mut RepresentativePool,
        foreground: &dyn Augmentation,
        background: &dyn Augmentation,
        rng: &mut R,
    ) -> Result<Synthesized> {
        self.phase = SynthesisPhase::Idle;
        if let Err(e) = self.check_preconditions(pool) {
            self.phase = SynthesisPhase::Failed;
            return Err(e.into());
        }
        let n_object = self.sample_object_count(rng);

        // --- 1. Augment the sources ---
        self.enter(SynthesisPhase::AugmentingSources, pool);
        let mut canvas = background.apply(frame, rng);
        let substitutes: Vec<RgbImage> = pool
            .images()
            .iter()
            .map(|rep_image| foreground.apply(rep_image.pristine(), rng))
            .collect();
        let guard = match pool.substitute_all(&substitutes) {
            Ok(guard) => guard,
            Err(e) => {
                self.phase = SynthesisPhase::Failed;
                return Err(e);
            }
        };

        // --- 2. Composite ---
        self.enter(SynthesisPhase::Compositing, &guard);
        let composited = self.composite(&guard, &mut canvas, n_object, rng);

        // --- 3. Restore ---
        self.enter(SynthesisPhase::Restoring, &guard);
        drop(guard);

        match composited {
            Ok(label) => {
                self.phase = SynthesisPhase::Done;
                info!(pool = pool.name(), objects = label.len(), "frame synthesized");
                Ok(Synthesized { image: canvas, label })
            }
            Err(e) => {
                self.phase = SynthesisPhase::Failed;
                warn!(pool = pool.name(), error = %e, "synthesis failed, pool restored");
                Err(e)
            }
        }
    }

    fn enter(&mut self, phase: SynthesisPhase, pool: &RepresentativePool) {
        debug!(pool = pool.name(), ?phase, "synthesis phase");
        self.phase = phase;
    }

    /// Everything that can be rejected before any state changes.
    fn check_preconditions(&self, pool: &RepresentativePool) -> Result<(), ValidationError> {
        if pool.is_empty() {
            return Err(ValidationError::EmptyPool(pool.name().to_string()));
        }
        let counts = pool.class_counts();
        match &self.config.class_probabilities {
            Some(probabilities) => {
                if probabilities.len() != pool.n_class() {
                    return Err(ValidationError::InvalidProbabilities(format!(
                        "{} probabilities for {} classes",
                        probabilities.len(),
                        pool.n_class()
                    )));
                }
                // the class resampling loop only terminates if some drawable class has objects
                let supported = probabilities.iter().zip(&counts).any(|(&p, &count)| p > 0.0 && count > 0);
                if !supported {
                    return Err(ValidationError::InvalidProbabilities(format!(
                        "no class with a positive probability has objects in pool \"{}\"",
                        pool.name()
                    )));
                }
            }
            None => {
                if counts.iter().all(|&count| count == 0) {
                    return Err(ValidationError::NoObjects(pool.name().to_string()));
                }
            }
        }
        Ok(())
    }

    fn composite<R: Rng + ?Sized>(
        &self,
        pool: &RepresentativePool,
        canvas: &mut RgbImage,
        n_object: usize,
        rng: &mut R,
    ) -> Result<YoloLabel> {
        let mut label = YoloLabel::for_image(canvas);
        let max_attempts = match self.config.oversize_policy {
            OversizePolicy::Abort => 1,
            OversizePolicy::Resample { max_attempts } => max_attempts.max(1),
        };

        for i_object in 0..n_object {
            let mut attempt = 1;
            loop {
                let object = self.pick_object(pool, rng)?;
                match object.place(canvas, &self.config.rotation, rng) {
                    Ok(bbox) => {
                        label.add(object.class_id(), bbox);
                        break;
                    }
                    Err(e @ GeometryError::ObjectTooLarge { .. }) if attempt < max_attempts => {
                        debug!(i_object, attempt, error = %e, "object does not fit, resampling");
                        attempt += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(label)
    }

    fn pick_object<'p, R: Rng + ?Sized>(
        &self,
        pool: &'p RepresentativePool,
        rng: &mut R,
    ) -> Result<&'p ForegroundObject, ValidationError> {
        let candidates = match &self.class_weights {
            Some(weights) => loop {
                let i_class = weights.sample(rng);
                let objects = pool.objects(ObjectQuery::ClassId(i_class))?;
                if !objects.is_empty() {
                    break objects;
                }
                debug!(class = i_class, "drawn class has no objects, resampling");
            },
            None => pool.objects(ObjectQuery::All)?,
        };
        candidates
            .choose(rng)
            .copied()
            .ok_or_else(|| ValidationError::NoObjects(pool.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::mask::{ClasswiseMask, Mask};
    use crate::core_modules::representative_image::RepresentativeImage;
    use crate::error::{StateError, SynthError};
    use image::Rgb;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const OBJECT_COLOR: Rgb<u8> = Rgb([200, 10, 10]);

    fn classes() -> Vec<String> {
        vec!["fruit".to_string(), "leaf".to_string(), "stem".to_string()]
    }

    /// A 100x100 image whose only object is a 6x5 block of class 2.
    fn single_object_pool() -> RepresentativePool {
        let image = RgbImage::from_pixel(100, 100, OBJECT_COLOR);
        let stem = Mask::from_fn(100, 100, |x, y| (40..46).contains(&x) && (60..65).contains(&y));
        let classwise = ClasswiseMask::from_planes(100, 100, vec![Mask::new(100, 100), Mask::new(100, 100), stem]).unwrap();
        let rep = RepresentativeImage::new("plot_0001", image, classwise, &classes()).unwrap();
        RepresentativePool::new("plot", classes(), vec![rep])
    }

    /// One image holding a 60x60 object.
    fn giant_object_pool() -> RepresentativePool {
        let image = RgbImage::from_pixel(80, 80, OBJECT_COLOR);
        let fruit = Mask::from_fn(80, 80, |x, y| (10..70).contains(&x) && (10..70).contains(&y));
        let classwise = ClasswiseMask::from_planes(80, 80, vec![fruit, Mask::new(80, 80), Mask::new(80, 80)]).unwrap();
        let rep = RepresentativeImage::new("plot_0002", image, classwise, &classes()).unwrap();
        RepresentativePool::new("plot", classes(), vec![rep])
    }

    fn fixed_count(n: f64) -> SynthesisConfig {
        SynthesisConfig {
            object_count_mean: n,
            object_count_std_dev: 1e-9,
            ..SynthesisConfig::default()
        }
    }

    #[test]
    fn defaults_match_the_documented_heuristic() {
        let config = SynthesisConfig::default();
        assert_eq!(config.object_count_mean, 6.0);
        assert_eq!(config.object_count_std_dev, 1.5);
        assert_eq!(config.rotation.max_degrees, 180.0);
        assert_eq!(config.oversize_policy, OversizePolicy::Resample { max_attempts: 8 });
    }

    #[test]
    fn only_the_supported_class_is_placed() {
        let mut pool = single_object_pool();
        let config = SynthesisConfig {
            class_probabilities: Some(vec![0.0, 0.0, 1.0]),
            ..fixed_count(5.0)
        };
        let mut synthesizer = Synthesizer::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let frame = RgbImage::new(100, 100);

        let out = synthesizer.synthesize(&frame, &mut pool, &Identity, &Identity, &mut rng).unwrap();

        assert_eq!(synthesizer.phase(), SynthesisPhase::Done);
        assert_eq!(out.label.len(), 5);
        assert!(out.label.entries().iter().all(|e| e.class_id == 2));
        for entry in out.label.entries() {
            let b = entry.bbox;
            assert!(b.right() <= 100 && b.bottom() <= 100);
            // every placed box contains pasted pixels
            let pasted = (b.top()..b.bottom())
                .flat_map(|y| (b.left()..b.right()).map(move |x| (x, y)))
                .any(|(x, y)| out.image.get_pixel(x, y) == &OBJECT_COLOR);
            assert!(pasted);
        }
        // nothing was pasted outside the boxes
        for (x, y, p) in out.image.enumerate_pixels() {
            if *p == OBJECT_COLOR {
                let inside = out.label.entries().iter().any(|e| {
                    (e.bbox.left()..e.bbox.right()).contains(&x) && (e.bbox.top()..e.bbox.bottom()).contains(&y)
                });
                assert!(inside);
            }
        }
    }

    #[test]
    fn empty_classes_are_redrawn_until_a_stocked_one_comes_up() {
        let mut pool = single_object_pool();
        let config = SynthesisConfig {
            class_probabilities: Some(vec![0.5, 0.0, 0.5]),
            ..fixed_count(12.0)
        };
        let mut synthesizer = Synthesizer::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let out = synthesizer
            .synthesize(&RgbImage::new(100, 100), &mut pool, &Identity, &Identity, &mut rng)
            .unwrap();

        assert_eq!(synthesizer.phase(), SynthesisPhase::Done);
        assert_eq!(out.label.len(), 12);
        assert!(out.label.entries().iter().all(|e| e.class_id == 2));
    }

    #[test]
    fn geometry_changing_augmentation_fails_while_augmenting() {
        let mut pool = single_object_pool();
        let mut synthesizer = Synthesizer::new(fixed_count(2.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let shrink = |_: &RgbImage| RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]));

        let err = synthesizer
            .synthesize(&RgbImage::new(100, 100), &mut pool, &shrink, &Identity, &mut rng)
            .unwrap_err();

        assert!(matches!(err, SynthError::State(StateError::SizeMismatch { .. })));
        assert_eq!(synthesizer.phase(), SynthesisPhase::Failed);
        let rep = &pool.images()[0];
        assert!(!rep.is_substituted());
        assert_eq!(rep.image(), rep.pristine());
        assert!(rep.objects(ObjectQuery::All).unwrap()[0].image_cropped().pixels().all(|p| *p == OBJECT_COLOR));
    }

    #[test]
    fn empty_pool_fails_before_anything_happens() {
        let mut pool = RepresentativePool::new("empty", classes(), Vec::new());
        let mut synthesizer = Synthesizer::new(SynthesisConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = synthesizer
            .synthesize(&RgbImage::new(10, 10), &mut pool, &Identity, &Identity, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SynthError::Validation(ValidationError::EmptyPool(_))));
        assert_eq!(synthesizer.phase(), SynthesisPhase::Failed);
    }

    #[test]
    fn unsupported_probabilities_are_rejected_up_front() {
        let mut pool = single_object_pool();
        let config = SynthesisConfig {
            class_probabilities: Some(vec![0.5, 0.5, 0.0]),
            ..SynthesisConfig::default()
        };
        let mut synthesizer = Synthesizer::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = synthesizer
            .synthesize(&RgbImage::new(100, 100), &mut pool, &Identity, &Identity, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SynthError::Validation(ValidationError::InvalidProbabilities(_))));

        assert!(Synthesizer::new(SynthesisConfig {
            class_probabilities: Some(vec![0.0, 0.0, 0.0]),
            ..SynthesisConfig::default()
        })
        .is_err());
    }

    #[test]
    fn oversize_abort_restores_the_pool() {
        let mut pool = giant_object_pool();
        let config = SynthesisConfig {
            oversize_policy: OversizePolicy::Abort,
            ..fixed_count(3.0)
        };
        let mut synthesizer = Synthesizer::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let paint = |image: &RgbImage| RgbImage::from_pixel(image.width(), image.height(), Rgb([1, 2, 3]));

        let err = synthesizer
            .synthesize(&RgbImage::new(30, 30), &mut pool, &paint, &Identity, &mut rng)
            .unwrap_err();

        assert!(matches!(err, SynthError::Geometry(GeometryError::ObjectTooLarge { .. })));
        assert_eq!(synthesizer.phase(), SynthesisPhase::Failed);
        let rep = &pool.images()[0];
        assert!(!rep.is_substituted());
        assert_eq!(rep.image(), rep.pristine());
    }

    #[test]
    fn oversize_resampling_gives_up_after_its_budget() {
        let mut pool = giant_object_pool();
        let mut synthesizer = Synthesizer::new(fixed_count(2.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = synthesizer
            .synthesize(&RgbImage::new(30, 30), &mut pool, &Identity, &Identity, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SynthError::Geometry(GeometryError::ObjectTooLarge { .. })));
        assert!(!pool.images()[0].is_substituted());
    }

    #[test]
    fn augmented_appearance_is_pasted() {
        let mut pool = single_object_pool();
        let mut synthesizer = Synthesizer::new(fixed_count(2.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let paint = |image: &RgbImage| RgbImage::from_pixel(image.width(), image.height(), Rgb([9, 99, 199]));

        let out = synthesizer
            .synthesize(&RgbImage::new(100, 100), &mut pool, &paint, &Identity, &mut rng)
            .unwrap();

        assert!(out.image.pixels().any(|p| *p == Rgb([9, 99, 199])));
        assert!(out.image.pixels().all(|p| *p != OBJECT_COLOR));
        assert_eq!(pool.images()[0].image(), pool.images()[0].pristine());
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = |seed: u64| {
            let mut pool = single_object_pool();
            let mut synthesizer = Synthesizer::new(SynthesisConfig::default()).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            synthesizer
                .synthesize(&RgbImage::new(100, 100), &mut pool, &ColorBlur::default(), &Identity, &mut rng)
                .unwrap()
        };
        let (a, b) = (run(11), run(11));
        assert_eq!(a.image, b.image);
        assert_eq!(a.label, b.label);
    }

    #[test]
    fn object_count_is_never_negative() {
        let synthesizer = Synthesizer::new(SynthesisConfig {
            object_count_mean: -3.0,
            ..SynthesisConfig::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let zeros = (0..100).filter(|_| synthesizer.sample_object_count(&mut rng) == 0).count();
        assert!(zeros > 80);
    }
}
