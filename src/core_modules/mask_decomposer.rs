// THEORY:
// The `MaskDecomposer` turns "all pixels of class k" into "each object of class k".
// A classwise plane usually holds several separate objects; to paste them one at a
// time they must first be split into connected components.
//
// Algorithm:
// 1.  **Labelling**: `imageproc`'s connected-component labelling runs over the plane
//     with 4-connectivity (no diagonals). The background is never a component.
// 2.  **Ordering**: Labels are visited in raster order, so components come out
//     ordered by the position of their top-left-most pixel. Identical input always
//     yields the identical sequence.
// 3.  **Materialization**: Every label becomes its own `Mask` of the full plane
//     size, isolating exactly that component's pixels.
//
// The decomposer is stateless: one call, one classwise mask, one result.

use crate::core_modules::mask::{BACKGROUND, ClasswiseMask, Mask};
use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::{BTreeMap, HashMap};

pub mod mask_decomposer {
    use super::*;

    /// Class id to that class's per-object masks, in component order.
    pub type ObjectwiseMasks = BTreeMap<usize, Vec<Mask>>;

    /// Splits each of the first `n_class` planes into its connected components.
    /// A class with no plane or no set pixel maps to an empty list.
    pub fn decompose(classwise: &ClasswiseMask, n_class: usize) -> ObjectwiseMasks {
        (0..n_class)
            .map(|i_class| {
                let components = classwise.plane(i_class).map(split_components).unwrap_or_default();
                (i_class, components)
            })
            .collect()
    }

    /// All 4-connected components of one plane.
    pub fn split_components(plane: &Mask) -> Vec<Mask> {
        let (width, height) = plane.dimensions();
        let labelled = connected_components(plane.as_gray(), Connectivity::Four, Luma([BACKGROUND]));

        // label -> component index, assigned on first sight
        let mut order: HashMap<u32, usize> = HashMap::new();
        let mut components: Vec<Mask> = Vec::new();
        for (x, y, label) in labelled.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let i_component = *order.entry(label).or_insert_with(|| {
                components.push(Mask::new(width, height));
                components.len() - 1
            });
            components[i_component].set(x, y, true);
        }

        components
    }
}

#[cfg(test)]
mod tests {
    use super::mask_decomposer::*;
    use super::*;
    use crate::core_modules::bounding_box::BoundingBox;

    fn classwise(planes: Vec<Mask>) -> ClasswiseMask {
        let (w, h) = planes[0].dimensions();
        ClasswiseMask::from_planes(w, h, planes).unwrap()
    }

    #[test]
    fn single_square_is_one_object() {
        let plane = Mask::from_fn(10, 10, |x, y| (2..5).contains(&y) && (4..7).contains(&x));
        let objects = decompose(&classwise(vec![plane.clone()]), 1);
        assert_eq!(objects[&0].len(), 1);
        assert_eq!(objects[&0][0], plane);
        assert_eq!(objects[&0][0].tight_box().unwrap(), BoundingBox::new(2, 5, 4, 7).unwrap());
    }

    #[test]
    fn disjoint_blobs_partition_the_plane() {
        // four blobs; the two in the middle only touch diagonally
        let plane = Mask::from_fn(12, 8, |x, y| {
            (x < 3 && y < 3) || (x == 8 && y == 2) || (x == 9 && y == 3) || (x >= 10 && y >= 6)
        });
        let components = split_components(&plane);
        assert_eq!(components.len(), 4);

        let total: usize = components.iter().map(Mask::count).sum();
        assert_eq!(total, plane.count());

        let union = Mask::from_fn(12, 8, |x, y| components.iter().any(|c| c.get(x, y)));
        assert_eq!(union, plane);
        for (i, a) in components.iter().enumerate() {
            for b in components.iter().skip(i + 1) {
                assert!(a.foreground().all(|(x, y)| !b.get(x, y)));
            }
        }
    }

    #[test]
    fn components_follow_raster_order_of_first_pixel() {
        let plane = Mask::from_fn(6, 6, |x, y| (x == 5 && y == 0) || (x == 0 && y == 1) || (x == 3 && y == 4));
        let firsts: Vec<_> = split_components(&plane)
            .iter()
            .map(|c| c.foreground().next().unwrap())
            .collect();
        assert_eq!(firsts, vec![(5, 0), (0, 1), (3, 4)]);
    }

    #[test]
    fn checkerboard_splits_into_single_pixels() {
        let plane = Mask::from_fn(8, 8, |x, y| (x + y) % 2 == 0);
        let components = split_components(&plane);
        assert_eq!(components.len(), 32);
        let firsts: Vec<_> = components.iter().map(|c| c.foreground().next().unwrap()).collect();
        assert_eq!(firsts, plane.foreground().collect::<Vec<_>>());
        assert!(components.iter().all(|c| c.count() == 1));
    }

    #[test]
    fn u_shape_stays_connected() {
        let plane = Mask::from_fn(5, 5, |x, y| x == 0 || x == 4 || y == 4);
        assert_eq!(split_components(&plane).len(), 1);
    }

    #[test]
    fn empty_and_missing_classes_map_to_empty_lists() {
        let objects = decompose(&classwise(vec![Mask::new(4, 4)]), 2);
        assert!(objects[&0].is_empty());
        assert!(objects[&1].is_empty());
    }

    #[test]
    fn decomposition_is_deterministic() {
        let plane = Mask::from_fn(16, 16, |x, y| (x * 7 + y * 3) % 5 == 0);
        assert_eq!(split_components(&plane), split_components(&plane));
    }
}
