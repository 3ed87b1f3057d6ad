// THEORY:
// Scoped substitution: swap an augmented copy into a representative image, let the
// caller composite from it, and put the pristine pixels back no matter how the
// caller's code exits.
//
// Key principles:
// 1.  **Acquisition installs**: a guard only exists once every precondition has been
//     checked (same size, not already substituted) and the replacement is in place.
//     A failed check installs nothing.
// 2.  **Release restores**: `Drop` restores the pristine image. It runs on normal
//     completion, on early return through `?`, and while unwinding from a panic.
// 3.  **Not reentrant by construction**: the guard holds the only `&mut` to its
//     target, so a second substitution cannot even be expressed while the first is
//     alive. If a guard is leaked with `mem::forget`, the target stays flagged and
//     the next substitution fails with `StateError::AlreadySubstituted`.
// 4.  **Read access while installed**: the guard derefs to its target, so objects
//     can be queried and placed through it.

use crate::core_modules::representative_image::RepresentativeImage;
use crate::core_modules::representative_pool::RepresentativePool;
use crate::error::{Result, ValidationError};
use image::RgbImage;
use std::ops::Deref;
use tracing::debug;

/// Guard for one representative image.
pub struct ImageSubstitution<'a> {
    target: &'a mut RepresentativeImage,
}

impl<'a> ImageSubstitution<'a> {
    /// The caller has already validated `replacement` with `check_substitute`.
    pub(crate) fn install(target: &'a mut RepresentativeImage, replacement: &RgbImage) -> Self {
        target.install_unchecked(replacement);
        Self { target }
    }
}

impl Deref for ImageSubstitution<'_> {
    type Target = RepresentativeImage;

    fn deref(&self) -> &Self::Target {
        self.target
    }
}

impl Drop for ImageSubstitution<'_> {
    fn drop(&mut self) {
        self.target.restore();
    }
}

/// Guard for every image of a pool at once.
pub struct PoolSubstitution<'a> {
    pool: &'a mut RepresentativePool,
}

impl<'a> PoolSubstitution<'a> {
    /// Checks the count and every replacement before touching any image, then
    /// installs all of them.
    pub fn install(pool: &'a mut RepresentativePool, replacements: &[RgbImage]) -> Result<Self> {
        if replacements.len() != pool.len() {
            return Err(ValidationError::SubstituteCount {
                expected: pool.len(),
                actual: replacements.len(),
            }
            .into());
        }
        for (rep_image, replacement) in pool.images().iter().zip(replacements) {
            rep_image.check_substitute(replacement)?;
        }
        for (rep_image, replacement) in pool.images_mut().iter_mut().zip(replacements) {
            rep_image.install_unchecked(replacement);
        }
        debug!(pool = pool.name(), images = replacements.len(), "substitutes installed");
        Ok(Self { pool })
    }
}

impl Deref for PoolSubstitution<'_> {
    type Target = RepresentativePool;

    fn deref(&self) -> &Self::Target {
        self.pool
    }
}

impl Drop for PoolSubstitution<'_> {
    fn drop(&mut self) {
        for rep_image in self.pool.images_mut() {
            rep_image.restore();
        }
        debug!(pool = self.pool.name(), "pristine images restored");
    }
}
