// THEORY:
// Background frames come from field recordings that are read at random positions.
// A `FrameSource` is anything that can be opened, asked for its frame count and
// asked for frame `i`. `ImageSequence` is the stock implementation: a directory of
// frame images standing in for a decoded video.
//
// Key architectural principles:
// 1.  **Explicit open state**: the frame count of a closed source is an error, not
//     zero. `with_open` opens a source, runs the caller's logic and closes it again on
//     every exit path.
// 2.  **Caller-chosen read policy**: a single bad frame in a long recording should not
//     stop a dataset run, but a test wants to see the first failure. `ReadPolicy`
//     makes that choice explicit; `Retry` logs each failure and draws a new index.
// 3.  **Injected randomness**: the random index comes from the caller's generator.

use crate::error::{Result, StateError, SynthError};
use image::RgbImage;
use rand::{Rng, RngCore};
use serde::Deserialize;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What `random_read` does when a frame cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReadPolicy {
    /// Return the first failure.
    FailFast,
    /// Log and try another random frame, up to `max_attempts` reads in total.
    Retry { max_attempts: usize },
}

impl Default for ReadPolicy {
    fn default() -> Self {
        ReadPolicy::Retry { max_attempts: 16 }
    }
}

pub trait FrameSource: Send {
    fn name(&self) -> &str;
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn frame_count(&self) -> Result<usize, StateError>;
    fn read_frame(&mut self, index: usize) -> Result<RgbImage>;

    /// Reads a uniformly chosen frame, applying `policy` to read failures.
    fn random_read(&mut self, rng: &mut dyn RngCore, policy: ReadPolicy) -> Result<RgbImage> {
        let n_frame = self.frame_count()?;
        if n_frame == 0 {
            return Err(SynthError::FrameRead {
                source_name: self.name().to_string(),
                index: 0,
                reason: "source has no frames".to_string(),
            });
        }

        let max_attempts = match policy {
            ReadPolicy::FailFast => 1,
            ReadPolicy::Retry { max_attempts } => max_attempts.max(1),
        };
        let mut attempt = 1;
        loop {
            let index = rng.random_range(0..n_frame);
            match self.read_frame(index) {
                Ok(frame) => return Ok(frame),
                Err(e) if attempt < max_attempts => {
                    warn!(source = self.name(), index, attempt, error = %e, "frame read failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Keeps a source open until dropped.
pub struct OpenSource<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> OpenSource<'a, S> {
    pub fn new(source: &'a mut S) -> Result<Self> {
        source.open()?;
        Ok(Self { source })
    }
}

impl<S: FrameSource + ?Sized> Deref for OpenSource<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.source
    }
}

impl<S: FrameSource + ?Sized> DerefMut for OpenSource<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.source
    }
}

impl<S: FrameSource + ?Sized> Drop for OpenSource<'_, S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

/// Opens `source`, runs `f` and closes the source whatever `f` returns.
pub fn with_open<S, T>(source: &mut S, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T>
where
    S: FrameSource + ?Sized,
{
    let mut opened = OpenSource::new(source)?;
    f(&mut *opened)
}

/// A directory of frame images, ordered by file name.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    dir: PathBuf,
    name: String,
    frames: Option<Vec<PathBuf>>,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self { dir, name, frames: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every subdirectory of `dir` that holds frames, as one sequence each.
    pub fn discover(dir: &Path) -> Result<Vec<Self>> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs.into_iter().map(Self::new).collect())
    }
}

impl FrameSource for ImageSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.frames.is_some() {
            return Ok(());
        }
        let mut frames: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
            .collect();
        frames.sort();
        debug!(source = %self.name, frames = frames.len(), "image sequence opened");
        self.frames = Some(frames);
        Ok(())
    }

    fn close(&mut self) {
        self.frames = None;
    }

    fn is_open(&self) -> bool {
        self.frames.is_some()
    }

    fn frame_count(&self) -> Result<usize, StateError> {
        self.frames
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| StateError::NotOpened(self.name.clone()))
    }

    fn read_frame(&mut self, index: usize) -> Result<RgbImage> {
        let frames = self.frames.as_ref().ok_or_else(|| StateError::NotOpened(self.name.clone()))?;
        let path = frames.get(index).ok_or_else(|| SynthError::FrameRead {
            source_name: self.name.clone(),
            index,
            reason: format!("only {} frames", frames.len()),
        })?;
        image::open(path)
            .map(|frame| frame.to_rgb8())
            .map_err(|e| SynthError::FrameRead {
                source_name: self.name.clone(),
                index,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sequence_dir(n_good: u8, corrupt: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..n_good {
            RgbImage::from_pixel(8, 6, Rgb([i, i, i]))
                .save(dir.path().join(format!("frame_{i:03}.png")))
                .unwrap();
        }
        if corrupt {
            fs::write(dir.path().join("frame_999.png"), b"not a png").unwrap();
        }
        dir
    }

    #[test]
    fn closed_source_has_no_frame_count() {
        let dir = sequence_dir(3, false);
        let mut source = ImageSequence::new(dir.path());
        assert!(matches!(source.frame_count(), Err(StateError::NotOpened(_))));
        source.open().unwrap();
        assert_eq!(source.frame_count().unwrap(), 3);
        source.close();
        assert!(!source.is_open());
    }

    #[test]
    fn with_open_closes_on_every_exit() {
        let dir = sequence_dir(2, false);
        let mut source = ImageSequence::new(dir.path());
        let frame = with_open(&mut source, |s| s.read_frame(1)).unwrap();
        assert_eq!(frame.get_pixel(0, 0), &Rgb([1, 1, 1]));
        assert!(!source.is_open());

        let failed = with_open(&mut source, |s| s.read_frame(7));
        assert!(matches!(failed, Err(SynthError::FrameRead { index: 7, .. })));
        assert!(!source.is_open());
    }

    #[test]
    fn fail_fast_surfaces_the_first_bad_frame() {
        let dir = sequence_dir(0, true);
        let mut source = ImageSequence::new(dir.path());
        source.open().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(source.random_read(&mut rng, ReadPolicy::FailFast).is_err());
    }

    #[test]
    fn retry_skips_bad_frames() {
        let dir = sequence_dir(1, true);
        let mut source = ImageSequence::new(dir.path());
        source.open().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..10 {
            let frame = source
                .random_read(&mut rng, ReadPolicy::Retry { max_attempts: 64 })
                .unwrap();
            assert_eq!(frame.dimensions(), (8, 6));
        }
    }

    #[test]
    fn retry_gives_up_after_the_attempt_budget() {
        let dir = sequence_dir(0, true);
        let mut source = ImageSequence::new(dir.path());
        source.open().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let err = source
            .random_read(&mut rng, ReadPolicy::Retry { max_attempts: 3 })
            .unwrap_err();
        assert!(matches!(err, SynthError::FrameRead { .. }));
    }
}
