// THEORY:
// The dataset builder is driven by one TOML file. Everything that shapes the data
// (class list, where the stills and masks live, how many frames to synthesize, the
// augmentation ranges, the synthesis heuristics) lives there so a dataset can be
// regenerated from its config and seed alone. Only the seed and the worker count can
// be overridden on the command line.
//
// Relative paths are resolved against the directory of the config file.

use crate::core_modules::augmentation::ColorBlur;
use crate::core_modules::frame_source::ReadPolicy;
use crate::error::{Result, ValidationError};
use crate::pipeline::SynthesisConfig;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Class names, indexed by class id. Label map value `i + 1` is class `i`.
    pub classes: Vec<String>,
    /// Representative stills named `<stem>_<MMSS><extension>`.
    pub representative_dir: PathBuf,
    /// Label maps named `<image stem>.png`.
    pub mask_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// One subdirectory of frames per background recording.
    pub backgrounds_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_frames_per_pool")]
    pub frames_per_pool: usize,
    #[serde(default)]
    pub seed: u64,
    /// Also write images with the label boxes drawn on them.
    #[serde(default = "default_true")]
    pub preview: bool,
    /// Also write the rotation sweep of every representative image.
    #[serde(default = "default_true")]
    pub rotation_sweep: bool,
    #[serde(default)]
    pub read_policy: ReadPolicy,
    #[serde(default)]
    pub foreground_augmentation: ColorBlur,
    #[serde(default)]
    pub background_augmentation: ColorBlur,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

fn default_extension() -> String {
    ".png".to_string()
}

fn default_frames_per_pool() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl DatasetConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` and resolves every relative directory against its parent.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.classes.is_empty() {
            return Err(ValidationError::InvalidConfig("at least one class is required".to_string()));
        }
        if self.classes.len() > usize::from(u8::MAX) {
            return Err(ValidationError::InvalidConfig(format!(
                "{} classes do not fit in an 8-bit label map",
                self.classes.len()
            )));
        }
        self.foreground_augmentation.validate()?;
        self.background_augmentation.validate()?;
        let synthesis = &self.synthesis;
        if !synthesis.rotation.max_degrees.is_finite()
            || !synthesis.object_count_mean.is_finite()
            || !synthesis.object_count_std_dev.is_finite()
        {
            return Err(ValidationError::InvalidConfig(
                "rotation and object count parameters must be finite".to_string(),
            ));
        }
        if let Some(probabilities) = &self.synthesis.class_probabilities {
            if probabilities.len() != self.classes.len() {
                return Err(ValidationError::InvalidProbabilities(format!(
                    "{} probabilities for {} classes",
                    probabilities.len(),
                    self.classes.len()
                )));
            }
        }
        Ok(())
    }

    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths::under(&self.output_dir)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for dir in [
            &mut self.representative_dir,
            &mut self.mask_dir,
            &mut self.backgrounds_dir,
            &mut self.output_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

/// Output directory layout of a dataset run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub images: PathBuf,
    pub labels: PathBuf,
    pub labeled_images: PathBuf,
    pub domain_adaptation_images: PathBuf,
    pub domain_adaptation_labels: PathBuf,
    pub domain_adaptation_labeled_images: PathBuf,
}

impl OutputPaths {
    pub fn under(root: &Path) -> Self {
        let domain_adaptation = root.join("domain_adaptation");
        Self {
            images: root.join("images"),
            labels: root.join("labels"),
            labeled_images: root.join("labeled_images"),
            domain_adaptation_images: domain_adaptation.join("images"),
            domain_adaptation_labels: domain_adaptation.join("labels"),
            domain_adaptation_labeled_images: domain_adaptation.join("labeled_images"),
        }
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in [
            &self.images,
            &self.labels,
            &self.labeled_images,
            &self.domain_adaptation_images,
            &self.domain_adaptation_labels,
            &self.domain_adaptation_labeled_images,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
