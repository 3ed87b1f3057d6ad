// THEORY:
// Field recordings and the stills taken from them follow one naming scheme:
// `<stem>_<MMSS>.<ext>`, where `MMSS` is the position in the recording. Files
// without a time part are still accepted as `<stem>.<ext>`.
//
// The two patterns are tried in that order, so `orchard_0130.png` is read as stem
// `orchard` at 01:30 and never as stem `orchard_0130`.

use crate::error::ValidationError;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static TIMED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)_(\d{4})(\..+)$").expect("valid timed file name regex"));
static PLAIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)(\..+)$").expect("valid plain file name regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameParts {
    pub stem: String,
    /// The raw `MMSS` group, if present.
    pub time: Option<String>,
    /// Includes the leading dot.
    pub extension: String,
}

impl FileNameParts {
    /// Position in the recording. Minutes run 00-59 and seconds 00-61 (leap
    /// seconds, as `strptime` allows).
    pub fn timestamp(&self) -> Result<Duration, ValidationError> {
        let time = self
            .time
            .as_deref()
            .ok_or_else(|| ValidationError::InvalidTimestamp(format!("{}{}", self.stem, self.extension)))?;
        let invalid = || ValidationError::InvalidTimestamp(time.to_string());
        let minutes: u64 = time.get(..2).and_then(|m| m.parse().ok()).ok_or_else(invalid)?;
        let seconds: u64 = time.get(2..).and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        if minutes > 59 || seconds > 61 {
            return Err(invalid());
        }
        Ok(Duration::from_secs(minutes * 60 + seconds))
    }
}

/// Splits the file name of `path` into stem, optional `MMSS` time and extension.
pub fn parse_file_name(path: &Path) -> Result<FileNameParts, ValidationError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ValidationError::InvalidFileName(path.display().to_string()))?;

    if let Some(caps) = TIMED_NAME.captures(file_name) {
        return Ok(FileNameParts {
            stem: caps[1].to_string(),
            time: Some(caps[2].to_string()),
            extension: caps[3].to_string(),
        });
    }
    if let Some(caps) = PLAIN_NAME.captures(file_name) {
        return Ok(FileNameParts {
            stem: caps[1].to_string(),
            time: None,
            extension: caps[2].to_string(),
        });
    }
    Err(ValidationError::InvalidFileName(file_name.to_string()))
}
