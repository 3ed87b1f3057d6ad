// THEORY:
// Every failure the engine can report falls into one of three families, and each
// family gets its own enum so callers can match on the kind of mistake they made:
//
// 1.  **ValidationError**: the caller handed over something malformed (a file name
//     that does not follow the naming scheme, an empty pool, an unknown class).
// 2.  **GeometryError**: the pixels do not allow the requested operation (an empty
//     mask has no box, a rotated object does not fit the canvas).
// 3.  **StateError**: an operation was attempted in the wrong state (reading from a
//     closed frame source, substituting an image twice, swapping in an image of the
//     wrong size).
//
// `SynthError` folds the three together with the I/O and decoding failures of the
// collaborators so that a whole synthesis run can be driven with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("an invalid file name \"{0}\" was given")]
    InvalidFileName(String),
    #[error("invalid MMSS timestamp \"{0}\"")]
    InvalidTimestamp(String),
    #[error("representative pool \"{0}\" has no representative images")]
    EmptyPool(String),
    #[error("representative pool \"{0}\" has no foreground objects")]
    NoObjects(String),
    #[error("invalid bounding box format \"{0}\"")]
    UnknownBboxFormat(String),
    #[error("unknown class name \"{0}\"")]
    UnknownClassName(String),
    #[error("class id {class_id} is out of range for {n_class} classes")]
    ClassOutOfRange { class_id: usize, n_class: usize },
    #[error("classwise mask has {planes} planes for {classes} classes")]
    ClassCountMismatch { planes: usize, classes: usize },
    #[error("invalid class probabilities: {0}")]
    InvalidProbabilities(String),
    #[error("invalid object count distribution: {0}")]
    InvalidObjectCount(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("expected {expected} substitute images, got {actual}")]
    SubstituteCount { expected: usize, actual: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("mask has no foreground pixels")]
    EmptyMask,
    #[error("degenerate bounding box (top {top}, bottom {bottom}, left {left}, right {right})")]
    DegenerateBox {
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
    },
    #[error(
        "object of size {object_width}x{object_height} does not fit on a {canvas_width}x{canvas_height} canvas"
    )]
    ObjectTooLarge {
        object_width: u32,
        object_height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },
    #[error("expected dimensions {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot get the number of frames from closed source \"{0}\"")]
    NotOpened(String),
    #[error("representative image \"{0}\" is already substituted")]
    AlreadySubstituted(String),
    #[error("cannot set an image of size {actual:?} in place of one of size {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to read frame {index} from \"{source_name}\": {reason}")]
    FrameRead {
        source_name: String,
        index: usize,
        reason: String,
    },
    #[error("worker pool failure: {0}")]
    WorkerPool(&'static str),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

pub type Result<T, E = SynthError> = std::result::Result<T, E>;
