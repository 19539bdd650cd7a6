use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the vision engine. Tracking outcomes such as "no match"
/// or "no self" are never errors.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Frame is {actual_width}x{actual_height}, pipeline expects {expected_width}x{expected_height}.")]
    FrameSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("Frame buffer holds {actual} pixels but {width}x{height} needs {expected}.")]
    FrameBufferLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Palette is full, colour {0:?} cannot be indexed.")]
    PaletteExhausted([u8; 3]),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Malformed mask file {path:?}: {reason}")]
    MalformedMask { path: PathBuf, reason: String },
    #[error("No live object with id {0}.")]
    MissingObject(u64),
    #[error("Unknown action index {0}.")]
    UnknownAction(u8),
    #[error("Pool runs {expected} instances but got {actual} inputs.")]
    InstanceCount { expected: usize, actual: usize },
    #[error("Pipeline worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VisionError>;
