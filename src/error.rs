use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Errors surfaced by the frame pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid frame geometry {width}x{height}: dimensions must be non-zero and even")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("{plane} plane too small: need {needed} bytes, got {actual}")]
    PlaneTooSmall {
        plane: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("engine failed to initialize (status {0})")]
    EngineInit(i32),

    #[error("engine rejected frame (status {0})")]
    EngineProcess(i32),

    #[error("in-flight frame did not complete within {0:?}")]
    DrainTimeout(Duration),

    #[error("pipeline is {actual:?}, expected {expected:?}")]
    WrongState {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
