use std::time::Duration;

use penumbra_common::UnitRangeError;

use crate::program::ProgramKind;

/// Errors raised by the render core and its backends.
///
/// Configuration-time violations surface here immediately. Per-renderable
/// anomalies during a frame are logged and skipped instead.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    OutOfRange(#[from] UnitRangeError),
    #[error("scissor rectangle must lie inside the viewport rectangle")]
    ScissorOutsideViewport,
    #[error("invalid texture unit {unit}: device exposes {available} units")]
    InvalidTextureUnit { unit: u32, available: u32 },
    #[error("no texture bound at unit {0}")]
    EmptyTextureUnit(u32),
    #[error("shader program already exists: {0:?}")]
    ProgramExists(ProgramKind),
    #[error("shader program does not exist: {0:?}")]
    ProgramMissing(ProgramKind),
    #[error("render context not ready after {0:?}")]
    ContextTimeout(Duration),
    #[error("frame not completed within {0:?}")]
    FrameTimeout(Duration),
    #[error("render system not initialized")]
    NotInitialized,
    #[error("viewport index {0} out of bounds")]
    NoSuchViewport(usize),
    #[error("GPU device error: {0}")]
    Device(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading or validating a [`crate::RenderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
