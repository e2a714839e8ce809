use thiserror::Error;

/// Errors that can occur in the inspection pipeline
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(&'static str),

    #[error("not found")]
    NotFound,

    #[error("pattern compile error: {0}")]
    CompileError(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("filter rejected: {0}")]
    FilterInvalid(String),

    #[error("capture is not running")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, InspectError>;
