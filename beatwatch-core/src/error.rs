use thiserror::Error;

/// All errors produced by beatwatch-core.
///
/// Everything here is an initialization or API-misuse failure. Runtime
/// transport errors end the run gracefully instead, and rejected audio
/// buffers are only counted.
#[derive(Debug, Error)]
pub enum BeatError {
    #[error("failed to open log file {path}: {source}")]
    LogOpen {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no default input device found")]
    NoInputDevice,

    #[error("failed to create stream: {0}")]
    StreamCreate(String),

    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    #[error("failed to connect stream: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a shutdown coordinator is already installed in this process")]
    ShutdownAlreadyInstalled,

    #[error("detector is not initialized")]
    NotInitialized,

    #[error("detector is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BeatError>;
