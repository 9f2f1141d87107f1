use std::io;
use thiserror::Error;

/// Main error type for the streamer
#[derive(Error, Debug)]
pub enum Error {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// V4L2 capture engine error types
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture device {device}: {source}")]
    DeviceOpen { device: String, source: io::Error },

    #[error("device {device} does not support video capture")]
    NotACaptureDevice { device: String },

    #[error("failed to query device capabilities: {source}")]
    QueryCaps { source: io::Error },

    #[error("failed to set capture format: {source}")]
    SetFormat { source: io::Error },

    #[error("device returned pixel format {actual}, wanted {wanted}")]
    UnsupportedFormat { wanted: String, actual: String },

    #[error("failed to set up memory-mapped buffer ring: {source}")]
    StreamSetup { source: io::Error },

    #[error("failed to spawn capture thread: {source}")]
    ThreadSpawn { source: io::Error },

    #[error("capture engine is already running")]
    AlreadyRunning,
}

/// MJPEG streaming server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    BindFailed { address: String, source: io::Error },

    #[error("failed to create wake event: {source}")]
    EventSetup { source: io::Error },

    #[error("failed to spawn reactor thread: {source}")]
    ThreadSpawn { source: io::Error },

    #[error("server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
