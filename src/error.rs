//! Error types for the processing core.

use thiserror::Error;

/// Error type for server-side processing operations.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid plugin id: {0}")]
    InvalidPluginId(String),

    #[error("failed loading plugin {id}: {reason}")]
    LoadFailed { id: String, reason: String },

    #[error("failed to find a working I/O configuration for {name}")]
    NoSupportedLayout { name: String },

    #[error("buffer has not enough channels: needed {needed}, got {got}")]
    ChannelMismatch { needed: usize, got: usize },

    #[error("frame exceeds maximum size: {0} bytes")]
    FrameTooLarge(usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ServerError>;
