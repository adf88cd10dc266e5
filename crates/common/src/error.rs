//! Error types shared across EduVision crates.

use std::path::PathBuf;

/// Top-level error type for EduVision operations.
#[derive(Debug, thiserror::Error)]
pub enum EduvisionError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("No camera available: {message}")]
    NoCamera { message: String },

    #[error("Detection error: {message}")]
    Detection { message: String },

    #[error("Automation error: {message}")]
    Automation { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using EduvisionError.
pub type EduvisionResult<T> = Result<T, EduvisionError>;

impl EduvisionError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn no_camera(msg: impl Into<String>) -> Self {
        Self::NoCamera {
            message: msg.into(),
        }
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection {
            message: msg.into(),
        }
    }

    pub fn automation(msg: impl Into<String>) -> Self {
        Self::Automation {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
