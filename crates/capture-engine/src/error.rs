//! Camera and worker error types.

use eduvision_common::error::EduvisionError;
use thiserror::Error;

/// Failure of a single camera device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// The device could not be opened at all.
    #[error("Camera {index} could not be opened: {reason}")]
    Unopenable { index: u32, reason: String },

    /// The device opened but the verification read produced no frame.
    #[error("Camera {index} opened but returned no frame")]
    Unreadable { index: u32 },

    /// A mid-stream read failed (disconnect, end of stream, driver error).
    #[error("Read from camera {index} failed: {reason}")]
    ReadFailed { index: u32, reason: String },
}

impl CameraError {
    pub fn index(&self) -> u32 {
        match self {
            Self::Unopenable { index, .. }
            | Self::Unreadable { index }
            | Self::ReadFailed { index, .. } => *index,
        }
    }

    pub fn unopenable(index: u32, reason: impl Into<String>) -> Self {
        Self::Unopenable {
            index,
            reason: reason.into(),
        }
    }

    pub fn read_failed(index: u32, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            index,
            reason: reason.into(),
        }
    }
}

/// Failure reported by the capture worker.
///
/// Cloneable so it can be carried in published terminal events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Enumeration found no usable camera.
    #[error("No camera available")]
    NoCameraAvailable,

    /// Every roster entry was tried and none could be opened and read.
    #[error("All cameras failed (tried {attempted:?})")]
    RosterExhausted { attempted: Vec<u32> },

    /// The operation is not valid in the worker's current state.
    #[error("Invalid worker state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl From<CameraError> for EduvisionError {
    fn from(err: CameraError) -> Self {
        EduvisionError::capture(err.to_string())
    }
}

impl From<CaptureError> for EduvisionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NoCameraAvailable => {
                EduvisionError::no_camera("enumeration found no usable camera")
            }
            other => EduvisionError::capture(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_error_reports_its_index() {
        assert_eq!(CameraError::unopenable(3, "busy").index(), 3);
        assert_eq!(CameraError::Unreadable { index: 1 }.index(), 1);
        assert_eq!(CameraError::read_failed(7, "eos").index(), 7);
    }

    #[test]
    fn no_camera_maps_to_no_camera_variant() {
        let err: EduvisionError = CaptureError::NoCameraAvailable.into();
        assert!(matches!(err, EduvisionError::NoCamera { .. }));
    }

    #[test]
    fn exhaustion_lists_attempted_indices() {
        let err = CaptureError::RosterExhausted {
            attempted: vec![0, 2],
        };
        assert_eq!(err.to_string(), "All cameras failed (tried [0, 2])");
    }
}
