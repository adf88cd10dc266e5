use std::time::Duration;

use eduvision_common::config::{CameraBackendKind, CameraDefaults};
use eduvision_common::error::EduvisionResult;
use eduvision_common::frame::Frame;

use crate::error::CameraError;

/// Requested capture format. Devices may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// How long a single read may block before it counts as failed.
    pub read_timeout: Duration,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            read_timeout: Duration::from_millis(2000),
        }
    }
}

impl From<&CameraDefaults> for CaptureFormat {
    fn from(config: &CameraDefaults) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

/// An open camera handle.
pub trait CameraDevice: Send {
    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame, CameraError>;

    /// Release the OS handle. Must be safe to call more than once.
    fn release(&mut self);
}

/// Opens camera devices by index.
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the device at `index`, applying `format` on a best-effort basis.
    fn open(&self, index: u32, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>, CameraError>;
}

#[cfg(feature = "gstreamer")]
pub mod gstreamer;
pub mod synthetic;

#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GstreamerBackend;
pub use synthetic::{DevicePlan, SyntheticBackend};

/// Build the backend selected in configuration.
pub fn backend_for(kind: CameraBackendKind) -> EduvisionResult<Box<dyn CameraBackend>> {
    match kind {
        CameraBackendKind::Synthetic => Ok(Box::new(SyntheticBackend::demo())),
        #[cfg(feature = "gstreamer")]
        CameraBackendKind::Gstreamer => Ok(Box::new(GstreamerBackend::new())),
        #[cfg(not(feature = "gstreamer"))]
        CameraBackendKind::Gstreamer => Err(eduvision_common::error::EduvisionError::unsupported(
            "GStreamer camera backend not compiled in (enable the `gstreamer` feature)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_camera_config() {
        let config = CameraDefaults {
            width: 320,
            height: 240,
            fps: 15,
            read_timeout_ms: 500,
            ..CameraDefaults::default()
        };
        let format = CaptureFormat::from(&config);
        assert_eq!((format.width, format.height, format.fps), (320, 240, 15));
        assert_eq!(format.read_timeout, Duration::from_millis(500));
    }

    #[test]
    fn synthetic_backend_is_always_available() {
        let backend = backend_for(CameraBackendKind::Synthetic).unwrap();
        assert_eq!(backend.name(), "synthetic");
    }
}
