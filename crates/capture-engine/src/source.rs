//! A single open camera.

use eduvision_common::frame::Frame;

use crate::backend::{CameraBackend, CameraDevice, CaptureFormat};
use crate::error::CameraError;

/// One camera device, verified readable at open time.
///
/// The device is released by [`CameraSource::close`] or on drop, whichever
/// comes first.
pub struct CameraSource {
    index: u32,
    device: Option<Box<dyn CameraDevice>>,
}

impl CameraSource {
    /// Open the device at `index` and perform one verification read.
    ///
    /// A device that opens but cannot deliver a frame is released before
    /// returning [`CameraError::Unreadable`].
    pub fn open(
        backend: &dyn CameraBackend,
        index: u32,
        format: &CaptureFormat,
    ) -> Result<Self, CameraError> {
        let mut device = backend.open(index, format)?;

        match device.read() {
            Ok(frame) if !frame.is_empty() => {}
            Ok(_) => {
                device.release();
                tracing::debug!(camera = index, "Verification read returned an empty frame");
                return Err(CameraError::Unreadable { index });
            }
            Err(e) => {
                device.release();
                tracing::debug!(camera = index, error = %e, "Verification read failed");
                return Err(CameraError::Unreadable { index });
            }
        }

        tracing::debug!(camera = index, backend = backend.name(), "Camera opened");
        Ok(Self {
            index,
            device: Some(device),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Pull the next frame.
    pub fn read(&mut self) -> Result<Frame, CameraError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CameraError::read_failed(self.index, "source is closed"))?;
        let frame = device.read()?;
        if frame.is_empty() {
            return Err(CameraError::read_failed(self.index, "empty frame"));
        }
        Ok(frame)
    }

    /// Release the device. No-op if already closed.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            tracing::debug!(camera = self.index, "Camera closed");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("index", &self.index)
            .field("open", &self.is_open())
            .finish()
    }
}
