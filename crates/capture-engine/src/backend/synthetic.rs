//! In-process camera backend producing test-pattern frames.
//!
//! Each device index follows a [`DevicePlan`]; indices without a plan do not
//! exist. Open handles are counted so tests can assert nothing leaks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use eduvision_common::frame::Frame;
use image::{Rgb, RgbImage};

use super::{CameraBackend, CameraDevice, CaptureFormat};
use crate::error::CameraError;

/// Behavior of one synthetic device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePlan {
    /// Opens and reads forever.
    Healthy,
    /// Refuses to open.
    Unopenable,
    /// Opens, but every read fails.
    Unreadable,
    /// Each handle delivers this many frames, then every further read fails.
    FailAfter(u32),
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    plans: HashMap<u32, DevicePlan>,
    frame_interval: Option<Duration>,
    handles: Arc<Mutex<HashMap<u32, usize>>>,
}

impl SyntheticBackend {
    /// A backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Two healthy cameras paced at roughly 30 fps.
    pub fn demo() -> Self {
        Self::new()
            .with_device(0, DevicePlan::Healthy)
            .with_device(1, DevicePlan::Healthy)
            .with_frame_interval(Duration::from_millis(33))
    }

    pub fn with_device(mut self, index: u32, plan: DevicePlan) -> Self {
        self.plans.insert(index, plan);
        self
    }

    /// Sleep this long inside every read, like a real device waiting on the sensor.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Number of handles currently open across all indices.
    pub fn open_handles(&self) -> usize {
        lock(&self.handles).values().sum()
    }

    pub fn is_open(&self, index: u32) -> bool {
        lock(&self.handles).get(&index).copied().unwrap_or(0) > 0
    }
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, index: u32, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>, CameraError> {
        let plan = match self.plans.get(&index) {
            None => return Err(CameraError::unopenable(index, "no such device")),
            Some(DevicePlan::Unopenable) => {
                return Err(CameraError::unopenable(index, "device busy"))
            }
            Some(plan) => *plan,
        };

        *lock(&self.handles).entry(index).or_insert(0) += 1;
        tracing::trace!(camera = index, ?plan, "Synthetic device opened");

        Ok(Box::new(SyntheticDevice {
            index,
            plan,
            width: format.width.max(1),
            height: format.height.max(1),
            frame_interval: self.frame_interval,
            reads: 0,
            released: false,
            handles: Arc::clone(&self.handles),
        }))
    }
}

struct SyntheticDevice {
    index: u32,
    plan: DevicePlan,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    reads: u32,
    released: bool,
    handles: Arc<Mutex<HashMap<u32, usize>>>,
}

impl SyntheticDevice {
    fn pattern(&self) -> RgbImage {
        let shift = self.reads.wrapping_mul(4);
        let tint = (self.index.wrapping_mul(60) % 256) as u8;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                tint,
            ])
        })
    }
}

impl CameraDevice for SyntheticDevice {
    fn read(&mut self) -> Result<Frame, CameraError> {
        if self.released {
            return Err(CameraError::read_failed(self.index, "device released"));
        }
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        match self.plan {
            DevicePlan::Unreadable => {
                return Err(CameraError::read_failed(self.index, "no signal"));
            }
            DevicePlan::FailAfter(limit) if self.reads >= limit => {
                return Err(CameraError::read_failed(self.index, "device disconnected"));
            }
            _ => {}
        }

        let image = self.pattern();
        self.reads += 1;
        Ok(Frame::new(image, self.index))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut handles = lock(&self.handles);
        if let Some(count) = handles.get_mut(&self.index) {
            *count = count.saturating_sub(1);
        }
        tracing::trace!(camera = self.index, "Synthetic device released");
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> CaptureFormat {
        CaptureFormat {
            width: 8,
            height: 6,
            ..CaptureFormat::default()
        }
    }

    #[test]
    fn missing_and_unopenable_devices_fail_to_open() {
        let backend = SyntheticBackend::new().with_device(1, DevicePlan::Unopenable);
        assert!(matches!(
            backend.open(0, &format()),
            Err(CameraError::Unopenable { index: 0, .. })
        ));
        assert!(matches!(
            backend.open(1, &format()),
            Err(CameraError::Unopenable { index: 1, .. })
        ));
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn frames_use_requested_size() {
        let backend = SyntheticBackend::new().with_device(0, DevicePlan::Healthy);
        let mut device = backend.open(0, &format()).unwrap();
        let frame = device.read().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.camera_index, 0);
    }

    #[test]
    fn fail_after_limits_each_handle() {
        let backend = SyntheticBackend::new().with_device(2, DevicePlan::FailAfter(2));
        let mut first = backend.open(2, &format()).unwrap();
        assert!(first.read().is_ok());
        assert!(first.read().is_ok());
        assert!(matches!(first.read(), Err(CameraError::ReadFailed { index: 2, .. })));

        let mut second = backend.open(2, &format()).unwrap();
        assert!(second.read().is_ok());
    }

    #[test]
    fn handles_are_counted_until_released_or_dropped() {
        let backend = SyntheticBackend::new().with_device(0, DevicePlan::Healthy);
        let mut a = backend.open(0, &format()).unwrap();
        let b = backend.open(0, &format()).unwrap();
        assert_eq!(backend.open_handles(), 2);

        a.release();
        a.release();
        assert_eq!(backend.open_handles(), 1);
        assert!(backend.is_open(0));

        drop(b);
        assert_eq!(backend.open_handles(), 0);
        assert!(!backend.is_open(0));
        assert!(a.read().is_err());
    }
}
