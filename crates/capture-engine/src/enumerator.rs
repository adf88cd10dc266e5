//! Camera discovery.

use serde::{Deserialize, Serialize};

use crate::backend::{CameraBackend, CaptureFormat};
use crate::source::CameraSource;

/// Default number of device indices probed.
pub const DEFAULT_PROBE_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Usable,
    Unusable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub index: u32,
    pub status: CameraStatus,
}

impl CameraDescriptor {
    pub fn usable(index: u32) -> Self {
        Self {
            index,
            status: CameraStatus::Usable,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == CameraStatus::Usable
    }
}

/// Cameras verified usable at discovery time, in discovery order.
///
/// A roster is a snapshot. Device availability changes underneath it, so it
/// is rebuilt by enumerating again rather than patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRoster {
    descriptors: Vec<CameraDescriptor>,
}

impl CameraRoster {
    /// Roster from known indices, all marked usable. Duplicates are dropped.
    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut descriptors: Vec<CameraDescriptor> = Vec::new();
        for index in indices {
            if !descriptors.iter().any(|d| d.index == index) {
                descriptors.push(CameraDescriptor::usable(index));
            }
        }
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[CameraDescriptor] {
        &self.descriptors
    }

    pub fn indices(&self) -> Vec<u32> {
        self.descriptors.iter().map(|d| d.index).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn first(&self) -> Option<u32> {
        self.descriptors.first().map(|d| d.index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.position(index).is_some()
    }

    pub fn position(&self, index: u32) -> Option<usize> {
        self.descriptors.iter().position(|d| d.index == index)
    }

    /// Entries still eligible for failover.
    pub fn usable_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_usable()).count()
    }

    pub(crate) fn get(&self, position: usize) -> Option<&CameraDescriptor> {
        self.descriptors.get(position)
    }

    pub(crate) fn mark_unusable(&mut self, index: u32) {
        if let Some(d) = self.descriptors.iter_mut().find(|d| d.index == index) {
            d.status = CameraStatus::Unusable;
        }
    }

    /// Append a camera found outside enumeration. It is tried last in a
    /// failover pass that starts from the front.
    pub(crate) fn adopt(&mut self, index: u32) {
        if !self.contains(index) {
            self.descriptors.push(CameraDescriptor::usable(index));
        }
    }
}

/// Probes device indices `0..probe_limit`.
pub struct CameraEnumerator<'a> {
    backend: &'a dyn CameraBackend,
    probe_limit: u32,
    format: CaptureFormat,
}

impl<'a> CameraEnumerator<'a> {
    pub fn new(backend: &'a dyn CameraBackend, probe_limit: u32, format: CaptureFormat) -> Self {
        Self {
            backend,
            probe_limit,
            format,
        }
    }

    /// Build a roster of every index that opens and returns one frame.
    ///
    /// Each probe handle is released before the next index is tried. No
    /// usable camera yields an empty roster.
    pub fn enumerate(&self) -> CameraRoster {
        let mut descriptors = Vec::new();

        for index in 0..self.probe_limit {
            match CameraSource::open(self.backend, index, &self.format) {
                Ok(mut source) => {
                    source.close();
                    descriptors.push(CameraDescriptor::usable(index));
                }
                Err(e) => {
                    tracing::debug!(camera = index, error = %e, "Probe failed");
                }
            }
        }

        tracing::info!(
            backend = self.backend.name(),
            probed = self.probe_limit,
            found = descriptors.len(),
            "Camera enumeration complete"
        );
        CameraRoster { descriptors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DevicePlan, SyntheticBackend};

    #[test]
    fn no_devices_gives_empty_roster() {
        let backend = SyntheticBackend::new();
        let roster = CameraEnumerator::new(&backend, DEFAULT_PROBE_LIMIT, CaptureFormat::default())
            .enumerate();
        assert!(roster.is_empty());
        assert_eq!(roster.first(), None);
    }

    #[test]
    fn only_readable_devices_are_listed_in_order() {
        let backend = SyntheticBackend::new()
            .with_device(3, DevicePlan::Healthy)
            .with_device(0, DevicePlan::Unreadable)
            .with_device(1, DevicePlan::Healthy)
            .with_device(2, DevicePlan::Unopenable)
            .with_device(4, DevicePlan::FailAfter(1));

        let roster = CameraEnumerator::new(&backend, 5, CaptureFormat::default()).enumerate();
        assert_eq!(roster.indices(), vec![1, 3, 4]);
        assert!(roster.descriptors().iter().all(|d| d.is_usable()));
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn probe_limit_bounds_the_search() {
        let backend = SyntheticBackend::new().with_device(7, DevicePlan::Healthy);
        let roster = CameraEnumerator::new(&backend, 5, CaptureFormat::default()).enumerate();
        assert!(roster.is_empty());
    }

    #[test]
    fn from_indices_drops_duplicates() {
        let roster = CameraRoster::from_indices([2, 0, 2]);
        assert_eq!(roster.indices(), vec![2, 0]);
        assert_eq!(roster.position(0), Some(1));
    }

    #[test]
    fn unusable_entries_leave_the_usable_count() {
        let mut roster = CameraRoster::from_indices([0, 1, 2]);
        roster.mark_unusable(1);
        roster.mark_unusable(9);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.usable_count(), 2);
    }

    #[test]
    fn adopted_camera_goes_last_once() {
        let mut roster = CameraRoster::from_indices([0, 1]);
        roster.adopt(4);
        roster.adopt(4);
        roster.adopt(0);
        assert_eq!(roster.indices(), vec![0, 1, 4]);
        assert_eq!(roster.usable_count(), 3);
    }
}
