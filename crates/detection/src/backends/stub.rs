use eduvision_common::error::EduvisionResult;
use eduvision_common::frame::Frame;

use crate::model::{Detection, DetectionModel};

/// Model that reports the same detections for every frame.
///
/// Used in tests and when no model file is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticModel {
    detections: Vec<Detection>,
}

impl StaticModel {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// A model that never sees anything.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl DetectionModel for StaticModel {
    fn name(&self) -> &'static str {
        "static"
    }

    fn infer(&mut self, _frame: &Frame) -> EduvisionResult<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}
