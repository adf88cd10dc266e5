//! Person counting over model output.

use eduvision_common::config::DetectionDefaults;
use eduvision_common::error::EduvisionResult;
use eduvision_common::frame::Frame;

use crate::annotate::Annotator;
use crate::model::{Detection, DetectionModel};

/// Default minimum confidence (exclusive).
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Whether a detection is counted: a person scoring strictly above `threshold`.
pub fn is_counted(detection: &Detection, threshold: f32) -> bool {
    detection.is_person() && detection.confidence > threshold
}

/// Number of detections that are people scoring strictly above `threshold`.
pub fn count_persons(detections: &[Detection], threshold: f32) -> usize {
    detections
        .iter()
        .filter(|d| is_counted(d, threshold))
        .count()
}

/// Wraps a detection model and turns frames into `(annotated frame, person count)`.
///
/// The only state that affects the count is the configured threshold; two
/// calls with the same model output always produce the same count.
pub struct DetectionEngine {
    model: Box<dyn DetectionModel>,
    threshold: f32,
    annotator: Annotator,
}

impl DetectionEngine {
    pub fn new(model: Box<dyn DetectionModel>) -> Self {
        Self {
            model,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            annotator: Annotator::new(),
        }
    }

    /// Build an engine from configuration, loading the label font if one is set.
    ///
    /// A font that fails to load is logged and labels fall back to confidence tabs.
    pub fn from_config(model: Box<dyn DetectionModel>, config: &DetectionDefaults) -> Self {
        let annotator = match &config.font_path {
            Some(path) => Annotator::from_font_file(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Label font unavailable; drawing boxes without text");
                Annotator::new()
            }),
            None => Annotator::new(),
        };
        Self::new(model)
            .with_threshold(config.confidence_threshold)
            .with_annotator(annotator)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Run detection on `frame`, draw the counted detections onto it, and
    /// return it with the person count.
    pub fn process(&mut self, mut frame: Frame) -> EduvisionResult<(Frame, usize)> {
        let detections = self.model.infer(&frame)?;

        let mut count = 0;
        for (index, detection) in detections.iter().enumerate() {
            if !is_counted(detection, self.threshold) {
                continue;
            }
            count += 1;
            self.annotator.draw(&mut frame.image, detection, index);
        }

        tracing::trace!(
            model = self.model.name(),
            candidates = detections.len(),
            count,
            "Frame processed"
        );
        Ok((frame, count))
    }
}

impl std::fmt::Debug for DetectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionEngine")
            .field("model", &self.model.name())
            .field("threshold", &self.threshold)
            .field("annotator", &self.annotator)
            .finish()
    }
}
