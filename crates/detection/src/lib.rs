//! EduVision Detection
//!
//! Turns raw camera frames into an annotated frame plus a person count.
//!
//! - **Model contract:** [`DetectionModel`] is the seam to the object
//!   detector. It returns every candidate box with a confidence and a
//!   class id; filtering happens here, not in the model.
//! - **Engine:** [`DetectionEngine`] keeps detections with
//!   `class == person && confidence > threshold`, draws them, and
//!   reports how many survived.
//! - **Backends:** [`StaticModel`] for tests and demos, and a YOLOv8
//!   ONNX model on `tract` behind the `backend-tract` feature.

pub mod annotate;
pub mod backends;
pub mod engine;
pub mod model;

pub use annotate::Annotator;
pub use backends::StaticModel;
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloModel;
pub use engine::{count_persons, DetectionEngine, DEFAULT_CONFIDENCE_THRESHOLD};
pub use model::{class_name, BoundingBox, Detection, DetectionModel, PERSON_CLASS_ID};
