//! EduVision Capture Engine
//!
//! Owns the cameras. Discovers which device indices work, keeps one of them
//! open on a background thread, runs every frame through detection, and
//! publishes results without ever blocking on the consumer. When a camera
//! dies mid-stream the worker fails over to the next one in the roster.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   roster   ┌───────────────────────────────────┐
//! │ CameraEnumerator │ ─────────▶ │          CaptureWorker            │
//! └──────────────────┘            │  ┌──────────────┐  ┌───────────┐  │
//!          │ probe                │  │ CameraSource │─▶│ Detection │  │
//!          ▼                      │  └──────┬───────┘  │  Engine   │  │
//! ┌──────────────────┐   open     │         │ failover └─────┬─────┘  │
//! │  CameraBackend   │ ◀───────── │         ▼                ▼        │
//! │ (gstreamer/synth)│            │   next roster entry   publish     │
//! └──────────────────┘            └──────────────────────────┬────────┘
//!                                                            ▼
//!                                     broadcast events + latest result
//! ```

pub mod backend;
pub mod enumerator;
pub mod error;
pub mod source;
pub mod worker;

pub use backend::{backend_for, CameraBackend, CameraDevice, CaptureFormat};
pub use enumerator::{CameraDescriptor, CameraEnumerator, CameraRoster, CameraStatus};
pub use error::{CameraError, CaptureError};
pub use source::CameraSource;
pub use worker::{
    CaptureWorker, DetectionResult, SwitchReason, WorkerConfig, WorkerEvent, WorkerState,
    WorkerStats,
};
