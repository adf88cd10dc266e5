//! Subcommand implementations and the wiring they share.

pub mod cameras;
pub mod monitor;
pub mod schedule;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use eduvision_automation::OccupancyReading;
use eduvision_capture_engine::{
    backend_for, CameraBackend, CaptureError, CaptureWorker, DetectionResult, WorkerConfig,
    WorkerEvent,
};
use eduvision_common::config::AppConfig;
use eduvision_detection::{DetectionEngine, DetectionModel, StaticModel};
use tokio::sync::broadcast::{self, error::RecvError};

/// Camera backend selected in `config`.
pub fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn CameraBackend>> {
    let backend = backend_for(config.camera.backend)?;
    tracing::debug!(backend = backend.name(), "Camera backend ready");
    Ok(Arc::from(backend))
}

/// Detection engine for the configured model and threshold.
pub fn build_engine(config: &AppConfig) -> anyhow::Result<DetectionEngine> {
    let model = load_model(config)?;
    let engine = DetectionEngine::from_config(model, &config.detection);
    tracing::info!(
        model = engine.model_name(),
        threshold = engine.threshold(),
        "Detection engine ready"
    );
    Ok(engine)
}

#[cfg(feature = "tract")]
fn load_model(config: &AppConfig) -> anyhow::Result<Box<dyn DetectionModel>> {
    match &config.detection.model_path {
        Some(path) => {
            let model = eduvision_detection::TractYoloModel::new(
                path,
                config.detection.input_size,
                config.detection.iou_threshold,
            )
            .with_context(|| format!("Failed to load detection model {}", path.display()))?;
            Ok(Box::new(model))
        }
        None => Ok(placeholder_model()),
    }
}

#[cfg(not(feature = "tract"))]
fn load_model(config: &AppConfig) -> anyhow::Result<Box<dyn DetectionModel>> {
    if let Some(path) = &config.detection.model_path {
        anyhow::bail!(
            "Cannot load {}: this build has no ONNX support (rebuild with the `tract` feature)",
            path.display()
        );
    }
    Ok(placeholder_model())
}

fn placeholder_model() -> Box<dyn DetectionModel> {
    tracing::warn!("No detection model configured; every frame will count zero people");
    Box::new(StaticModel::empty())
}

/// Worker wired to the configured backend and engine, not yet started.
pub fn build_worker(config: &AppConfig) -> anyhow::Result<CaptureWorker> {
    Ok(CaptureWorker::new(
        build_backend(config)?,
        build_engine(config)?,
        WorkerConfig::from(config),
    ))
}

/// Stop the worker without stalling the runtime while its thread joins.
///
/// Needs the multi-threaded runtime.
pub fn stop_worker(worker: &mut CaptureWorker) {
    tokio::task::block_in_place(|| worker.stop());
}

/// Occupancy as of the moment the counted frame was captured.
pub fn reading_from(result: &DetectionResult) -> OccupancyReading {
    OccupancyReading {
        people_count: result.person_count,
        camera_index: Some(result.camera_index),
        captured_at: result.frame.captured_at,
    }
}

/// Wait for the next published result, giving up after `timeout`.
pub async fn first_result(
    events: &mut broadcast::Receiver<WorkerEvent>,
    timeout: Duration,
) -> anyhow::Result<Arc<DetectionResult>> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::Result(result)) => return Ok(result),
                Ok(WorkerEvent::SourceChanged { index, reason }) => {
                    tracing::debug!(camera = index, ?reason, "Camera active");
                }
                Ok(WorkerEvent::Failed(e)) => return Err(worker_failed(e)),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => anyhow::bail!("Capture worker shut down"),
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("No counted frame within {}s", timeout.as_secs()))?
}

pub fn worker_failed(error: CaptureError) -> anyhow::Error {
    anyhow::Error::new(error).context("Capture worker failed")
}
