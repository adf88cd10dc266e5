//! The capture worker: acquire, detect, publish, fail over.
//!
//! The worker owns its [`CameraSource`] on a dedicated thread. Callers only
//! see it through flags (stop, switch) and channels (results, state).
//!
//! Publishing never blocks the loop:
//! - `subscribe()` returns a bounded broadcast receiver. When a receiver
//!   falls behind, the oldest events are overwritten and the receiver sees
//!   `RecvError::Lagged(n)` before resuming at the oldest retained event.
//!   Events are delivered in acquisition order.
//! - `latest()` / `watch_latest()` expose the most recent result only
//!   (last value wins). This is what snapshot and scheduler paths read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use eduvision_common::clock::{FpsEstimator, DEFAULT_FPS_WINDOW};
use eduvision_common::config::AppConfig;
use eduvision_common::frame::Frame;
use eduvision_detection::DetectionEngine;
use tokio::sync::{broadcast, watch};

use crate::backend::{CameraBackend, CaptureFormat};
use crate::enumerator::{CameraEnumerator, CameraRoster, DEFAULT_PROBE_LIMIT};
use crate::error::{CameraError, CaptureError};
use crate::source::CameraSource;

/// Consecutive read failures after which a camera is skipped by failover.
const UNUSABLE_AFTER_FAILURES: u32 = 2;

/// Lifecycle of a [`CaptureWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    SwitchingSource,
    /// Stopped on request. Device released.
    Stopped,
    /// Every camera failed. Device released, no further results.
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Why the active camera changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    Initial,
    Failover,
    Requested,
}

/// One processed frame. Immutable once published.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Annotated frame, same dimensions as captured.
    pub frame: Frame,
    pub person_count: usize,
    pub timestamp: DateTime<Utc>,
    /// Rolling frame-rate estimate; 0.0 until the first window completes.
    pub fps: f64,
    pub camera_index: u32,
    /// Acquisition order, starting at 1.
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Result(Arc<DetectionResult>),
    SourceChanged { index: u32, reason: SwitchReason },
    /// Terminal. Sent once, after the device has been released.
    Failed(CaptureError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_published: u64,
    /// Frames dropped because detection failed on them.
    pub frames_skipped: u64,
    pub failovers: u64,
    pub switches: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub format: CaptureFormat,
    pub probe_limit: u32,
    /// Events retained per subscriber before the oldest are dropped.
    pub publish_capacity: usize,
    pub fps_window: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            format: CaptureFormat::default(),
            probe_limit: DEFAULT_PROBE_LIMIT,
            publish_capacity: 4,
            fps_window: DEFAULT_FPS_WINDOW,
        }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            format: CaptureFormat::from(&config.camera),
            probe_limit: config.camera.probe_limit,
            publish_capacity: config.worker.publish_capacity,
            fps_window: config.worker.fps_window,
        }
    }
}

struct Shared {
    stop: AtomicBool,
    switch_requested: AtomicBool,
    /// Roster entries not yet marked unusable.
    usable: AtomicUsize,
    state: watch::Sender<WorkerState>,
    active: watch::Sender<Option<u32>>,
    latest: watch::Sender<Option<Arc<DetectionResult>>>,
    events: broadcast::Sender<WorkerEvent>,
    frames_published: AtomicU64,
    frames_skipped: AtomicU64,
    failovers: AtomicU64,
    switches: AtomicU64,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        let (active, _) = watch::channel(None);
        let (latest, _) = watch::channel(None);
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            stop: AtomicBool::new(false),
            switch_requested: AtomicBool::new(false),
            usable: AtomicUsize::new(0),
            state,
            active,
            latest,
            events,
            frames_published: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            switches: AtomicU64::new(0),
        }
    }

    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Worker state changed");
        }
    }

    fn publish(&self, event: WorkerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Runs the acquire → detect → publish loop on its own thread.
pub struct CaptureWorker {
    backend: Arc<dyn CameraBackend>,
    engine: Option<DetectionEngine>,
    config: WorkerConfig,
    shared: Arc<Shared>,
    roster_len: usize,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn new(backend: Arc<dyn CameraBackend>, engine: DetectionEngine, config: WorkerConfig) -> Self {
        let shared = Arc::new(Shared::new(config.publish_capacity));
        Self {
            backend,
            engine: Some(engine),
            config,
            shared,
            roster_len: 0,
            handle: None,
        }
    }

    /// Enumerate cameras and start on `preferred` (or the first one found).
    ///
    /// An empty roster returns [`CaptureError::NoCameraAvailable`] and leaves
    /// the worker `Idle`, so the call can be retried later.
    pub fn start(&mut self, preferred: Option<u32>) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        self.shared.set_state(WorkerState::Starting);

        let roster = CameraEnumerator::new(
            self.backend.as_ref(),
            self.config.probe_limit,
            self.config.format,
        )
        .enumerate();
        self.launch(roster, preferred)
    }

    /// Start with an already-known roster instead of enumerating.
    pub fn start_with_roster(
        &mut self,
        roster: CameraRoster,
        preferred: Option<u32>,
    ) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        self.shared.set_state(WorkerState::Starting);
        self.launch(roster, preferred)
    }

    fn ensure_idle(&self) -> Result<(), CaptureError> {
        match self.shared.state() {
            WorkerState::Idle => Ok(()),
            other => Err(CaptureError::InvalidState(format!(
                "start requires an idle worker, current state is {other:?}"
            ))),
        }
    }

    fn launch(&mut self, mut roster: CameraRoster, preferred: Option<u32>) -> Result<(), CaptureError> {
        if roster.is_empty() {
            tracing::warn!("No camera available");
            self.shared.set_state(WorkerState::Idle);
            return Err(CaptureError::NoCameraAvailable);
        }

        let mut attempted = Vec::new();
        let mut opened = None;
        for index in start_order(&roster, preferred) {
            attempted.push(index);
            match CameraSource::open(self.backend.as_ref(), index, &self.config.format) {
                Ok(source) => {
                    opened = Some(source);
                    break;
                }
                Err(e) => {
                    tracing::warn!(camera = index, error = %e, "Camera failed to start");
                    roster.mark_unusable(index);
                }
            }
        }

        let Some(source) = opened else {
            let err = CaptureError::RosterExhausted { attempted };
            tracing::error!(error = %err, "Capture worker failed to start");
            self.shared.set_state(WorkerState::Failed);
            self.shared.publish(WorkerEvent::Failed(err.clone()));
            return Err(err);
        };

        let Some(engine) = self.engine.take() else {
            return Err(CaptureError::InvalidState(
                "detection engine already consumed".to_string(),
            ));
        };

        let index = source.index();
        roster.adopt(index);
        self.roster_len = roster.len();
        self.shared.usable.store(roster.usable_count(), Ordering::SeqCst);
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.switch_requested.store(false, Ordering::SeqCst);
        self.shared.active.send_replace(Some(index));
        self.shared.set_state(WorkerState::Running);
        self.shared.publish(WorkerEvent::SourceChanged {
            index,
            reason: SwitchReason::Initial,
        });

        let capture_loop = CaptureLoop {
            backend: Arc::clone(&self.backend),
            format: self.config.format,
            engine,
            roster,
            source: Some(source),
            read_failures: HashMap::new(),
            fps: FpsEstimator::new(self.config.fps_window),
            fps_window: self.config.fps_window,
            sequence: 0,
            shared: Arc::clone(&self.shared),
        };

        let spawned = std::thread::Builder::new()
            .name("eduvision-capture".to_string())
            .spawn(move || capture_loop.run());

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    camera = index,
                    backend = self.backend.name(),
                    roster = self.roster_len,
                    "Capture worker started"
                );
                Ok(())
            }
            Err(e) => {
                // The closure (and the source inside it) was dropped, releasing the device.
                self.shared.active.send_replace(None);
                self.shared.set_state(WorkerState::Failed);
                Err(CaptureError::InvalidState(format!(
                    "failed to spawn capture thread: {e}"
                )))
            }
        }
    }

    /// Ask the loop to move to the next camera at its next iteration.
    ///
    /// Returns `false` (and does nothing) when at most one camera is still
    /// usable or the worker is not running. If the other cameras turn out
    /// not to open, the current one stays active.
    pub fn switch_camera(&self) -> bool {
        if self.usable_cameras() <= 1 {
            return false;
        }
        if !matches!(
            self.shared.state(),
            WorkerState::Running | WorkerState::SwitchingSource
        ) {
            return false;
        }
        self.shared.switch_requested.store(true, Ordering::SeqCst);
        tracing::info!("Camera switch requested");
        true
    }

    /// Stop the loop, wait for it to finish its current iteration, and
    /// release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
                self.shared.active.send_replace(None);
                self.shared.set_state(WorkerState::Failed);
                return;
            }
        }

        if self.shared.state() != WorkerState::Failed {
            if self.shared.state() != WorkerState::Stopped {
                tracing::info!(stats = ?self.stats(), "Capture worker stopped");
            }
            self.shared.set_state(WorkerState::Stopped);
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// Index of the camera currently open, if any.
    pub fn active_camera(&self) -> Option<u32> {
        *self.shared.active.borrow()
    }

    /// Receive every event from now on, subject to the drop-oldest policy.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    /// Most recent result, if any frame has been processed.
    pub fn latest(&self) -> Option<Arc<DetectionResult>> {
        self.shared.latest.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<Arc<DetectionResult>>> {
        self.shared.latest.subscribe()
    }

    pub fn roster_len(&self) -> usize {
        self.roster_len
    }

    /// Roster entries failover may still use.
    pub fn usable_cameras(&self) -> usize {
        self.shared.usable.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            frames_published: self.shared.frames_published.load(Ordering::Relaxed),
            frames_skipped: self.shared.frames_skipped.load(Ordering::Relaxed),
            failovers: self.shared.failovers.load(Ordering::Relaxed),
            switches: self.shared.switches.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Indices to try at start: `preferred` first, then the roster in order
/// wrapping around from just after it.
fn start_order(roster: &CameraRoster, preferred: Option<u32>) -> Vec<u32> {
    let indices = roster.indices();
    match preferred {
        None => indices,
        Some(p) => match roster.position(p) {
            Some(pos) => indices[pos..].iter().chain(&indices[..pos]).copied().collect(),
            None => std::iter::once(p).chain(indices).collect(),
        },
    }
}

enum LoopExit {
    Stopped,
    Exhausted,
}

struct CaptureLoop {
    backend: Arc<dyn CameraBackend>,
    format: CaptureFormat,
    engine: DetectionEngine,
    roster: CameraRoster,
    source: Option<CameraSource>,
    read_failures: HashMap<u32, u32>,
    fps: FpsEstimator,
    fps_window: u32,
    sequence: u64,
    shared: Arc<Shared>,
}

impl CaptureLoop {
    fn run(mut self) {
        let exit = loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }

            if self.shared.switch_requested.swap(false, Ordering::SeqCst) {
                if let Err(exit) = self.switch(SwitchReason::Requested) {
                    break exit;
                }
                continue;
            }

            let Some(source) = self.source.as_mut() else {
                if let Err(exit) = self.switch(SwitchReason::Failover) {
                    break exit;
                }
                continue;
            };

            match source.read() {
                Ok(frame) => {
                    self.read_failures.remove(&frame.camera_index);
                    self.process(frame);
                }
                Err(e) => {
                    self.record_read_failure(&e);
                    if let Err(exit) = self.switch(SwitchReason::Failover) {
                        break exit;
                    }
                }
            }
        };

        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.shared.active.send_replace(None);

        match exit {
            LoopExit::Stopped => {
                tracing::debug!("Capture loop exited on stop request");
            }
            LoopExit::Exhausted => {
                let err = CaptureError::RosterExhausted {
                    attempted: self.roster.indices(),
                };
                tracing::error!(error = %err, "No camera left to fail over to");
                self.shared.set_state(WorkerState::Failed);
                self.shared.publish(WorkerEvent::Failed(err));
            }
        }
    }

    fn process(&mut self, frame: Frame) {
        let camera_index = frame.camera_index;
        match self.engine.process(frame) {
            Ok((annotated, person_count)) => {
                if let Some(fps) = self.fps.tick() {
                    tracing::debug!(camera = camera_index, fps, "Frame rate updated");
                }
                self.sequence += 1;
                let result = Arc::new(DetectionResult {
                    frame: annotated,
                    person_count,
                    timestamp: Utc::now(),
                    fps: self.fps.fps(),
                    camera_index,
                    sequence: self.sequence,
                });
                self.shared.latest.send_replace(Some(Arc::clone(&result)));
                self.shared.publish(WorkerEvent::Result(result));
                self.shared.frames_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(camera = camera_index, error = %e, "Detection failed; frame skipped");
                self.shared.frames_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_read_failure(&mut self, error: &CameraError) {
        let index = error.index();
        let failures = self.read_failures.entry(index).or_insert(0);
        *failures += 1;
        tracing::warn!(camera = index, failures = *failures, error = %error, "Camera read failed");
        if *failures >= UNUSABLE_AFTER_FAILURES {
            self.mark_unusable(index);
        }
    }

    fn mark_unusable(&mut self, index: u32) {
        self.roster.mark_unusable(index);
        self.shared
            .usable
            .store(self.roster.usable_count(), Ordering::SeqCst);
    }

    /// Move to the next usable camera, wrapping around the roster.
    ///
    /// Failover closes the current camera first and tries it again last.
    /// A requested switch keeps the current camera open until another one
    /// has opened, and stays on it when none does.
    ///
    /// A reopened camera keeps its read-failure count; only a frame read in
    /// the loop clears it.
    fn switch(&mut self, reason: SwitchReason) -> Result<(), LoopExit> {
        self.shared.set_state(WorkerState::SwitchingSource);

        let current = self.source.as_ref().map(CameraSource::index);
        let keep_current = reason == SwitchReason::Requested && current.is_some();
        if !keep_current {
            if let Some(mut source) = self.source.take() {
                source.close();
            }
            self.shared.active.send_replace(None);
        }

        let len = self.roster.len();
        let start = current
            .and_then(|i| self.roster.position(i))
            .map_or(0, |pos| pos + 1);
        for step in 0..len {
            if self.shared.stop.load(Ordering::SeqCst) {
                return Err(LoopExit::Stopped);
            }
            let Some(descriptor) = self.roster.get((start + step) % len).copied() else {
                continue;
            };
            let index = descriptor.index;
            if !descriptor.is_usable() || (keep_current && Some(index) == current) {
                continue;
            }

            match CameraSource::open(self.backend.as_ref(), index, &self.format) {
                Ok(source) => {
                    if let Some(mut previous) = self.source.replace(source) {
                        previous.close();
                    }
                    self.fps = FpsEstimator::new(self.fps_window);
                    self.shared.active.send_replace(Some(index));
                    self.shared.set_state(WorkerState::Running);

                    let counter = match reason {
                        SwitchReason::Requested => &self.shared.switches,
                        _ => &self.shared.failovers,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);

                    tracing::info!(from = ?current, to = index, ?reason, "Switched camera");
                    self.shared.publish(WorkerEvent::SourceChanged { index, reason });
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(camera = index, error = %e, "Camera failed to open; skipping");
                    self.mark_unusable(index);
                }
            }
        }

        if keep_current {
            tracing::warn!(camera = ?current, "No other camera opened; keeping the current one");
            self.shared.set_state(WorkerState::Running);
            return Ok(());
        }
        Err(LoopExit::Exhausted)
    }
}
