//! Continuous occupancy monitoring.

use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use eduvision_automation::{JsonlSnapshotStore, OccupancyReading, Scheduler, SchedulerRunner};
use eduvision_capture_engine::{CaptureWorker, WorkerEvent};
use eduvision_common::clock::{RateController, SessionClock};
use eduvision_common::config::AppConfig;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// How often the running count is reported.
const REPORT_HZ: u32 = 1;

pub async fn run(
    config: &AppConfig,
    camera: Option<u32>,
    location: Option<String>,
    duration: Option<u64>,
    schedules: bool,
) -> anyhow::Result<()> {
    let location = location.unwrap_or_else(|| config.automation.location_id.clone());

    let mut worker = super::build_worker(config)?;
    let mut events = worker.subscribe();
    worker.start(camera).context("Failed to start capture")?;

    println!("Monitoring occupancy for {location}");
    println!("  Cameras in roster: {}", worker.roster_len());
    if let Some(secs) = duration {
        println!("  Duration: {secs}s");
    }
    println!();

    let scheduler = if schedules {
        Some(spawn_scheduler(config, &worker, location.clone())?)
    } else {
        None
    };

    println!("Press Ctrl+C to stop monitoring...");
    println!();

    let clock = SessionClock::start();
    let mut report = RateController::new(REPORT_HZ);

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break Ok(());
            }
            _ = &mut deadline => break Ok(()),
            event = events.recv() => match event {
                Ok(WorkerEvent::Result(result)) => {
                    if report.should_tick(clock.elapsed_ns()) {
                        tracing::info!(
                            camera = result.camera_index,
                            people = result.person_count,
                            fps = %format!("{:.1}", result.fps),
                            "Occupancy"
                        );
                    }
                }
                Ok(WorkerEvent::SourceChanged { index, reason }) => {
                    println!("Camera {index} active ({reason:?})");
                }
                Ok(WorkerEvent::Failed(e)) => break Err(super::worker_failed(e)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Monitor fell behind; older results dropped");
                }
                Err(RecvError::Closed) => break Err(anyhow::anyhow!("Capture worker shut down")),
            }
        }
    };

    if let Some((stop, task)) = scheduler {
        stop.store(true, Ordering::SeqCst);
        match task.await {
            Ok(Ok(taken)) => println!("Scheduled snapshots taken: {taken}"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Scheduler ended with an error"),
            Err(e) => tracing::warn!(error = %e, "Scheduler task panicked"),
        }
    }

    super::stop_worker(&mut worker);
    let stats = worker.stats();
    println!(
        "Stopped after {:.1}s: {} frames, {} skipped, {} failovers",
        clock.elapsed_secs(),
        stats.frames_published,
        stats.frames_skipped,
        stats.failovers
    );

    outcome
}

type SchedulerTask = (
    std::sync::Arc<std::sync::atomic::AtomicBool>,
    JoinHandle<eduvision_common::error::EduvisionResult<u64>>,
);

/// Start the saved schedules against the worker's latest result.
fn spawn_scheduler(
    config: &AppConfig,
    worker: &CaptureWorker,
    location: String,
) -> anyhow::Result<SchedulerTask> {
    let path = config.schedules_path();
    let scheduler = Scheduler::load_from(&path, Local::now().naive_local())
        .with_context(|| format!("Failed to load schedules from {}", path.display()))?;
    if scheduler.is_empty() {
        println!("[WARN] No schedules defined; add one with `eduvision schedule add`.");
    }
    for (id, next) in scheduler.next_run_times() {
        println!("  Schedule {id}: next run {}", next.format("%Y-%m-%d %H:%M"));
    }

    let store = JsonlSnapshotStore::open(config.snapshots_path())?;
    let latest = worker.watch_latest();
    let source = move || -> Option<OccupancyReading> {
        latest.borrow().as_deref().map(super::reading_from)
    };

    let mut runner = SchedulerRunner::new(scheduler, source, store, location)
        .with_tick(Duration::from_millis(config.automation.tick_ms));
    let stop = runner.stop_flag();
    let task = tokio::spawn(async move { runner.run().await });

    Ok((stop, task))
}
