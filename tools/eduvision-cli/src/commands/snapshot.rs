//! Record one occupancy snapshot.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use eduvision_automation::{JsonlSnapshotStore, Snapshot, SnapshotSink};
use eduvision_common::config::AppConfig;

pub async fn run(
    config: &AppConfig,
    camera: Option<u32>,
    location: Option<String>,
    save_frame: Option<PathBuf>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let location = location.unwrap_or_else(|| config.automation.location_id.clone());

    let mut worker = super::build_worker(config)?;
    let mut events = worker.subscribe();
    worker.start(camera).context("Failed to start capture")?;

    let result = super::first_result(&mut events, Duration::from_secs(timeout_secs)).await;
    super::stop_worker(&mut worker);
    let result = result?;

    let snapshot = Snapshot::manual(location, super::reading_from(&result));
    let mut store = JsonlSnapshotStore::open(config.snapshots_path())?;
    store.save(&snapshot)?;

    println!(
        "{}: {} people on camera {} at {}",
        snapshot.location_id,
        snapshot.people_count,
        result.camera_index,
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Snapshot appended to: {}", store.path().display());

    if let Some(path) = save_frame {
        result
            .frame
            .image
            .save(&path)
            .with_context(|| format!("Failed to write frame to {}", path.display()))?;
        println!("Annotated frame saved to: {}", path.display());
    }

    Ok(())
}
