//! Scheduled snapshot jobs and the loop that runs them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use eduvision_common::error::{EduvisionError, EduvisionResult};
use serde::{Deserialize, Serialize};

use crate::schedule::{Schedule, ScheduleKind};
use crate::snapshot::{OccupancyReading, Snapshot, SnapshotSink, SnapshotTrigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: String,
    pub schedule: Schedule,
    pub created_at: NaiveDateTime,
    pub next_run: NaiveDateTime,
}

/// A job that came due in [`Scheduler::take_due`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRun {
    pub id: String,
    pub kind: ScheduleKind,
    pub scheduled_for: NaiveDateTime,
}

/// On-disk form of a job. Next runs are not stored; they are recomputed on load.
#[derive(Debug, Serialize, Deserialize)]
struct StoredJob {
    #[serde(flatten)]
    schedule: Schedule,
    created: NaiveDateTime,
}

/// Holds the snapshot jobs for one monitor.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, replacing any job with the same id.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        schedule: Schedule,
        now: NaiveDateTime,
    ) -> EduvisionResult<&ScheduledJob> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EduvisionError::automation("Schedule id must not be empty"));
        }
        schedule.validate()?;

        let job = ScheduledJob {
            next_run: schedule.next_after(now),
            id: id.clone(),
            schedule,
            created_at: now,
        };

        let position = match self.jobs.iter().position(|j| j.id == id) {
            Some(pos) => {
                self.jobs[pos] = job;
                pos
            }
            None => {
                self.jobs.push(job);
                self.jobs.len() - 1
            }
        };

        let job = &self.jobs[position];
        tracing::info!(
            schedule_id = %job.id,
            schedule = %job.schedule.describe(),
            next_run = %job.next_run,
            "Schedule added"
        );
        Ok(job)
    }

    /// Remove a job. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        let removed = self.jobs.len() != before;
        if removed {
            tracing::info!(schedule_id = id, "Schedule removed");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn get(&self, id: &str) -> Option<&ScheduledJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// `(id, next run)` for every job, soonest first.
    pub fn next_run_times(&self) -> Vec<(String, NaiveDateTime)> {
        let mut times: Vec<_> = self
            .jobs
            .iter()
            .map(|j| (j.id.clone(), j.next_run))
            .collect();
        times.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        times
    }

    /// Jobs whose next run is at or before `now`, soonest first.
    ///
    /// Each returned job is advanced to its next trigger after `now`, so runs
    /// missed while the monitor was busy collapse into one.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<DueRun> {
        let mut due = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| j.next_run <= now) {
            due.push(DueRun {
                id: job.id.clone(),
                kind: job.schedule.kind(),
                scheduled_for: job.next_run,
            });
            job.next_run = job.schedule.next_after(now);
        }
        due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Write job definitions as a JSON object keyed by id.
    pub fn save_to(&self, path: &Path) -> EduvisionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored: BTreeMap<&str, StoredJob> = self
            .jobs
            .iter()
            .map(|j| {
                (
                    j.id.as_str(),
                    StoredJob {
                        schedule: j.schedule,
                        created: j.created_at,
                    },
                )
            })
            .collect();
        let json = serde_json::to_string_pretty(&stored)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), jobs = stored.len(), "Schedules saved");
        Ok(())
    }

    /// Load job definitions, computing next runs from `now`. A missing file
    /// gives an empty scheduler.
    pub fn load_from(path: &Path, now: NaiveDateTime) -> EduvisionResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let stored: BTreeMap<String, StoredJob> = serde_json::from_str(&content).map_err(|e| {
            EduvisionError::automation(format!("Invalid schedule file {}: {e}", path.display()))
        })?;

        let mut jobs = Vec::with_capacity(stored.len());
        for (id, job) in stored {
            if let Err(e) = job.schedule.validate() {
                tracing::warn!(schedule_id = %id, error = %e, "Skipping invalid schedule");
                continue;
            }
            jobs.push(ScheduledJob {
                next_run: job.schedule.next_after(now),
                id,
                schedule: job.schedule,
                created_at: job.created,
            });
        }
        tracing::info!(path = %path.display(), jobs = jobs.len(), "Schedules loaded");
        Ok(Self { jobs })
    }
}

/// Where scheduled runs get their person count from.
pub trait SnapshotSource: Send {
    fn latest_reading(&self) -> Option<OccupancyReading>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Option<OccupancyReading> + Send,
{
    fn latest_reading(&self) -> Option<OccupancyReading> {
        self()
    }
}

/// Polls a [`Scheduler`] and turns due jobs into persisted snapshots.
pub struct SchedulerRunner<S, K> {
    scheduler: Scheduler,
    source: S,
    sink: K,
    location_id: String,
    tick: Duration,
    stop_flag: Arc<AtomicBool>,
    snapshots_taken: u64,
}

impl<S: SnapshotSource, K: SnapshotSink> SchedulerRunner<S, K> {
    pub fn new(scheduler: Scheduler, source: S, sink: K, location_id: impl Into<String>) -> Self {
        Self {
            scheduler,
            source,
            sink,
            location_id: location_id.into(),
            tick: Duration::from_secs(1),
            stop_flag: Arc::new(AtomicBool::new(false)),
            snapshots_taken: 0,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until stopped. Returns the number of snapshots taken.
    pub async fn run(&mut self) -> EduvisionResult<u64> {
        tracing::info!(
            location = %self.location_id,
            jobs = self.scheduler.jobs().len(),
            "Scheduler started"
        );

        while !self.stop_flag.load(Ordering::Relaxed) {
            self.run_due(Local::now().naive_local());
            tokio::time::sleep(self.tick).await;
        }

        tracing::info!(snapshots = self.snapshots_taken, "Scheduler stopped");
        Ok(self.snapshots_taken)
    }

    /// Fire every job due at `now`. Returns the number of snapshots saved.
    pub fn run_due(&mut self, now: NaiveDateTime) -> usize {
        let mut saved = 0;
        for run in self.scheduler.take_due(now) {
            let Some(reading) = self.source.latest_reading() else {
                tracing::warn!(schedule_id = %run.id, "No occupancy reading available; run skipped");
                continue;
            };

            let snapshot = Snapshot::new(
                self.location_id.clone(),
                reading,
                SnapshotTrigger::Scheduled {
                    schedule_id: run.id.clone(),
                    kind: run.kind,
                },
            );
            match self.sink.save(&snapshot) {
                Ok(()) => {
                    saved += 1;
                    self.snapshots_taken += 1;
                    tracing::info!(
                        schedule_id = %run.id,
                        kind = %run.kind,
                        count = snapshot.people_count,
                        "Scheduled snapshot taken"
                    );
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %run.id, error = %e, "Failed to store scheduled snapshot");
                }
            }
        }
        saved
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken
    }
}
