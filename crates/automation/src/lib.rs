//! EduVision Automation
//!
//! Turns the live person count into durable records:
//! - [`Snapshot`] records and the [`SnapshotSink`] they are written to
//!   ([`JsonlSnapshotStore`] on disk).
//! - [`Schedule`] triggers (hourly, daily, weekly, fixed interval).
//! - [`Scheduler`], an explicit job list owned by whoever runs it, and
//!   [`SchedulerRunner`], the async loop that fires due jobs.
//!
//! Snapshots are only taken on request or on schedule, never per frame.

pub mod schedule;
pub mod scheduler;
pub mod snapshot;

pub use schedule::{Schedule, ScheduleKind};
pub use scheduler::{DueRun, ScheduledJob, Scheduler, SchedulerRunner, SnapshotSource};
pub use snapshot::{JsonlSnapshotStore, OccupancyReading, Snapshot, SnapshotSink, SnapshotTrigger};
