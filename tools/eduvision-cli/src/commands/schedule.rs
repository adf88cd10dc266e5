//! Manage the saved snapshot schedules.

use anyhow::Context;
use chrono::Local;
use eduvision_automation::{Schedule, Scheduler};
use eduvision_common::config::AppConfig;

fn load(config: &AppConfig) -> anyhow::Result<Scheduler> {
    let path = config.schedules_path();
    Scheduler::load_from(&path, Local::now().naive_local())
        .with_context(|| format!("Failed to load schedules from {}", path.display()))
}

fn save(config: &AppConfig, scheduler: &Scheduler) -> anyhow::Result<()> {
    let path = config.schedules_path();
    scheduler
        .save_to(&path)
        .with_context(|| format!("Failed to save schedules to {}", path.display()))
}

pub fn add(config: &AppConfig, id: String, schedule: Schedule) -> anyhow::Result<()> {
    let mut scheduler = load(config)?;
    let job = scheduler.add(id, schedule, Local::now().naive_local())?;
    println!(
        "Schedule {} ({}), next run {}",
        job.id,
        job.schedule.describe(),
        job.next_run.format("%Y-%m-%d %H:%M")
    );
    save(config, &scheduler)
}

pub fn list(config: &AppConfig) -> anyhow::Result<()> {
    let scheduler = load(config)?;
    if scheduler.is_empty() {
        println!("No schedules defined.");
        return Ok(());
    }

    println!("{:<16} {:<28} NEXT RUN", "ID", "WHEN");
    for (id, next) in scheduler.next_run_times() {
        let when = scheduler
            .get(&id)
            .map(|job| job.schedule.describe())
            .unwrap_or_default();
        println!("{id:<16} {when:<28} {}", next.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

pub fn remove(config: &AppConfig, id: &str) -> anyhow::Result<()> {
    let mut scheduler = load(config)?;
    if !scheduler.remove(id) {
        anyhow::bail!("No schedule named '{id}'");
    }
    save(config, &scheduler)?;
    println!("Removed schedule {id}");
    Ok(())
}

pub fn clear(config: &AppConfig) -> anyhow::Result<()> {
    let mut scheduler = load(config)?;
    let count = scheduler.jobs().len();
    scheduler.clear();
    save(config, &scheduler)?;
    println!("Removed {count} schedule(s)");
    Ok(())
}
