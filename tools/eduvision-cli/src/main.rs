//! EduVision CLI: room occupancy from classroom cameras.
//!
//! Usage:
//!   eduvision cameras              List usable camera indices
//!   eduvision monitor [OPTIONS]    Count people continuously
//!   eduvision snapshot [OPTIONS]   Record one occupancy snapshot
//!   eduvision schedule <ACTION>    Manage scheduled snapshots

use std::path::PathBuf;

use chrono::Weekday;
use clap::{Parser, Subcommand, ValueEnum};
use eduvision_common::config::{AppConfig, CameraBackendKind};

mod commands;

#[derive(Parser)]
#[command(
    name = "eduvision",
    about = "Campus room occupancy monitoring",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Camera backend
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// YOLOv8 ONNX model used for person detection
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Minimum confidence for a detection to be counted
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Gstreamer,
    Synthetic,
}

impl From<BackendArg> for CameraBackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Gstreamer => CameraBackendKind::Gstreamer,
            BackendArg::Synthetic => CameraBackendKind::Synthetic,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Probe camera indices and list the usable ones
    Cameras {
        /// Highest index probed is one less than this
        #[arg(long)]
        probe_limit: Option<u32>,
    },

    /// Run the capture worker and report occupancy until stopped
    Monitor {
        /// Camera index to try first
        #[arg(short, long)]
        camera: Option<u32>,

        /// Location recorded on scheduled snapshots
        #[arg(short, long)]
        location: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Take snapshots according to the saved schedules
        #[arg(long)]
        schedules: bool,
    },

    /// Record a single occupancy snapshot
    Snapshot {
        /// Camera index to try first
        #[arg(short, long)]
        camera: Option<u32>,

        /// Location recorded on the snapshot
        #[arg(short, long)]
        location: Option<String>,

        /// Also write the annotated frame to this image file
        #[arg(long)]
        save_frame: Option<PathBuf>,

        /// Seconds to wait for the first counted frame
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Manage scheduled snapshots
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Add or replace a schedule
    Add {
        /// Schedule identifier
        id: String,

        #[command(subcommand)]
        when: ScheduleWhen,
    },

    /// List schedules and their next run
    List,

    /// Remove a schedule
    Remove {
        /// Schedule identifier
        id: String,
    },

    /// Remove every schedule
    Clear,
}

#[derive(Subcommand)]
enum ScheduleWhen {
    /// Every hour at the given minute
    Hourly {
        #[arg(long, default_value = "0")]
        minute: u32,
    },

    /// Every day at the given time
    Daily {
        #[arg(long)]
        hour: u32,

        #[arg(long, default_value = "0")]
        minute: u32,
    },

    /// Every week on the given day and time
    Weekly {
        /// Day of week, e.g. `mon` or `monday`
        #[arg(long, value_parser = parse_weekday)]
        day: Weekday,

        #[arg(long)]
        hour: u32,

        #[arg(long, default_value = "0")]
        minute: u32,
    },

    /// Every N minutes
    Interval {
        #[arg(long)]
        minutes: u32,
    },
}

fn parse_weekday(value: &str) -> Result<Weekday, String> {
    value
        .parse::<Weekday>()
        .map_err(|_| format!("'{value}' is not a day of the week"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    eduvision_common::logging::init_logging(&config.logging);

    if let Some(backend) = cli.backend {
        config.camera.backend = backend.into();
    }
    if let Some(model) = cli.model {
        config.detection.model_path = Some(model);
    }
    if let Some(threshold) = cli.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("--threshold must be between 0 and 1, got {threshold}");
        }
        config.detection.confidence_threshold = threshold;
    }

    match cli.command {
        Commands::Cameras { probe_limit } => commands::cameras::run(&config, probe_limit),
        Commands::Monitor {
            camera,
            location,
            duration,
            schedules,
        } => commands::monitor::run(&config, camera, location, duration, schedules).await,
        Commands::Snapshot {
            camera,
            location,
            save_frame,
            timeout,
        } => commands::snapshot::run(&config, camera, location, save_frame, timeout).await,
        Commands::Schedule { action } => match action {
            ScheduleAction::Add { id, when } => {
                let schedule = match when {
                    ScheduleWhen::Hourly { minute } => {
                        eduvision_automation::Schedule::Hourly { minute }
                    }
                    ScheduleWhen::Daily { hour, minute } => {
                        eduvision_automation::Schedule::Daily { hour, minute }
                    }
                    ScheduleWhen::Weekly { day, hour, minute } => {
                        eduvision_automation::Schedule::Weekly {
                            weekday: day,
                            hour,
                            minute,
                        }
                    }
                    ScheduleWhen::Interval { minutes } => {
                        eduvision_automation::Schedule::Interval { minutes }
                    }
                };
                commands::schedule::add(&config, id, schedule)
            }
            ScheduleAction::List => commands::schedule::list(&config),
            ScheduleAction::Remove { id } => commands::schedule::remove(&config, &id),
            ScheduleAction::Clear => commands::schedule::clear(&config),
        },
    }
}
