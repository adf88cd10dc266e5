//! List usable cameras.

use eduvision_capture_engine::{CameraEnumerator, CaptureFormat};
use eduvision_common::config::AppConfig;

pub fn run(config: &AppConfig, probe_limit: Option<u32>) -> anyhow::Result<()> {
    let backend = super::build_backend(config)?;
    let probe_limit = probe_limit.unwrap_or(config.camera.probe_limit);

    println!("EduVision Camera Check");
    println!("{}", "=".repeat(50));
    println!("Backend: {}", backend.name());
    println!("Probing indices 0..{probe_limit}");
    println!();

    let format = CaptureFormat::from(&config.camera);
    let roster = CameraEnumerator::new(backend.as_ref(), probe_limit, format).enumerate();

    if roster.is_empty() {
        println!("[WARN] No usable camera found.");
        return Ok(());
    }

    for camera in roster.descriptors() {
        println!("[OK] Camera {}", camera.index);
    }
    println!();
    println!(
        "{} usable camera(s). Monitoring starts on camera {}.",
        roster.len(),
        roster.first().unwrap_or_default()
    );

    Ok(())
}
