//! Clock and frame-rate utilities.
//!
//! Capture sessions are anchored to a monotonic epoch recorded when the
//! worker starts. This module provides:
//! - The session clock (monotonic elapsed time + wall-clock epoch)
//! - A rolling frames-per-second estimator
//! - A rate controller for throttling periodic work such as log lines

use std::time::Instant;

/// Number of frames per FPS measurement window.
pub const DEFAULT_FPS_WINDOW: u32 = 30;

/// A session clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment capture started).
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// The instant capture started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl SessionClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get nanoseconds elapsed since the epoch.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Get seconds elapsed since the epoch.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Rolling frame-rate estimate.
///
/// Counts frames since the last measurement; every `window` frames the
/// estimate is recomputed as `window / elapsed` and the counter resets.
/// The estimate stays at `0.0` until the first window completes.
#[derive(Debug, Clone)]
pub struct FpsEstimator {
    window: u32,
    frames: u32,
    window_start: Instant,
    fps: f64,
}

impl FpsEstimator {
    pub fn new(window: u32) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Create an estimator whose first window starts at `start`.
    pub fn starting_at(window: u32, start: Instant) -> Self {
        Self {
            window: window.max(1),
            frames: 0,
            window_start: start,
            fps: 0.0,
        }
    }

    /// Record one frame observed at `now`.
    ///
    /// Returns the fresh estimate when this frame closed a window.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        if self.frames < self.window {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        if elapsed > 0.0 {
            self.fps = self.window as f64 / elapsed;
        }
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Record one frame observed now.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Latest estimate in frames per second.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Frames counted in the current window.
    pub fn pending_frames(&self) -> u32 {
        self.frames
    }
}

impl Default for FpsEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_FPS_WINDOW)
    }
}

/// Rate controller for periodic work.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Create a controller that fires at most once per `interval_ns`.
    pub fn with_interval_ns(interval_ns: u64) -> Self {
        Self {
            target_interval_ns: interval_ns,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }

    /// Target interval in nanoseconds.
    pub fn interval_ns(&self) -> u64 {
        self.target_interval_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_elapsed() {
        let clock = SessionClock::start();
        assert!(clock.elapsed_ns() < 1_000_000_000);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn fps_stays_zero_until_window_completes() {
        let start = Instant::now();
        let mut fps = FpsEstimator::starting_at(30, start);
        for i in 1..30 {
            assert_eq!(fps.tick_at(start + Duration::from_millis(i * 10)), None);
        }
        assert_eq!(fps.fps(), 0.0);
        assert_eq!(fps.pending_frames(), 29);
    }

    #[test]
    fn fps_measures_each_window_and_resets() {
        let start = Instant::now();
        let mut fps = FpsEstimator::starting_at(30, start);
        let mut last = None;
        // 30 frames over one second.
        for i in 1..=30u64 {
            last = fps.tick_at(start + Duration::from_millis(i * 1000 / 30));
        }
        let estimate = last.expect("window should close on the 30th frame");
        assert!((estimate - 30.0).abs() < 0.5, "estimate was {estimate}");
        assert_eq!(fps.pending_frames(), 0);

        // Next 30 frames over two seconds.
        let second_start = start + Duration::from_secs(1);
        for i in 1..=30u64 {
            last = fps.tick_at(second_start + Duration::from_millis(i * 2000 / 30));
        }
        assert!((last.unwrap() - 15.0).abs() < 0.5);
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(60);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(1_000_000)); // 1ms later, too soon
        assert!(ctrl.should_tick(17_000_000)); // ~17ms later, should fire (60Hz ~ 16.67ms)
    }

    #[test]
    fn rate_controller_with_interval() {
        let mut ctrl = RateController::with_interval_ns(1_000_000_000);
        assert!(ctrl.should_tick(5));
        assert!(!ctrl.should_tick(999_999_999));
        assert!(ctrl.should_tick(1_000_000_005));
    }
}
