//! EduVision Common Utilities
//!
//! Shared infrastructure for all EduVision crates:
//! - Error types and result aliases
//! - The RGB frame type passed between capture and detection
//! - Clock and frame-rate utilities
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use frame::*;
