pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StaticModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractYoloModel;
