//! Ephemeral instance registry: lifecycle mutations plus the periodic
//! beat-check liveness sweep that flips health and expires dead instances.

pub mod beat_check;
pub mod error;
pub mod registry;

pub use beat_check::{BeatCheckEventSink, BeatCheckTask};
pub use error::RegistryError;
pub use registry::EphemeralRegistry;
