//! Shared foundation for the lancast audio streamer.
//!
//! This crate is intentionally minimal with few dependencies so that every
//! other workspace member can depend on it without pulling in the audio or
//! networking stacks. It provides:
//!
//! - [`Error`] / [`ErrorKind`]: the single kinded error type used across the
//!   workspace
//! - [`Config`]: the validated configuration handed to the core by the
//!   front-end, plus the quality presets
//! - [`NetworkStats`] / [`AudioStats`]: per-session atomic counters
//! - [`ShutdownCoordinator`] / [`StopSignal`]: process-wide shutdown fan-out
//!   and close-exactly-once session cancellation
//! - level metering helpers (`calculate_rms_db`, [`LevelMeter`])

pub mod config;
pub mod error;
pub mod level;
pub mod shutdown;
pub mod stats;

pub use config::{Config, ExcitationConfig, Mode, StreamQuality, Timeouts};
pub use error::{Error, ErrorKind, Result};
pub use level::{
    calculate_rms_db, clamp_db, db_to_linear, linear_to_db, LevelMeter, LEVEL_SMOOTHING,
    SILENCE_FLOOR_DB,
};
pub use shutdown::{ShutdownCoordinator, StopSignal};
pub use stats::{AudioStats, AudioStatsSnapshot, NetworkStats, NetworkStatsSnapshot};
