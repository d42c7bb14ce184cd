//! Planter toolchain
//!
//! Glue around the core crates: configuration, flow-record CSV handling,
//! runtime CLI rendering and evaluation reports.

pub mod commands;
pub mod config;
pub mod dataset;
pub mod error;
pub mod report;

pub use commands::render_commands;
pub use config::{config_from_args, PlanterConfig};
pub use dataset::{stratified_split, Dataset, QuantizedSet};
pub use error::{PlanterError, Result};
pub use report::{evaluate, Evaluation, PipelineSummary};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, 0 if the clock is before it
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
