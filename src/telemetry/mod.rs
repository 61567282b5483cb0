//! Telemetry and logging infrastructure
//!
//! Structured logging with tracing plus display counters and cycle timing.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogGuard};
pub use metrics::{CycleProfiler, CycleStats, DisplayStats};
