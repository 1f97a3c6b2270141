//! Telemetry and logging infrastructure
//!
//! Structured logging with tracing and throughput metering for the render loop.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{ThroughputMeter, ThroughputReport};

// Re-export WorkerGuard so callers can store it
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;
