//! Telemetry and logging infrastructure
//!
//! Structured logging with tracing and counter snapshots for the player and
//! exporter.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_default, LogConfig, LogGuard};
pub use metrics::{ExportStats, PlaybackStats};

#[cfg(test)]
mod tests {
    #[test]
    fn test_logging_entry_points_reachable_from_telemetry() {
        let _default: fn() -> _ = super::init_logging_default;
        let _custom: fn(&super::LogConfig) -> _ = super::init_logging;
    }
}
