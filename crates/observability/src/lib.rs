//! Tracing/logging setup shared by every binary and test harness.

pub mod config;
pub mod subscriber;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityError};

/// Initialize process-wide tracing from the environment.
///
/// An invalid `LIMAS_LOG_FORMAT` falls back to JSON output. Safe to call multiple
/// times; subsequent calls become no-ops.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_default();
    subscriber::init(&config);
}
