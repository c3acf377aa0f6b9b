//! Tracing/logging setup shared by every taskforge process.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, UnknownLogFormat};

/// Initialize process-wide logging with defaults (`RUST_LOG`, else `info`; JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    crate::tracing::init(&ObservabilityConfig::default());
}

/// Initialize process-wide logging from an explicit configuration.
pub fn init_with(config: &ObservabilityConfig) {
    crate::tracing::init(config);
}
