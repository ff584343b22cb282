//! Tracing/logging setup shared by the API server and the CLI.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide logging.
///
/// `default_level` applies when `RUST_LOG` is unset. Safe to call multiple
/// times; subsequent calls are no-ops.
pub fn init(default_level: &str, format: LogFormat) {
    self::tracing::init(default_level, format);
}
