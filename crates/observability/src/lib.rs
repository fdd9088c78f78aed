//! Tracing and logging (shared setup).

/// Initialize process-wide observability (JSON logs).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`], with the format taken from `IOTFORGE_LOG_FORMAT`.
pub fn init_from_env() {
    let format = std::env::var("IOTFORGE_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init_with_format(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogFormat, UnknownLogFormat, init_with_format};
