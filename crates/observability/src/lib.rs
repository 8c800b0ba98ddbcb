//! Process-wide tracing setup.

pub mod tracing;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}
