//! # Logging Setup
//!
//! Opt-in console logging initialisation for binaries and tests that
//! embed this crate. Library code only emits `tracing` events; nothing
//! here runs unless the host application asks for it.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize a console `tracing` subscriber honoring `RUST_LOG`,
/// defaulting to `info`. Safe to call more than once, and tolerant of a
/// global subscriber installed by the host application.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_err()
        {
            // A global subscriber is already set; keep using it.
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
