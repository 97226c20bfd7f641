//! Logger capability
//!
//! Design Note (spec.md §9): "Implicit global singleton logger → inject a
//! logger handle in every constructor; provide a no-op default." `tracing`
//! remains the crate's structured-logging backend (as in the teacher), but
//! every constructor that spec.md calls out as logging warnings on recoverable
//! failures (load failures, Desk job errors, context-enrichment failures)
//! additionally accepts an `Option<Arc<dyn Logger>>` so an embedding program
//! can observe those events without installing a global `tracing` subscriber.

use std::sync::Arc;

/// Severity for [`Logger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A capability for observing engine-internal events.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Default logger: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Forwards to the ambient `tracing` subscriber, matching the teacher's
/// direct `tracing::warn!`/`tracing::info!` call sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!("{message}"),
            Level::Info => tracing::info!("{message}"),
            Level::Warn => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }
    }
}

/// Shared handle used across the engine; defaults to [`NoopLogger`].
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(NoopLogger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_logger_does_not_panic() {
        NoopLogger.log(Level::Error, "whatever");
    }
}
