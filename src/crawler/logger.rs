//! Logger collaborator
//!
//! Steps and the orchestrator report through an `Arc<dyn Logger>` resolved
//! from the registry, so a crawl can redirect its log output by binding a
//! different logger. The default forwards to `tracing`.

use tracing::Level;

/// Sink for crawl log entries
pub trait Logger: Send + Sync {
    /// Records one entry
    fn log(&self, level: Level, message: &str);
}

/// Logger that emits `tracing` events tagged with a prefix
#[derive(Debug, Clone)]
pub struct TracingLogger {
    prefix: String,
}

impl TracingLogger {
    /// Creates a logger tagging every entry with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix attached to entries
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("CRAWLER")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let prefix = self.prefix.as_str();
        match level {
            Level::ERROR => tracing::error!(prefix, "{}", message),
            Level::WARN => tracing::warn!(prefix, "{}", message),
            Level::INFO => tracing::info!(prefix, "{}", message),
            Level::DEBUG => tracing::debug!(prefix, "{}", message),
            _ => tracing::trace!(prefix, "{}", message),
        }
    }
}
