//! Stepcrawl: a rate-limited step orchestrator for web crawls
//!
//! Callers register named steps, chain them at runtime, and the crawler runs
//! them no faster than a configured interval. Each step declares the
//! collaborators it needs as parameters (`Arc<HttpClient>`, `Arc<dyn Browser>`,
//! a [`crawler::Chain`] to queue follow-up steps, ...) and the registry
//! resolves them from a hierarchy of scopes when the step runs.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod registry;

use thiserror::Error;

/// Main error type for stepcrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("No binding for `{type_name}` in scope chain")]
    UnresolvedDependency { type_name: &'static str },

    #[error("No step registered under the name `{name}`")]
    UnknownStep { name: String },

    #[error("Scope already holds a binding for `{type_name}`")]
    DuplicateBinding { type_name: &'static str },

    #[error("Step `{step}` failed: {source}")]
    Invocation {
        step: String,
        source: anyhow::Error,
    },

    #[error("Step chain is closed; the invocation that owned it has finished")]
    ChainClosed,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for stepcrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use browser::{Browser, BrowserError};
pub use config::Config;
pub use crawler::{Chain, HttpClient, Logger, Orchestrator, Scheduler, StepRef};
pub use registry::{Args, BindPolicy, BoxedStep, FromScope, Scope, Step};
