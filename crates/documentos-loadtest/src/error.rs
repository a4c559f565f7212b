//! Error types for the documentos load-test engine

use thiserror::Error;

/// Result type alias for load-test operations
pub type Result<T> = std::result::Result<T, LoadTestError>;

/// Errors that can occur while configuring, running or reporting a load test.
///
/// Classification failures are never represented here: a bad response is a
/// recorded sample, not an error.
#[derive(Error, Debug)]
pub enum LoadTestError {
    // === Configuration ===
    /// Settings could not be loaded from file or environment
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Settings were loaded but are not usable
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Threshold expression could not be parsed
    #[error("Invalid threshold expression '{expression}': {reason}")]
    InvalidThreshold { expression: String, reason: String },

    /// Stage sequence cannot be driven
    #[error("Invalid stage sequence: {0}")]
    InvalidStage(String),

    // === Execution ===
    /// The HTTP collaborator failed before a status was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// A scenario iteration failed unexpectedly
    #[error("Iteration fault: {0}")]
    IterationFault(String),

    // === Reporting ===
    /// Writing a result artifact failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Prometheus exposition failed
    #[error("Metrics export error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<reqwest::Error> for LoadTestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
