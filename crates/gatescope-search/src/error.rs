//! Error types for the search client.

use std::fmt;

use thiserror::Error;

/// Why one candidate base path was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseFailure {
    pub base: String,
    pub reason: String,
}

impl fmt::Display for BaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.base, self.reason)
    }
}

/// Search client error type.
#[derive(Debug, Error)]
pub enum SearchError {
    /// HTTP client construction or transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (e.g., reading a CA bundle).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every candidate base path failed.
    #[error("All {} search bases failed", .0.len())]
    AllBasesFailed(Vec<BaseFailure>),
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
