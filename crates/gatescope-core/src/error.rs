//! Core error types.

use thiserror::Error;

/// Errors raised while talking to the management API or decoding its documents.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Management API answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Malformed XML document.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., reading a taxonomy file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document parsed but did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid taxonomy registry.
    #[error("Taxonomy error: {0}")]
    Taxonomy(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
