//! Error types for bounce extraction

use thiserror::Error;

/// Errors produced while extracting, decoding or folding message data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BounceError {
    /// No recognizable bounce code in the input; the artifact is not a bounce
    #[error("No bounce code found: {0}")]
    Extraction(String),

    /// Malformed transfer-encoded body in a single MIME part
    #[error("Failed to decode content: {0}")]
    Decode(String),

    /// Inconsistent or missing multipart boundaries
    #[error("Malformed MIME structure: {0}")]
    MalformedMime(String),

    /// No legal fold point, even at the fallback width
    #[error("Cannot fold header {header} within {width} characters")]
    UnfoldableHeader { header: String, width: usize },

    /// A rule table entry was rejected while building the classifier
    #[error("Invalid rule {rule}: {details}")]
    InvalidRule { rule: String, details: String },
}

/// Result type for bounce extraction operations
pub type Result<T> = std::result::Result<T, BounceError>;
