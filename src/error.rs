//! Error types for regrouping.
//!
//! Upstream failures are carried unchanged; everything else describes a
//! misconfigured reader or input that breaks the grouping contract.

use arrow::error::ArrowError;
use thiserror::Error;

/// The primary error type for regroup operations.
#[derive(Error, Debug)]
pub enum RegroupError {
    /// Error raised by the upstream batch source, passed through as-is
    #[error("Upstream error: {source}")]
    Upstream {
        #[source]
        source: ArrowError,
    },

    /// Arrow compute error while splitting or merging batches
    #[error("Arrow error: {message}")]
    Arrow { message: String },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Schema error (grouping column not found, etc.)
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Input that cannot be grouped (unorderable or changing key type)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A key arrived at or below the last emitted key, so ascending output
    /// can no longer be kept
    #[error("Group key {key} arrived at or below the last emitted key {last_emitted}")]
    KeyReappeared { key: String, last_emitted: String },

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {message}")]
    ResourceExhausted { message: String },

    /// Internal error (bug in the rebuffer)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RegroupError {
    /// Wrap an error produced by the upstream source.
    pub fn upstream(source: ArrowError) -> Self {
        Self::Upstream { source }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a key reappearance error.
    pub fn key_reappeared(key: impl Into<String>, last_emitted: impl Into<String>) -> Self {
        Self::KeyReappeared {
            key: key.into(),
            last_emitted: last_emitted.into(),
        }
    }

    /// Create a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from the upstream source rather than the rebuffer.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

impl From<ArrowError> for RegroupError {
    fn from(err: ArrowError) -> Self {
        Self::Arrow {
            message: err.to_string(),
        }
    }
}

/// Result type alias for regroup operations.
pub type Result<T> = std::result::Result<T, RegroupError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = RegroupError::schema("column 'key' not found");
        assert_eq!(err.to_string(), "Schema error: column 'key' not found");

        let err = RegroupError::key_reappeared("00", "01");
        assert_eq!(
            err.to_string(),
            "Group key 00 arrived at or below the last emitted key 01"
        );
    }

    #[test]
    fn test_upstream_error_keeps_source() {
        let err = RegroupError::upstream(ArrowError::ParseError("bad row 7".to_string()));
        assert!(err.is_upstream());

        let source = err.source().unwrap();
        let arrow_err = source.downcast_ref::<ArrowError>().unwrap();
        assert!(matches!(arrow_err, ArrowError::ParseError(msg) if msg == "bad row 7"));
    }

    #[test]
    fn test_arrow_error_is_not_upstream() {
        let err: RegroupError = ArrowError::ComputeError("overflow".to_string()).into();
        assert!(!err.is_upstream());
        assert!(err.to_string().starts_with("Arrow error:"));
    }
}
