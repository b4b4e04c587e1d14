//! Error types for the cursor registry
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for the cursor registry
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Registry Errors
    // ============================================================================
    #[error("Failed to access store '{name}': {source}")]
    Access {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Registry is closed")]
    RegistryClosed,

    #[error("Registry shutdown timed out with open stores: {}", open.join(", "))]
    ShutdownTimeout { open: Vec<String> },

    // ============================================================================
    // Resource Errors
    // ============================================================================
    #[error("Resource '{key}' already has a pending cursor update")]
    Conflict { key: String },

    #[error("Waiting for resource '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("Failed to decode state for '{key}': {message}")]
    Decode { key: String, message: String },

    #[error("Resource '{key}' not found")]
    ResourceNotFound { key: String },

    // ============================================================================
    // Backend Errors
    // ============================================================================
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Collection '{name}' is closed")]
    CollectionClosed { name: String },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an access error for a store
    pub fn access(name: impl Into<String>, source: Error) -> Self {
        Self::Access {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a conflict error
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Create a cancellation error
    pub fn cancelled(key: impl Into<String>) -> Self {
        Self::Cancelled { key: key.into() }
    }

    /// Create a decode error
    pub fn decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::ResourceNotFound { key: key.into() }
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if the failed operation may succeed when tried again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::Cancelled { .. })
    }
}

/// Result type alias for the cursor registry
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::conflict("test::key");
        assert_eq!(
            err.to_string(),
            "Resource 'test::key' already has a pending cursor update"
        );

        let err = Error::access("filestream", Error::backend("permission denied"));
        assert_eq!(
            err.to_string(),
            "Failed to access store 'filestream': Backend error: permission denied"
        );

        let err = Error::ShutdownTimeout {
            open: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Registry shutdown timed out with open stores: a, b"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::conflict("k").is_retryable());
        assert!(Error::cancelled("k").is_retryable());

        assert!(!Error::decode("k", "bad").is_retryable());
        assert!(!Error::backend("disk full").is_retryable());
        assert!(!Error::RegistryClosed.is_retryable());
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
