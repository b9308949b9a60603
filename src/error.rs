//! Error handling module for GentooTUI
//!
//! Typed errors for configuration and validation problems, so callers can
//! tell a bad config file from a bad value. Stage faults and I/O plumbing
//! travel as `anyhow` errors with context.

use thiserror::Error;

/// Main error type for GentooTUI
#[derive(Error, Debug)]
pub enum GentooTuiError {
    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (config values, stage sequence)
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for GentooTUI operations
pub type Result<T> = std::result::Result<T, GentooTuiError>;

impl GentooTuiError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GentooTuiError::config("missing disk section");
        assert_eq!(err.to_string(), "Configuration error: missing disk section");

        let err = GentooTuiError::validation("hostname too long");
        assert_eq!(err.to_string(), "Validation error: hostname too long");
    }
}
