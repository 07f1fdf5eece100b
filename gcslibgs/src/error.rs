//! Error and result definitions for GCS

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Infrastructure error types
#[derive(Error, Debug)]
pub enum GcsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Result type alias for GCS operations
pub type GcsResult<T> = Result<T, GcsError>;

/// Terminal result of a command or mission operation
///
/// Every asynchronous operation resolves its callback with exactly one of
/// these values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    /// No vehicle with an autopilot has been discovered
    NoSystem,
    /// The link failed to send
    ConnectionError,
    /// A conflicting request or transfer is already in flight
    Busy,
    CommandDenied,
    InvalidSequence,
    NoSpace,
    /// Retries exhausted
    Timeout,
    /// Rejected locally before anything was sent
    InvalidArgument,
    Cancelled,
    /// The vehicle answered with something that has no mapping
    Unknown,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Success => "Success",
            Outcome::NoSystem => "No system connected",
            Outcome::ConnectionError => "Connection error",
            Outcome::Busy => "Busy",
            Outcome::CommandDenied => "Command denied",
            Outcome::InvalidSequence => "Invalid sequence",
            Outcome::NoSpace => "No space on vehicle",
            Outcome::Timeout => "Timeout",
            Outcome::InvalidArgument => "Invalid argument",
            Outcome::Cancelled => "Cancelled",
            Outcome::Unknown => "Unknown error",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GcsError::Config("test".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::NoSpace.to_string(), "No space on vehicle");
        assert!(Outcome::Success.is_success());
        assert!(!Outcome::Timeout.is_success());
    }
}
