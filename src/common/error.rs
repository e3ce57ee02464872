//! Error types for the test runner
//!
//! Messages end up verbatim in test outcomes, so they name the step input
//! (selector, url, handler) that caused them.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test runner
#[derive(Error, Debug)]
pub enum Error {
    // === Definition Errors ===
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Unknown assertion type '{0}'")]
    UnknownAssertion(String),

    #[error("Malformed step: {0}")]
    MalformedStep(String),

    #[error("No {kind} registered under '{name}'")]
    MissingHandler { kind: &'static str, name: String },

    // === Step Execution Errors ===
    #[error("No element matches selector '{0}'")]
    ElementNotFound(String),

    #[error("{operation} timed out after {ms} ms")]
    Timeout { operation: String, ms: u64 },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("'{operation}' is not supported by the {flavor} context")]
    Unsupported { operation: String, flavor: String },

    #[error("WebDriver command '{command}' failed: {message}")]
    WebDriver { command: String, message: String },

    #[error("Test '{0}' was stopped")]
    Stopped(String),

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server responded with status {status} for {url}")]
    ServerError { status: u16, url: String },

    // === Context Errors ===
    #[error("Failed to acquire {flavor} context: {reason}")]
    ContextAcquisition { flavor: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for retry and propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unresolvable definition; fatal to the test, never retried
    Configuration,
    /// An action failed against live context or network state
    StepExecution,
    /// Network-level failure; retried by the request step
    Transport,
    /// The context provider could not produce a context
    ContextAcquisition,
    /// Everything else (I/O, serialization, bugs)
    Internal,
}

impl Error {
    /// Create a timeout error for an operation
    pub fn timeout(operation: impl Into<String>, ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            ms,
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(operation: &str, flavor: &str) -> Self {
        Self::Unsupported {
            operation: operation.to_string(),
            flavor: flavor.to_string(),
        }
    }

    /// Create a WebDriver command error
    pub fn webdriver(command: &str, message: impl Into<String>) -> Self {
        Self::WebDriver {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Create a context acquisition error
    pub fn context_acquisition(flavor: &str, reason: impl Into<String>) -> Self {
        Self::ContextAcquisition {
            flavor: flavor.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a missing handler error
    pub fn missing_handler(kind: &'static str, name: &str) -> Self {
        Self::MissingHandler {
            kind,
            name: name.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownAction(_)
            | Error::UnknownAssertion(_)
            | Error::MalformedStep(_)
            | Error::MissingHandler { .. }
            | Error::Config(_)
            | Error::ConfigParse(_) => ErrorKind::Configuration,
            Error::ElementNotFound(_)
            | Error::Timeout { .. }
            | Error::Assertion(_)
            | Error::StepFailed(_)
            | Error::Unsupported { .. }
            | Error::WebDriver { .. }
            | Error::Stopped(_) => ErrorKind::StepExecution,
            Error::Transport(_) | Error::ServerError { .. } => ErrorKind::Transport,
            Error::ContextAcquisition { .. } => ErrorKind::ContextAcquisition,
            Error::Io(_)
            | Error::FileRead { .. }
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the request step should try again after this error
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Stable machine-readable code for JSON reports
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::StepExecution => "STEP_EXECUTION_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::ContextAcquisition => "CONTEXT_ACQUISITION_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Transport(format!("request timed out: {e}"))
        } else {
            Error::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(Error::Transport("connection reset".into()).is_retryable());
        assert!(Error::ServerError {
            status: 503,
            url: "http://x".into()
        }
        .is_retryable());
        assert!(!Error::Assertion("status".into()).is_retryable());
        assert!(!Error::ElementNotFound("#go".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::UnknownAction("hover".into()).code(), "CONFIGURATION_ERROR");
        assert_eq!(
            Error::context_acquisition("firefox", "no driver").code(),
            "CONTEXT_ACQUISITION_ERROR"
        );
        assert_eq!(Error::timeout("navigate", 10).code(), "STEP_EXECUTION_ERROR");
    }
}
