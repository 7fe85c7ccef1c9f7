//! Structured error types for HoldOn
//!
//! Every failure on the bridge maps onto one of these variants. Callers on
//! the agent side never see them as crashes: the adapter folds the
//! fail-open ones into an approval and reports the rest as tool content.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for HoldOn operations
#[derive(Error, Debug)]
pub enum HoldOnError {
    // =========================================================================
    // Broker Errors
    // =========================================================================
    /// The broker could not acquire its listening port
    #[error("failed to bind feedback broker on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Bridge Errors
    // =========================================================================
    /// The adapter could not reach the broker, or lost it mid-exchange
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// A frame that is not JSON or carries an unknown `type`
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// No answer within the deadline
    #[error("no feedback after {duration:?}")]
    Timeout { duration: Duration },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Invalid tool arguments
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    // =========================================================================
    // External Error Wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),
}

impl HoldOnError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Errors the adapter turns into an approval instead of reporting.
    ///
    /// A missing or silent human must never block the agent.
    pub fn is_fail_open(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_) => true,

            Self::Bind { .. }
            | Self::MalformedFrame { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidConfig { .. }
            | Self::Json(_)
            | Self::Toml(_) => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Bind { addr, .. } => format!(
                "Port {} is already in use. Close the other HoldOn host and restart.",
                addr.port()
            ),
            Self::InvalidArgument { name, .. } => {
                format!("Error: {} parameter is required", name)
            }
            Self::Connection { .. } => {
                "The feedback panel is not reachable. Continuing without review.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<toml::de::Error> for HoldOnError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for HoldOnError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HoldOnError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }
}

/// Result type alias using HoldOnError
pub type Result<T> = std::result::Result<T, HoldOnError>;
