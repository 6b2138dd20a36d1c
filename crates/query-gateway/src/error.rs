//! Error taxonomy shared by the query pipeline, the tools and the orchestrator.
//!
//! Every stage of the internal query pipeline returns `Result<_, GatewayError>`
//! so the tool boundary can turn each kind into its own short user-facing line.

use std::time::Duration;
use thiserror::Error;

/// Phase of a bounded operation that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Command,
    Orchestration,
    Search,
}

impl TimeoutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Command => "command",
            TimeoutPhase::Orchestration => "orchestration",
            TimeoutPhase::Search => "search",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Required credential or connection string is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{} phase timed out after {}ms", .phase.as_str(), .after.as_millis())]
    Timeout { phase: TimeoutPhase, after: Duration },

    /// Generated SQL failed validation; nothing was executed.
    #[error("generated SQL was not safe SELECT-only")]
    SafetyViolation { sql: String },

    #[error("external service error: {0}")]
    ExternalService(String),

    /// Driver-level failure carrying the vendor error code.
    #[error("SQL#{code}: {message}")]
    Database { code: i32, message: String },

    #[error("completion service error: {0}")]
    Completion(String),
}

impl GatewayError {
    pub fn timeout(phase: TimeoutPhase, after: Duration) -> Self {
        GatewayError::Timeout { phase, after }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }

    /// Short name of the error kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "ConfigurationError",
            GatewayError::Timeout { .. } => "TimeoutError",
            GatewayError::SafetyViolation { .. } => "SafetyViolation",
            GatewayError::ExternalService(_) => "ExternalServiceError",
            GatewayError::Database { .. } => "DatabaseError",
            GatewayError::Completion(_) => "CompletionError",
        }
    }
}

impl From<&rusqlite::Error> for GatewayError {
    fn from(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ffi, msg) => GatewayError::Database {
                code: ffi.extended_code,
                message: msg.clone().unwrap_or_else(|| ffi.to_string()),
            },
            _ => GatewayError::Database {
                code: -1,
                message: err.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::from(&err)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_phase() {
        let err = GatewayError::timeout(TimeoutPhase::Connect, Duration::from_millis(250));
        assert_eq!(err.to_string(), "connect phase timed out after 250ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_sqlite_failure_keeps_vendor_code() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: GatewayError = conn
            .execute("SELECT * FROM missing_table", [])
            .unwrap_err()
            .into();
        match err {
            GatewayError::Database { code, message } => {
                assert_eq!(code, 1);
                assert!(message.contains("missing_table"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
