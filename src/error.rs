//! Error types for the replica router.
//!
//! This module defines all error types using `thiserror`. Routing errors are
//! never recovered by switching pools: each variant tells the caller what went
//! wrong so it can decide whether to retry, escalate, or give up.

use crate::db::PoolKey;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    /// `end` without a matching `begin`, or finalization of a non-owning unit.
    #[error("Unit-of-work stack imbalance: {message}")]
    StackImbalance { message: String },

    #[error("Connection pool '{pool}' exhausted: no connection within {timeout_secs}s")]
    PoolExhausted { pool: PoolKey, timeout_secs: u64 },

    #[error("Replica unavailable: {message}")]
    ReplicaUnavailable { message: String },

    /// Finalization of an independent unit failed while its parent was suspended.
    #[error("Independent unit of work '{unit}' failed to finalize: {message}")]
    FinalizationConflict { unit: String, message: String },

    #[error("Unit of work '{unit}' was rolled back because a participant marked it rollback-only")]
    UnexpectedRollback { unit: String },

    #[error("No active unit of work in this context")]
    NoActiveUnitOfWork,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RouterError {
    /// Create a stack imbalance error.
    pub fn stack_imbalance(message: impl Into<String>) -> Self {
        Self::StackImbalance {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error for the given pool.
    pub fn pool_exhausted(pool: PoolKey, timeout_secs: u64) -> Self {
        Self::PoolExhausted { pool, timeout_secs }
    }

    /// Create a replica unavailable error.
    pub fn replica_unavailable(message: impl Into<String>) -> Self {
        Self::ReplicaUnavailable {
            message: message.into(),
        }
    }

    /// Create a finalization conflict error for an independent unit of work.
    pub fn finalization_conflict(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FinalizationConflict {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create an unexpected rollback error.
    pub fn unexpected_rollback(unit: impl Into<String>) -> Self {
        Self::UnexpectedRollback { unit: unit.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Retry later or raise max_connections / acquire_timeout for this pool")
            }
            Self::ReplicaUnavailable { .. } => Some(
                "Retry, or run the work in a non-read-only unit of work to target the primary",
            ),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. }
                | Self::ReplicaUnavailable { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
        )
    }

    /// Check if this error reports a caller bug rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::StackImbalance { .. } | Self::NoActiveUnitOfWork | Self::Internal { .. }
        )
    }
}

/// Convert sqlx errors to RouterError.
impl From<sqlx::Error> for RouterError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => RouterError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                RouterError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, constraints and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => RouterError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => RouterError::timeout(
                "connection pool acquire",
                Duration::from_secs(crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS),
            ),
            sqlx::Error::PoolClosed => {
                RouterError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => RouterError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => RouterError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => RouterError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                RouterError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                RouterError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                RouterError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => RouterError::internal("Database worker crashed"),
            _ => RouterError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for routing operations.
pub type RouterResult<T> = Result<T, RouterError>;
