//! Error types for the guardrail gateway.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations,
//! split the same way the storage and tool layers are: [`StorageError`] covers the
//! persistence boundary, [`ToolError`] covers everything a tool handler can fail with
//! (including a wrapped [`StorageError`]).

/// Errors from a storage port (SQL backend or in-memory).
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The backing database driver returned an error.
    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),

    /// A required table/relation is missing (fails readiness, not liveness).
    #[error("relation missing: {relation}")]
    RelationMissing {
        /// Name of the missing table.
        relation: String,
    },

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation did not complete within its deadline.
    #[error("storage timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A value could not be serialized/deserialized to or from its persisted form.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    #[must_use]
    pub fn relation_missing(relation: impl Into<String>) -> Self {
        Self::RelationMissing { relation: relation.into() }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns true if retrying the same operation later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Backend(_))
    }

    /// Returns true if this error means the deployment itself is unhealthy (as opposed
    /// to a transient hiccup), which callers use to decide readiness vs. liveness.
    #[must_use]
    pub const fn is_hard_failure(&self) -> bool {
        matches!(self, Self::RelationMissing { .. })
    }
}

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Error from a storage port.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation failed (missing/malformed field, out-of-range enum).
    #[error("validation error: {message}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// Validation error message.
        message: String,
    },

    /// The caller referenced a session that does not exist or has expired.
    #[error("unknown or expired session: {0}")]
    UnknownSession(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal tool logic error that should never surface to a well-behaved client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The JSON-RPC error code this error maps to (see the error-kind taxonomy).
    #[must_use]
    pub const fn rpc_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => -32602,
            Self::UnknownSession(_) => -32000,
            Self::Serialization(_) => -32700,
            Self::Storage(e) if e.is_hard_failure() => -32001,
            Self::Storage(_) => -32002,
            Self::Internal(_) => -32603,
        }
    }

    /// Convert to a user-friendly error message for the MCP response body.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => format!("Invalid input for '{field}': {message}"),
            Self::UnknownSession(id) => format!("Session '{id}' is unknown or has expired; call init_session again."),
            Self::Storage(StorageError::RelationMissing { relation }) => {
                format!("Required storage relation '{relation}' is unavailable.")
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_retryable() {
        assert!(StorageError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!StorageError::relation_missing("prevention_rules").is_retryable());
        assert!(StorageError::relation_missing("prevention_rules").is_hard_failure());
    }

    #[test]
    fn tool_error_user_message() {
        let err = ToolError::validation("command", "must not be empty");
        assert!(err.to_user_message().contains("command"));
        assert!(err.to_user_message().contains("must not be empty"));
    }

    #[test]
    fn tool_error_rpc_codes() {
        assert_eq!(ToolError::validation("f", "m").rpc_code(), -32602);
        assert_eq!(ToolError::UnknownSession("x".into()).rpc_code(), -32000);
        assert_eq!(
            ToolError::Storage(StorageError::relation_missing("t")).rpc_code(),
            -32001
        );
    }
}
