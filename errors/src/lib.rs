//! # Attest Errors
//!
//! Error taxonomy shared by every layer of the data-access and authorization
//! core.
//!
//! - Uses `thiserror` for structured error definitions
//! - Named fields on every variant so log lines carry context
//! - Separates retryable infrastructure failures from caller mistakes and
//!   authorization denials

use serde::Serialize;
use thiserror::Error;

/// Coarse classification used when an error crosses the service boundary.
///
/// Callers only ever see one of these; the detailed variant stays in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicErrorKind {
    /// Identity could not be established.
    Unauthenticated,
    /// The caller is not allowed to perform the operation.
    AccessDenied,
    /// The referenced entity does not exist.
    NotFound,
    /// The request was well formed but not acceptable in the current state.
    Rejected,
    /// Infrastructure failed; the request may be retried.
    Unavailable,
}

impl PublicErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            PublicErrorKind::Unauthenticated => "authentication required",
            PublicErrorKind::AccessDenied => "access denied",
            PublicErrorKind::NotFound => "not found",
            PublicErrorKind::Rejected => "request rejected",
            PublicErrorKind::Unavailable => "data temporarily unavailable",
        }
    }
}

/// Errors raised by the credential vault, connection cache, authorization
/// resolvers and submission workflow.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    #[error("Not found: {resource}:{id}")]
    NotFound { resource: String, id: String },

    #[error("Ciphertext rejected: {reason}")]
    CorruptCiphertext { reason: String },

    #[error("Connection to client {client_id} unavailable: {reason}")]
    ConnectionUnavailable { client_id: String, reason: String },

    /// Carries no detail on purpose: unknown users and missing permissions
    /// must be indistinguishable.
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid transition from {from} via {action}")]
    InvalidTransition { from: String, action: String },

    #[error("Precondition failed on {field}: {reason}")]
    ValidationPrecondition { field: String, reason: String },

    #[error("Client data unavailable for this request")]
    ClientDataUnavailable,

    #[error("Authentication failed: {reason}")]
    Unauthenticated { reason: String },

    #[error("Invalid {kind} identifier: {reason}")]
    InvalidIdentifier { kind: String, reason: String },

    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Concurrent modification of {resource}:{id}")]
    Conflict { resource: String, id: String },

    #[error("Database operation {operation} failed: {reason}")]
    Database { operation: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String }
}

impl AccessError {
    pub fn not_found(resource: impl Into<String>, id: impl ToString) -> Self {
        AccessError::NotFound {
            resource: resource.into(),
            id: id.to_string()
        }
    }

    pub fn database(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AccessError::Database {
            operation: operation.into(),
            reason: err.to_string()
        }
    }

    pub fn precondition(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AccessError::ValidationPrecondition {
            field: field.into(),
            reason: reason.into()
        }
    }

    /// Infrastructure failures that a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AccessError::ConnectionUnavailable { .. }
                | AccessError::ClientDataUnavailable
                | AccessError::Timeout { .. }
                | AccessError::Conflict { .. }
                | AccessError::Database { .. }
        )
    }

    /// Decryption failures are security events and get logged separately.
    pub fn is_security_event(&self) -> bool {
        matches!(self, AccessError::CorruptCiphertext { .. })
    }

    pub fn public_kind(&self) -> PublicErrorKind {
        match self {
            AccessError::Unauthenticated { .. } => PublicErrorKind::Unauthenticated,
            AccessError::PermissionDenied => PublicErrorKind::AccessDenied,
            AccessError::NotFound { .. } => PublicErrorKind::NotFound,
            AccessError::InvalidTransition { .. }
            | AccessError::ValidationPrecondition { .. }
            | AccessError::InvalidIdentifier { .. }
            | AccessError::Cancelled { .. } => PublicErrorKind::Rejected,
            AccessError::CorruptCiphertext { .. }
            | AccessError::ConnectionUnavailable { .. }
            | AccessError::ClientDataUnavailable
            | AccessError::Timeout { .. }
            | AccessError::Conflict { .. }
            | AccessError::Database { .. }
            | AccessError::Configuration { .. } => PublicErrorKind::Unavailable
        }
    }

    /// Generic message safe to return to callers.
    pub fn public_message(&self) -> &'static str {
        self.public_kind().message()
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
