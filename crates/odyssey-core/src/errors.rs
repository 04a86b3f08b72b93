//! Error types for Odyssey Core.
//!
//! `AuthzError` is the single typed outcome surfaced by the authorization
//! facade. Collaborator failures (`ApiError`, `LedgerError`, `StoreError`)
//! are wrapped so callers can still tell a lost connection apart from a
//! negotiation that was rejected or simply never answered.

use thiserror::Error;

use crate::negotiation::NegotiationStatus;
use crate::session::SessionStatus;

// ============================================================================
// Collaborator Errors
// ============================================================================

/// Errors from the remote approval backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced an HTTP response (DNS, TLS, connect, timeout).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("request failed ({status}): {message}")]
    Status {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// The response body did not match the expected schema.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Errors from the ledger service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The session key was already invalidated.
    #[error("session key already revoked")]
    AlreadyRevoked,

    /// The ledger has no record of the session key.
    #[error("unknown session key")]
    UnknownSessionKey,

    #[error("ledger rejected the operation: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether the failure still leaves the session key unusable, so an
    /// optimistic local revoke can stand.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, LedgerError::AlreadyRevoked | LedgerError::UnknownSessionKey)
    }
}

/// Errors from the secure key/value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Authorization Errors
// ============================================================================

/// Typed outcome of every authorization operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthzError {
    /// A state change was attempted out of a terminal state.
    #[error("invalid transition: {entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The spend would exceed the remaining allowance for the mint.
    #[error("limit exceeded for {mint}: requested {requested}, remaining {remaining}")]
    LimitExceeded {
        mint: String,
        requested: f64,
        remaining: f64,
    },

    /// The owner rejected the request on the approving device.
    #[error("request {request_id} was rejected")]
    Rejected { request_id: String },

    /// The backend reported the request as expired.
    #[error("request {request_id} expired")]
    RequestExpired { request_id: String },

    /// The poll budget ran out while the request was still pending.
    ///
    /// `transport_failures` counts the checks that never reached the backend.
    #[error("request {request_id} still pending after {attempts} checks ({transport_failures} failed to reach the backend)")]
    Timeout {
        request_id: String,
        attempts: u32,
        transport_failures: u32,
    },

    /// The backend could not be reached or answered with an error.
    #[error("transport error: {0}")]
    Transport(#[from] ApiError),

    /// A referenced agent, session, request, or transaction does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Untrusted input failed validation before reaching the backend.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No wallet has been created on this device yet.
    #[error("wallet not onboarded")]
    NotOnboarded,

    /// The session cannot authorize spending in its current state.
    #[error("session {session_id} is {status}")]
    SessionNotActive {
        session_id: String,
        status: SessionStatus,
    },

    /// The caller abandoned the operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthzError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AuthzError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn negotiation_transition(
        entity: &'static str,
        from: NegotiationStatus,
        to: NegotiationStatus,
    ) -> Self {
        AuthzError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub(crate) fn session_transition(from: SessionStatus, to: SessionStatus) -> Self {
        AuthzError::InvalidTransition {
            entity: "session",
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether a fresh attempt (a new request, or the same call later) may
    /// succeed. `LimitExceeded` and `InvalidTransition` never qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthzError::Rejected { .. }
                | AuthzError::RequestExpired { .. }
                | AuthzError::Timeout { .. }
                | AuthzError::Transport(_)
                | AuthzError::Cancelled
        ) || matches!(self, AuthzError::Ledger(LedgerError::Unavailable(_)))
    }

    /// Whether this is a negotiation outcome (re-initiate a fresh request).
    pub fn is_negotiation_outcome(&self) -> bool {
        matches!(
            self,
            AuthzError::Rejected { .. }
                | AuthzError::RequestExpired { .. }
                | AuthzError::Timeout { .. }
                | AuthzError::Transport(_)
        )
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_exceeded_is_not_retryable() {
        let err = AuthzError::LimitExceeded {
            mint: "native".into(),
            requested: 0.25,
            remaining: 0.2,
        };
        assert!(!err.is_retryable());
        assert!(!err.is_negotiation_outcome());
    }

    #[test]
    fn test_invalid_transition_is_not_retryable() {
        let err = AuthzError::negotiation_transition(
            "pairing request",
            NegotiationStatus::Approved,
            NegotiationStatus::Rejected,
        );
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "invalid transition: pairing request cannot move from approved to rejected"
        );
    }

    #[test]
    fn test_transport_and_timeout_are_distinct() {
        let transport = AuthzError::from(ApiError::Transport("connection reset".into()));
        let timeout = AuthzError::Timeout {
            request_id: "req-1".into(),
            attempts: 60,
            transport_failures: 0,
        };
        assert!(transport.is_retryable());
        assert!(timeout.is_retryable());
        assert_ne!(transport, timeout);
        assert!(matches!(transport, AuthzError::Transport(_)));
    }

    #[test]
    fn test_ledger_idempotent_errors() {
        assert!(LedgerError::AlreadyRevoked.is_idempotent());
        assert!(LedgerError::UnknownSessionKey.is_idempotent());
        assert!(!LedgerError::Unavailable("rpc down".into()).is_idempotent());
        assert!(!LedgerError::Rejected("not authority".into()).is_idempotent());
    }

    #[test]
    fn test_status_error_message() {
        let err = ApiError::Status {
            status: 404,
            message: "pairing code not found".into(),
            code: Some("PAIRING_NOT_FOUND".into()),
        };
        assert_eq!(err.to_string(), "request failed (404): pairing code not found");
    }
}
