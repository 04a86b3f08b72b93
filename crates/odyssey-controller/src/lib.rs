//! Odyssey Controller - CLI for delegated spending authorization
//!
//! This crate provides a command-line interface for:
//! - Onboarding the wallet and showing balances
//! - Pairing agents and managing their credentials
//! - Requesting, inspecting, and revoking spending sessions
//! - Sending transfers through a session and settling them

pub mod cli;
pub mod config;
pub mod output;
pub mod store;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};
pub use store::FileSecureStore;

use odyssey_core::errors::{ApiError, AuthzError, LedgerError};

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting and automation:
/// - 0: Success - operation completed successfully
/// - 1: General error - unspecified error occurred
/// - 2: Rejected - the owner rejected the request, or it expired
/// - 3: Timeout - approval was still pending when polling gave up
/// - 4: Connection failed - the backend or ledger could not be reached
/// - 5: Invalid input - bad arguments or a disallowed state change
/// - 6: Not found - unknown agent, session, or transaction, or no wallet yet
/// - 7: Limit exceeded - the spend does not fit the session allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Rejected = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    NotFound = 6,
    LimitExceeded = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&AuthzError> for ExitCode {
    fn from(err: &AuthzError) -> Self {
        match err {
            AuthzError::Rejected { .. } | AuthzError::RequestExpired { .. } => ExitCode::Rejected,
            AuthzError::Timeout { .. } => ExitCode::Timeout,
            AuthzError::Transport(ApiError::Status { status, .. }) if *status < 500 => {
                ExitCode::InvalidInput
            }
            AuthzError::Transport(_) | AuthzError::Ledger(LedgerError::Unavailable(_)) => {
                ExitCode::ConnectionFailed
            }
            AuthzError::InvalidRequest(_)
            | AuthzError::InvalidTransition { .. }
            | AuthzError::SessionNotActive { .. }
            | AuthzError::Ledger(LedgerError::InvalidAddress(_)) => ExitCode::InvalidInput,
            AuthzError::NotFound { .. } | AuthzError::NotOnboarded => ExitCode::NotFound,
            AuthzError::LimitExceeded { .. } => ExitCode::LimitExceeded,
            AuthzError::Cancelled | AuthzError::Ledger(_) | AuthzError::Store(_) => {
                ExitCode::GeneralError
            }
        }
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::Rejected => "REJECTED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotFound => "NOT_FOUND",
            ExitCode::LimitExceeded => "LIMIT_EXCEEDED",
        }
    }

    /// Get a human-readable description of the exit code
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::Rejected => "The request was rejected or expired",
            ExitCode::Timeout => "Approval was not given in time",
            ExitCode::ConnectionFailed => "Could not reach the backend or ledger",
            ExitCode::InvalidInput => "Invalid arguments or state change",
            ExitCode::NotFound => "Unknown item, or wallet not onboarded",
            ExitCode::LimitExceeded => "Spend exceeds the session allowance",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use odyssey_core::session::SessionStatus;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::Rejected as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
        assert_eq!(ExitCode::NotFound as i32, 6);
        assert_eq!(ExitCode::LimitExceeded as i32, 7);
        assert_eq!(i32::from(ExitCode::Timeout), 3);
    }

    #[test]
    fn test_exit_code_from_authz_error() {
        let cases = [
            (
                AuthzError::Rejected {
                    request_id: "r".into(),
                },
                ExitCode::Rejected,
            ),
            (
                AuthzError::RequestExpired {
                    request_id: "r".into(),
                },
                ExitCode::Rejected,
            ),
            (
                AuthzError::Timeout {
                    request_id: "r".into(),
                    attempts: 60,
                    transport_failures: 59,
                },
                ExitCode::Timeout,
            ),
            (
                AuthzError::Transport(ApiError::Transport("refused".into())),
                ExitCode::ConnectionFailed,
            ),
            (
                AuthzError::Transport(ApiError::Status {
                    status: 503,
                    message: "down".into(),
                    code: None,
                }),
                ExitCode::ConnectionFailed,
            ),
            (
                AuthzError::Transport(ApiError::Status {
                    status: 400,
                    message: "Invalid pairing code".into(),
                    code: None,
                }),
                ExitCode::InvalidInput,
            ),
            (AuthzError::NotOnboarded, ExitCode::NotFound),
            (
                AuthzError::SessionNotActive {
                    session_id: "s".into(),
                    status: SessionStatus::Expired,
                },
                ExitCode::InvalidInput,
            ),
            (
                AuthzError::LimitExceeded {
                    mint: "SOL".into(),
                    requested: 1.0,
                    remaining: 0.5,
                },
                ExitCode::LimitExceeded,
            ),
            (AuthzError::Cancelled, ExitCode::GeneralError),
        ];
        for (err, expected) in cases {
            assert_eq!(ExitCode::from(&err), expected, "{err}");
        }
    }

    #[test]
    fn test_exit_code_names_and_descriptions() {
        assert_eq!(ExitCode::LimitExceeded.name(), "LIMIT_EXCEEDED");
        assert_eq!(ExitCode::NotFound.name(), "NOT_FOUND");
        for code in [
            ExitCode::Success,
            ExitCode::GeneralError,
            ExitCode::Rejected,
            ExitCode::Timeout,
            ExitCode::ConnectionFailed,
            ExitCode::InvalidInput,
            ExitCode::NotFound,
            ExitCode::LimitExceeded,
        ] {
            assert!(!code.description().is_empty());
            let _ = code.to_exit_code();
        }
    }
}
