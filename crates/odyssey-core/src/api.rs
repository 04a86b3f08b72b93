//! Contract with the remote approval backend.
//!
//! The backend relays requests to the owner's approving device and reports
//! their status. Request and response bodies are JSON with camelCase keys;
//! any non-2xx answer carries an [`ApiErrorBody`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::limits::SpendingLimit;
use crate::negotiation::NegotiationStatus;
use crate::poller::Observation;
use crate::session::Session;
use crate::transactions::TransactionStatus;

// ============================================================================
// Endpoints
// ============================================================================

pub const PAIRING_REQUEST_PATH: &str = "/api/pairing/request";
pub const PAIRING_STATUS_PATH: &str = "/api/pairing";
pub const SESSION_REQUEST_PATH: &str = "/api/request-session";
pub const SESSION_STATUS_PATH: &str = "/api/session-details";
pub const TRANSFER_PATH: &str = "/api/session/transfer";
pub const TRANSFER_TOKEN_PATH: &str = "/api/session/transfer-token";
pub const SIGN_AND_SEND_PATH: &str = "/api/session/sign-and-send";

// ============================================================================
// Request Bodies
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingParams {
    pub code: String,
    pub agent_id: String,
    pub agent_name: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub agent_id: String,
    pub agent_name: String,
    pub wallet_pubkey: String,
    pub session_pubkey: String,
    pub duration_seconds: u64,
    /// Session-key signature over the canonical request message, hex.
    pub signature: String,
    /// Unix milliseconds, bound into the signed message.
    pub timestamp: u64,
    pub auth_secret: String,
    pub limits: Vec<SpendingLimit>,
}

impl std::fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParams")
            .field("agent_id", &self.agent_id)
            .field("session_pubkey", &self.session_pubkey)
            .field("duration_seconds", &self.duration_seconds)
            .field("timestamp", &self.timestamp)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub wallet_pubkey: String,
    pub session_pubkey: String,
    pub session_secret_key: String,
    pub destination: String,
    pub amount_sol: f64,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransferParams {
    pub wallet_pubkey: String,
    pub session_pubkey: String,
    pub session_secret_key: String,
    pub destination: String,
    pub mint: String,
    /// Base units.
    pub amount: u64,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignAndSendParams {
    /// Base64-encoded serialized transaction.
    pub transaction: String,
    pub session_secret_key: String,
    pub session_pubkey: String,
}

macro_rules! redacted_debug {
    ($ty:ident, $($field:ident),*) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    .field("session_secret_key", &"<redacted>")
                    .finish()
            }
        }
    };
}

redacted_debug!(TransferParams, wallet_pubkey, session_pubkey, destination, amount_sol);
redacted_debug!(TokenTransferParams, wallet_pubkey, session_pubkey, destination, mint, amount);
redacted_debug!(SignAndSendParams, session_pubkey);

// ============================================================================
// Response Bodies
// ============================================================================

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub request_id: String,
    pub status: NegotiationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<String>,
}

impl std::fmt::Debug for PairingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingResponse")
            .field("request_id", &self.request_id)
            .field("status", &self.status)
            .field("wallet_pubkey", &self.wallet_pubkey)
            .field("auth_secret", &self.auth_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Observation for PairingResponse {
    fn status(&self) -> NegotiationStatus {
        self.status
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub request_id: String,
    pub status: NegotiationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl Observation for SessionResponse {
    fn status(&self) -> NegotiationStatus {
        self.status
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub signature: String,
    pub status: TransactionStatus,
}

/// Body of every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiErrorBody {
    pub fn into_error(self, status: u16) -> ApiError {
        ApiError::Status {
            status,
            message: self.error,
            code: self.code,
        }
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// The remote approval backend.
#[async_trait]
pub trait ApprovalBackend: Send + Sync {
    async fn create_pairing(&self, params: &PairingParams) -> Result<PairingResponse, ApiError>;

    async fn check_pairing(&self, request_id: &str) -> Result<PairingResponse, ApiError>;

    async fn create_session_request(
        &self,
        params: &SessionParams,
    ) -> Result<SessionResponse, ApiError>;

    async fn check_session_request(&self, request_id: &str) -> Result<SessionResponse, ApiError>;

    async fn transfer_native(&self, params: &TransferParams) -> Result<TransferResponse, ApiError>;

    async fn transfer_token(
        &self,
        params: &TokenTransferParams,
    ) -> Result<TransferResponse, ApiError>;

    async fn sign_and_send(&self, params: &SignAndSendParams)
        -> Result<TransferResponse, ApiError>;
}
