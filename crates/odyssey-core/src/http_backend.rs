#![cfg(feature = "http-backend")]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::{
    ApiErrorBody, ApprovalBackend, PairingParams, PairingResponse, SessionParams, SessionResponse,
    SignAndSendParams, TokenTransferParams, TransferParams, TransferResponse, PAIRING_REQUEST_PATH,
    PAIRING_STATUS_PATH, SESSION_REQUEST_PATH, SESSION_STATUS_PATH, SIGN_AND_SEND_PATH,
    TRANSFER_PATH, TRANSFER_TOKEN_PATH,
};
use crate::errors::ApiError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`ApprovalBackend`] over HTTP+JSON.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &HttpBackendConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()));
    }
    Err(error_from_body(status, &bytes))
}

fn error_from_body(status: StatusCode, bytes: &[u8]) -> ApiError {
    match serde_json::from_slice::<ApiErrorBody>(bytes) {
        Ok(body) if !body.error.is_empty() => body.into_error(status.as_u16()),
        _ => ApiError::Status {
            status: status.as_u16(),
            message: format!("Request failed: {}", status.as_u16()),
            code: None,
        },
    }
}

/// Path segment for a backend-issued id.
fn segment(id: &str) -> Result<&str, ApiError> {
    if id.is_empty() || id.contains(&['/', '?', '#'][..]) {
        return Err(ApiError::Decode(format!("invalid request id: {id:?}")));
    }
    Ok(id)
}

#[async_trait]
impl ApprovalBackend for HttpBackend {
    async fn create_pairing(&self, params: &PairingParams) -> Result<PairingResponse, ApiError> {
        self.post(PAIRING_REQUEST_PATH, params).await
    }

    async fn check_pairing(&self, request_id: &str) -> Result<PairingResponse, ApiError> {
        let path = format!("{}/{}", PAIRING_STATUS_PATH, segment(request_id)?);
        self.get(&path).await
    }

    async fn create_session_request(
        &self,
        params: &SessionParams,
    ) -> Result<SessionResponse, ApiError> {
        self.post(SESSION_REQUEST_PATH, params).await
    }

    async fn check_session_request(&self, request_id: &str) -> Result<SessionResponse, ApiError> {
        let path = format!("{}/{}", SESSION_STATUS_PATH, segment(request_id)?);
        self.get(&path).await
    }

    async fn transfer_native(&self, params: &TransferParams) -> Result<TransferResponse, ApiError> {
        self.post(TRANSFER_PATH, params).await
    }

    async fn transfer_token(
        &self,
        params: &TokenTransferParams,
    ) -> Result<TransferResponse, ApiError> {
        self.post(TRANSFER_TOKEN_PATH, params).await
    }

    async fn sign_and_send(
        &self,
        params: &SignAndSendParams,
    ) -> Result<TransferResponse, ApiError> {
        self.post(SIGN_AND_SEND_PATH, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let backend = HttpBackend::new(&HttpBackendConfig {
            base_url: "https://relay.example.com/".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            backend.url(PAIRING_REQUEST_PATH),
            "https://relay.example.com/api/pairing/request"
        );
    }

    #[test]
    fn test_error_body_message_is_used() {
        let err = error_from_body(
            StatusCode::NOT_FOUND,
            br#"{"error":"Pairing code not found","code":"NOT_FOUND"}"#,
        );
        assert_eq!(
            err,
            ApiError::Status {
                status: 404,
                message: "Pairing code not found".into(),
                code: Some("NOT_FOUND".into()),
            }
        );
    }

    #[test]
    fn test_unparseable_error_body() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(err.to_string(), "request failed (502): Request failed: 502");
    }

    #[test]
    fn test_segment_rejects_path_injection() {
        assert!(segment("abc-123").is_ok());
        assert!(segment("../admin").is_err());
        assert!(segment("").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let backend = HttpBackend::new(&HttpBackendConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = backend.check_pairing("req-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
