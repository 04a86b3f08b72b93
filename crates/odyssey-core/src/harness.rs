//! Test harness for Odyssey core functionality.
//!
//! Scriptable fakes for the approval backend and ledger, a sleeper that
//! records instead of waiting, and a [`TestRig`] that wires them into an
//! [`Authorizer`] with a manual clock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    ApprovalBackend, PairingParams, PairingResponse, SessionParams, SessionResponse,
    SignAndSendParams, TokenTransferParams, TransferParams, TransferResponse,
};
use crate::authz::{AuthzConfig, Authorizer, Collaborators};
use crate::clock::{ManualClock, Sleeper};
use crate::errors::{ApiError, LedgerError};
use crate::ledger::{LedgerService, LedgerSpend};
use crate::limits::SpendingLimit;
use crate::negotiation::NegotiationStatus;
use crate::session::{expiry_for, Session, SessionStatus};
use crate::store::InMemorySecureStore;
use crate::transactions::TransactionStatus;
use crate::types::{Agent, TokenBalance};

/// Fixed start of the manual clock (2023-11-14T22:13:20Z).
pub const START_MS: u64 = 1_700_000_000_000;

/// Wallet address the fake backend hands out on pairing approval.
pub const FAKE_WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

pub const FAKE_AUTH_SECRET: &str = "auth-secret-for-tests";

/// A well-formed destination address.
pub const VALID_DESTINATION: &str = "SysvarRent111111111111111111111111111111111";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Sleeper
// ============================================================================

/// Records requested waits and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        lock(&self.slept).len()
    }

    pub fn durations(&self) -> Vec<Duration> {
        lock(&self.slept).clone()
    }

    pub fn total(&self) -> Duration {
        lock(&self.slept).iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.slept).push(duration);
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Approval backend
// ============================================================================

type Scripted = Result<NegotiationStatus, ApiError>;

#[derive(Default)]
struct BackendState {
    next_id: u32,
    create_status: Option<NegotiationStatus>,
    create_error: Option<ApiError>,
    pairing_script: VecDeque<Scripted>,
    session_script: VecDeque<Scripted>,
    session_payload_status: Option<SessionStatus>,
    transfer_status: Option<TransactionStatus>,
    transfer_error: Option<ApiError>,
    pairing_creates: u32,
    session_creates: u32,
    pairing_checks: u32,
    session_checks: u32,
    session_params: HashMap<String, SessionParams>,
    last_session_request: Option<String>,
    native_transfers: Vec<TransferParams>,
    token_transfers: Vec<TokenTransferParams>,
    submitted: Vec<SignAndSendParams>,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-process [`ApprovalBackend`] driven by per-request status scripts.
///
/// Status checks pop the next scripted answer; an empty script answers
/// `pending`.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned directly by the create calls (default `pending`).
    pub fn set_create_status(&self, status: NegotiationStatus) {
        lock(&self.state).create_status = Some(status);
    }

    /// Fail the next create call.
    pub fn fail_next_create(&self, err: ApiError) {
        lock(&self.state).create_error = Some(err);
    }

    pub fn script_pairing(&self, answers: impl IntoIterator<Item = Scripted>) {
        lock(&self.state).pairing_script.extend(answers);
    }

    pub fn script_session(&self, answers: impl IntoIterator<Item = Scripted>) {
        lock(&self.state).session_script.extend(answers);
    }

    /// Status of the session payload carried by an approval (default `active`).
    pub fn set_session_payload_status(&self, status: SessionStatus) {
        lock(&self.state).session_payload_status = Some(status);
    }

    /// Status returned by transfer submissions (default `confirmed`).
    pub fn set_transfer_status(&self, status: TransactionStatus) {
        lock(&self.state).transfer_status = Some(status);
    }

    pub fn fail_next_transfer(&self, err: ApiError) {
        lock(&self.state).transfer_error = Some(err);
    }

    pub fn pairing_creates(&self) -> u32 {
        lock(&self.state).pairing_creates
    }

    pub fn session_creates(&self) -> u32 {
        lock(&self.state).session_creates
    }

    pub fn pairing_checks(&self) -> u32 {
        lock(&self.state).pairing_checks
    }

    pub fn session_checks(&self) -> u32 {
        lock(&self.state).session_checks
    }

    pub fn last_session_params(&self) -> Option<SessionParams> {
        let state = lock(&self.state);
        state
            .last_session_request
            .as_ref()
            .and_then(|id| state.session_params.get(id))
            .cloned()
    }

    pub fn native_transfers(&self) -> Vec<TransferParams> {
        lock(&self.state).native_transfers.clone()
    }

    pub fn token_transfers(&self) -> Vec<TokenTransferParams> {
        lock(&self.state).token_transfers.clone()
    }

    pub fn submitted(&self) -> Vec<SignAndSendParams> {
        lock(&self.state).submitted.clone()
    }

    fn pairing_response(request_id: &str, status: NegotiationStatus) -> PairingResponse {
        let approved = status == NegotiationStatus::Approved;
        PairingResponse {
            request_id: request_id.to_string(),
            status,
            wallet_pubkey: approved.then(|| FAKE_WALLET.to_string()),
            auth_secret: approved.then(|| FAKE_AUTH_SECRET.to_string()),
        }
    }

    fn session_response(
        state: &BackendState,
        request_id: &str,
        status: NegotiationStatus,
    ) -> SessionResponse {
        let session = match (status, state.session_params.get(request_id)) {
            (NegotiationStatus::Approved, Some(params)) => Some(Session {
                id: format!("session-{request_id}"),
                agent_id: params.agent_id.clone(),
                wallet_pubkey: params.wallet_pubkey.clone(),
                session_pubkey: params.session_pubkey.clone(),
                limits: params.limits.clone(),
                duration_seconds: params.duration_seconds,
                created_at: params.timestamp,
                expires_at: expiry_for(params.timestamp, params.duration_seconds),
                status: state
                    .session_payload_status
                    .unwrap_or(SessionStatus::Active),
                spent: Vec::new(),
            }),
            _ => None,
        };
        SessionResponse {
            request_id: request_id.to_string(),
            status,
            session,
        }
    }

    fn submission(state: &mut BackendState) -> Result<TransferResponse, ApiError> {
        if let Some(err) = state.transfer_error.take() {
            return Err(err);
        }
        Ok(TransferResponse {
            signature: state.next_id("sig"),
            status: state.transfer_status.unwrap_or(TransactionStatus::Confirmed),
        })
    }
}

#[async_trait]
impl ApprovalBackend for FakeBackend {
    async fn create_pairing(&self, _params: &PairingParams) -> Result<PairingResponse, ApiError> {
        let mut state = lock(&self.state);
        state.pairing_creates += 1;
        if let Some(err) = state.create_error.take() {
            return Err(err);
        }
        let id = state.next_id("pair");
        let status = state.create_status.unwrap_or(NegotiationStatus::Pending);
        Ok(Self::pairing_response(&id, status))
    }

    async fn check_pairing(&self, request_id: &str) -> Result<PairingResponse, ApiError> {
        let mut state = lock(&self.state);
        state.pairing_checks += 1;
        let status = state
            .pairing_script
            .pop_front()
            .unwrap_or(Ok(NegotiationStatus::Pending))?;
        Ok(Self::pairing_response(request_id, status))
    }

    async fn create_session_request(
        &self,
        params: &SessionParams,
    ) -> Result<SessionResponse, ApiError> {
        let mut state = lock(&self.state);
        state.session_creates += 1;
        if let Some(err) = state.create_error.take() {
            return Err(err);
        }
        let id = state.next_id("sreq");
        state.session_params.insert(id.clone(), params.clone());
        state.last_session_request = Some(id.clone());
        let status = state.create_status.unwrap_or(NegotiationStatus::Pending);
        Ok(Self::session_response(&state, &id, status))
    }

    async fn check_session_request(&self, request_id: &str) -> Result<SessionResponse, ApiError> {
        let mut state = lock(&self.state);
        state.session_checks += 1;
        let status = state
            .session_script
            .pop_front()
            .unwrap_or(Ok(NegotiationStatus::Pending))?;
        Ok(Self::session_response(&state, request_id, status))
    }

    async fn transfer_native(&self, params: &TransferParams) -> Result<TransferResponse, ApiError> {
        let mut state = lock(&self.state);
        state.native_transfers.push(params.clone());
        Self::submission(&mut state)
    }

    async fn transfer_token(
        &self,
        params: &TokenTransferParams,
    ) -> Result<TransferResponse, ApiError> {
        let mut state = lock(&self.state);
        state.token_transfers.push(params.clone());
        Self::submission(&mut state)
    }

    async fn sign_and_send(
        &self,
        params: &SignAndSendParams,
    ) -> Result<TransferResponse, ApiError> {
        let mut state = lock(&self.state);
        state.submitted.push(params.clone());
        Self::submission(&mut state)
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    native: f64,
    tokens: Vec<TokenBalance>,
    statuses: HashMap<String, TransactionStatus>,
    key_not_ready: bool,
    revoke_error: Option<LedgerError>,
    revocations: Vec<String>,
    history: Vec<LedgerSpend>,
}

/// In-process [`LedgerService`].
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_native_balance(&self, amount: f64) {
        lock(&self.state).native = amount;
    }

    pub fn add_token(&self, balance: TokenBalance) {
        lock(&self.state).tokens.push(balance);
    }

    pub fn set_transaction_status(&self, signature: &str, status: TransactionStatus) {
        lock(&self.state)
            .statuses
            .insert(signature.to_string(), status);
    }

    pub fn set_session_key_ready(&self, ready: bool) {
        lock(&self.state).key_not_ready = !ready;
    }

    pub fn fail_next_revoke(&self, err: LedgerError) {
        lock(&self.state).revoke_error = Some(err);
    }

    /// Session keys revoked so far.
    pub fn revocations(&self) -> Vec<String> {
        lock(&self.state).revocations.clone()
    }

    pub fn push_history(&self, spend: LedgerSpend) {
        lock(&self.state).history.push(spend);
    }
}

#[async_trait]
impl LedgerService for FakeLedger {
    async fn native_balance(&self, _owner: &str) -> Result<f64, LedgerError> {
        Ok(lock(&self.state).native)
    }

    async fn token_balances(&self, _owner: &str) -> Result<Vec<TokenBalance>, LedgerError> {
        Ok(lock(&self.state).tokens.clone())
    }

    async fn transaction_status(&self, signature: &str) -> Result<TransactionStatus, LedgerError> {
        Ok(lock(&self.state)
            .statuses
            .get(signature)
            .copied()
            .unwrap_or(TransactionStatus::Pending))
    }

    async fn session_key_ready(
        &self,
        _wallet_pubkey: &str,
        _session_pubkey: &str,
    ) -> Result<bool, LedgerError> {
        Ok(!lock(&self.state).key_not_ready)
    }

    async fn revoke_session_key(
        &self,
        _wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<(), LedgerError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.revoke_error.take() {
            return Err(err);
        }
        state.revocations.push(session_pubkey.to_string());
        Ok(())
    }

    async fn session_history(
        &self,
        _wallet_pubkey: &str,
        _session_pubkey: &str,
    ) -> Result<Vec<LedgerSpend>, LedgerError> {
        Ok(lock(&self.state).history.clone())
    }
}

// ============================================================================
// Rig
// ============================================================================

/// An [`Authorizer`] wired to fakes, plus handles to drive them.
pub struct TestRig {
    pub authz: Authorizer,
    pub backend: Arc<FakeBackend>,
    pub ledger: Arc<FakeLedger>,
    pub store: Arc<InMemorySecureStore>,
    pub clock: ManualClock,
    pub sleeper: Arc<RecordingSleeper>,
}

impl TestRig {
    pub async fn new() -> Self {
        Self::with_config(AuthzConfig::default()).await
    }

    pub async fn with_config(config: AuthzConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let ledger = Arc::new(FakeLedger::new());
        let store = InMemorySecureStore::new_shared();
        let clock = ManualClock::new(START_MS);
        let sleeper = Arc::new(RecordingSleeper::new());

        let deps = Collaborators::new(backend.clone(), ledger.clone(), store.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_sleeper(sleeper.clone());
        let authz = Authorizer::open(deps, config)
            .await
            .expect("open authorizer");

        Self {
            authz,
            backend,
            ledger,
            store,
            clock,
            sleeper,
        }
    }

    /// A rig whose wallet is already onboarded.
    pub async fn onboarded() -> Self {
        let rig = Self::new().await;
        rig.authz
            .onboard(FAKE_WALLET, "credential-1", Some("Test Wallet".into()))
            .await
            .expect("onboard");
        rig
    }

    /// A second authorizer over the same store, as after a restart.
    pub async fn reopen(&self) -> Authorizer {
        let deps = Collaborators::new(
            self.backend.clone(),
            self.ledger.clone(),
            self.store.clone(),
        )
        .with_clock(Arc::new(self.clock.clone()))
        .with_sleeper(self.sleeper.clone());
        Authorizer::open(deps, self.authz.config().clone())
            .await
            .expect("reopen authorizer")
    }

    /// Run a pairing that the owner approves on the first check.
    pub async fn pair(&self, agent_id: &str) -> Agent {
        self.backend
            .script_pairing([Ok(NegotiationStatus::Approved)]);
        let request = self
            .authz
            .initiate_pairing("PAIR-CODE", agent_id, &format!("Agent {agent_id}"))
            .await
            .expect("initiate pairing");
        self.authz
            .await_pairing(&request.request_id)
            .await
            .expect("pairing approved")
    }

    /// Request a session for `agent-1` that the owner approves on the first check.
    pub async fn approved_session(
        &self,
        limits: Vec<SpendingLimit>,
        duration_seconds: u64,
    ) -> Session {
        self.backend
            .script_session([Ok(NegotiationStatus::Approved)]);
        let request = self
            .authz
            .request_session("agent-1", limits, duration_seconds)
            .await
            .expect("request session");
        self.authz
            .await_session(&request.request_id)
            .await
            .expect("session approved")
    }
}
