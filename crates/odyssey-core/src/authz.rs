//! Authorization facade.
//!
//! [`Authorizer`] owns the wallet, agent, session, and transaction state for
//! the process lifetime and drives `PairingRequest -> Agent ->
//! SessionRequest -> Session -> Transaction`. All mutations go through one
//! async `RwLock`, so concurrent spends against a session are linearized and
//! `spent <= limit` holds under races. Every change is written through to
//! the secure store.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::api::{
    ApprovalBackend, PairingParams, PairingResponse, SessionParams, SessionResponse,
    SignAndSendParams, TokenTransferParams, TransferParams, TransferResponse,
};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::errors::{AuthzError, AuthzResult, LedgerError};
use crate::keys::{self, SessionKeypair};
use crate::ledger::LedgerService;
use crate::limits::{self, SpendingLimit, NATIVE_MINT};
use crate::negotiation::{Negotiation, NegotiationStatus, PairingRequest, SessionRequest};
use crate::poller::{self, PollPolicy};
use crate::session::{Session, SessionStatus, SessionView};
use crate::store::{self, PersistedState, SecureStore, STATE_STORAGE_KEY, WALLET_STORAGE_KEY};
use crate::transactions::{Transaction, TransactionKind, TransactionLog, TransactionStatus};
use crate::types::{Agent, AgentCredential, AgentStatus, Balances, StoredWallet, Wallet};

/// Shortest session an agent may ask for.
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(60);

/// Longest session an agent may ask for.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthzConfig {
    pub poll: PollPolicy,
    /// Secure-store key for the state snapshot.
    pub state_key: String,
    pub min_session_duration: Duration,
    pub max_session_duration: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            state_key: STATE_STORAGE_KEY.to_string(),
            min_session_duration: MIN_SESSION_DURATION,
            max_session_duration: MAX_SESSION_DURATION,
        }
    }
}

/// External services the authorizer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn ApprovalBackend>,
    pub ledger: Arc<dyn LedgerService>,
    pub store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    pub fn new(
        backend: Arc<dyn ApprovalBackend>,
        ledger: Arc<dyn LedgerService>,
        store: Arc<dyn SecureStore>,
    ) -> Self {
        Self {
            backend,
            ledger,
            store,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Default)]
struct State {
    wallet: Option<StoredWallet>,
    agents: Vec<Agent>,
    credentials: HashMap<String, AgentCredential>,
    sessions: Vec<Session>,
    session_keys: HashMap<String, String>,
    transactions: TransactionLog,
    applied: HashSet<String>,
    // Negotiations in flight are not persisted: a restart re-initiates.
    pairings: HashMap<String, PairingRequest>,
    session_requests: HashMap<String, SessionRequest>,
}

impl State {
    fn restore(wallet: Option<StoredWallet>, persisted: PersistedState) -> Self {
        Self {
            wallet,
            agents: persisted.agents,
            credentials: persisted.credentials,
            sessions: persisted.sessions,
            session_keys: persisted.session_keys,
            transactions: persisted.transactions,
            applied: persisted.applied_signatures.into_iter().collect(),
            pairings: HashMap::new(),
            session_requests: HashMap::new(),
        }
    }

    fn snapshot(&self) -> PersistedState {
        let mut applied: Vec<String> = self.applied.iter().cloned().collect();
        applied.sort();
        PersistedState {
            agents: self.agents.clone(),
            credentials: self.credentials.clone(),
            sessions: self.sessions.clone(),
            session_keys: self.session_keys.clone(),
            transactions: self.transactions.clone(),
            applied_signatures: applied,
        }
    }

    fn session(&self, id: &str) -> AuthzResult<&Session> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| AuthzError::not_found("session", id))
    }

    fn session_mut(&mut self, id: &str) -> AuthzResult<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| AuthzError::not_found("session", id))
    }

    fn agent(&self, id: &str) -> AuthzResult<&Agent> {
        self.agents
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| AuthzError::not_found("agent", id))
    }

    fn touch_agent(&mut self, agent_id: &str, now: u64) {
        if let Some(agent) = self.agents.iter_mut().find(|a| a.id == agent_id) {
            agent.last_seen = Some(now);
        }
    }

    /// Count a confirmed spend against its session once per signature.
    ///
    /// Session status is not checked: a transfer started while the session
    /// was active still counts if it confirms after expiry or revocation.
    /// Returns false if the signature was already counted.
    fn apply_confirmed_spend(
        &mut self,
        session_id: &str,
        mint: &str,
        amount: f64,
        signature: &str,
        now: u64,
    ) -> AuthzResult<bool> {
        if self.applied.contains(signature) {
            debug!(session_id, signature, "spend already recorded");
            return Ok(false);
        }
        let session = self.session(session_id)?;
        let updated = limits::apply_spend(session, mint, amount)?;
        let agent_id = updated.agent_id.clone();
        *self.session_mut(session_id)? = updated;
        self.applied.insert(signature.to_string());
        self.touch_agent(&agent_id, now);
        Ok(true)
    }

    /// Mark a transaction confirmed and count it against its session.
    fn settle_confirmed(&mut self, signature: &str, now: u64) -> AuthzResult<()> {
        let tx = self
            .transactions
            .get(signature)
            .cloned()
            .ok_or_else(|| AuthzError::not_found("transaction", signature))?;

        if let (Some(session_id), TransactionKind::Transfer | TransactionKind::TokenTransfer) =
            (tx.session_id.as_deref(), tx.kind)
        {
            let mint = tx.mint.as_deref().unwrap_or(NATIVE_MINT);
            if let Err(err) = self.apply_confirmed_spend(session_id, mint, tx.amount, signature, now) {
                // The funds moved regardless; reconcile_spent can pick it up.
                warn!(signature, session_id, error = %err, "confirmed transfer not counted against session");
            }
        }
        self.transactions.settle(signature, TransactionStatus::Confirmed)?;
        Ok(())
    }

    /// The session as it would look once every in-flight transfer confirms.
    fn projected(&self, session: &Session, mint: &str) -> Session {
        let mut projected = session.clone();
        let in_flight = self.transactions.for_session(&session.id).filter(|tx| {
            tx.status == TransactionStatus::Pending
                && !self.applied.contains(&tx.signature)
                && tx.mint.as_deref().unwrap_or(NATIVE_MINT) == mint
        });
        for tx in in_flight {
            match limits::apply_spend(&projected, mint, tx.amount) {
                Ok(next) => projected = next,
                Err(_) => {
                    if let Some(limit) = projected.limit(mint).cloned() {
                        projected.spent.retain(|s| s.mint != mint);
                        projected.spent.push(limit);
                    }
                    break;
                }
            }
        }
        projected
    }
}

fn require_active(session: &Session, now: u64) -> AuthzResult<()> {
    match session.effective_status(now) {
        SessionStatus::Active => Ok(()),
        status => Err(AuthzError::SessionNotActive {
            session_id: session.id.clone(),
            status,
        }),
    }
}

/// Negotiation status implied by a poll failure, if any.
fn settled_status(err: &AuthzError) -> Option<NegotiationStatus> {
    match err {
        AuthzError::Rejected { .. } => Some(NegotiationStatus::Rejected),
        AuthzError::RequestExpired { .. } => Some(NegotiationStatus::Expired),
        _ => None,
    }
}

fn settled_error(request_id: &str, status: NegotiationStatus) -> Option<AuthzError> {
    match status {
        NegotiationStatus::Rejected => Some(AuthzError::Rejected {
            request_id: request_id.to_string(),
        }),
        NegotiationStatus::Expired => Some(AuthzError::RequestExpired {
            request_id: request_id.to_string(),
        }),
        _ => None,
    }
}

// ============================================================================
// Authorizer
// ============================================================================

/// Outcome of [`Authorizer::unpair`].
#[derive(Clone, Debug)]
pub struct Unpaired {
    pub agent: Agent,
    /// Sessions left live because the ledger refused to revoke them.
    pub unrevoked: Vec<String>,
}

impl Unpaired {
    pub fn is_complete(&self) -> bool {
        self.unrevoked.is_empty()
    }
}

pub struct Authorizer {
    backend: Arc<dyn ApprovalBackend>,
    ledger: Arc<dyn LedgerService>,
    store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    config: AuthzConfig,
    state: RwLock<State>,
    // Serializes transfers so in-flight amounts are reserved before the next check.
    transfer_gate: Mutex<()>,
}

impl Authorizer {
    /// Load persisted state from the secure store.
    pub async fn open(deps: Collaborators, config: AuthzConfig) -> AuthzResult<Self> {
        let wallet: Option<StoredWallet> =
            store::load_json(deps.store.as_ref(), WALLET_STORAGE_KEY).await?;
        let persisted: PersistedState = store::load_json(deps.store.as_ref(), &config.state_key)
            .await?
            .unwrap_or_default();

        info!(
            onboarded = wallet.is_some(),
            agents = persisted.agents.len(),
            sessions = persisted.sessions.len(),
            "authorization state loaded"
        );

        Ok(Self {
            backend: deps.backend,
            ledger: deps.ledger,
            store: deps.store,
            clock: deps.clock,
            sleeper: deps.sleeper,
            config,
            state: RwLock::new(State::restore(wallet, persisted)),
            transfer_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    async fn persist(&self, state: &State) -> AuthzResult<()> {
        store::save_json(self.store.as_ref(), &self.config.state_key, &state.snapshot()).await?;
        Ok(())
    }

    async fn discard_session_key(&self, session_pubkey: &str) {
        if let Err(err) = self.store.delete(&keys::storage_key(session_pubkey)).await {
            warn!(session_pubkey, error = %err, "failed to delete session key");
        }
    }

    async fn load_session_key(&self, session_pubkey: &str) -> AuthzResult<SessionKeypair> {
        let bytes = self
            .store
            .get(&keys::storage_key(session_pubkey))
            .await?
            .ok_or_else(|| AuthzError::not_found("session key", session_pubkey))?;
        let bytes = Zeroizing::new(bytes);
        SessionKeypair::from_secret_bytes(&bytes)
    }

    // ------------------------------------------------------------------------
    // Onboarding
    // ------------------------------------------------------------------------

    /// Record the wallet created on the owner's authenticator.
    pub async fn onboard(
        &self,
        public_key: &str,
        credential_id: &str,
        name: Option<String>,
    ) -> AuthzResult<Wallet> {
        if public_key.trim().is_empty() || credential_id.trim().is_empty() {
            return Err(AuthzError::InvalidRequest(
                "wallet public key and credential id are required".into(),
            ));
        }

        let mut state = self.state.write().await;
        if state.wallet.is_some() {
            return Err(AuthzError::InvalidRequest("wallet already onboarded".into()));
        }
        let stored = StoredWallet {
            wallet: Wallet {
                public_key: public_key.to_string(),
                created_at: self.clock.now_ms(),
                name,
            },
            credential_id: credential_id.to_string(),
        };
        store::save_json(self.store.as_ref(), WALLET_STORAGE_KEY, &stored).await?;
        state.wallet = Some(stored.clone());

        info!(public_key, "wallet onboarded");
        Ok(stored.wallet)
    }

    pub async fn is_onboarded(&self) -> bool {
        self.state.read().await.wallet.is_some()
    }

    pub async fn wallet(&self) -> AuthzResult<Wallet> {
        self.state
            .read()
            .await
            .wallet
            .as_ref()
            .map(|w| w.wallet.clone())
            .ok_or(AuthzError::NotOnboarded)
    }

    pub async fn balances(&self) -> AuthzResult<Balances> {
        let wallet = self.wallet().await?;
        let (native, tokens) = tokio::join!(
            self.ledger.native_balance(&wallet.public_key),
            self.ledger.token_balances(&wallet.public_key),
        );
        Ok(Balances {
            native: native?,
            tokens: tokens?,
        })
    }

    // ------------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------------

    /// Submit an agent's pairing code for the owner's approval.
    pub async fn initiate_pairing(
        &self,
        code: &str,
        agent_id: &str,
        agent_name: &str,
    ) -> AuthzResult<PairingRequest> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthzError::InvalidRequest("pairing code is required".into()));
        }
        if agent_id.trim().is_empty() {
            return Err(AuthzError::InvalidRequest("agent id is required".into()));
        }
        self.wallet().await?;

        let params = PairingParams {
            code: code.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
        };
        let resp = self.backend.create_pairing(&params).await?;
        let now = self.clock.now_ms();

        let mut request = PairingRequest {
            request_id: resp.request_id.clone(),
            code: params.code,
            agent_id: params.agent_id,
            agent_name: params.agent_name,
            created_at: now,
            status: NegotiationStatus::Pending,
        };
        request.observe(resp.status)?;

        let mut state = self.state.write().await;
        state
            .pairings
            .insert(request.request_id.clone(), request.clone());
        if resp.status == NegotiationStatus::Approved {
            Self::approve_pairing(&mut state, &request.request_id, &resp, now)?;
            self.persist(&state).await?;
        }

        info!(request_id = %request.request_id, agent_id, status = %request.status, "pairing requested");
        Ok(request)
    }

    /// Poll a pairing request until it settles. On approval the agent is
    /// created (or re-activated) and its credentials are stored.
    pub async fn await_pairing(&self, request_id: &str) -> AuthzResult<Agent> {
        self.await_pairing_or_cancel(request_id, std::future::pending())
            .await
    }

    /// As [`Self::await_pairing`], giving up with `Cancelled` once `cancel` resolves.
    pub async fn await_pairing_or_cancel<C>(&self, request_id: &str, cancel: C) -> AuthzResult<Agent>
    where
        C: Future<Output = ()>,
    {
        let request = self.pairing_request(request_id).await?;
        match request.status {
            NegotiationStatus::Pending => {}
            NegotiationStatus::Approved => {
                return self.agent(&request.agent_id).await;
            }
            status => {
                if let Some(err) = settled_error(request_id, status) {
                    return Err(err);
                }
            }
        }

        let poll = poller::poll_until_terminal(
            &self.config.poll,
            self.sleeper.as_ref(),
            request_id,
            |_| self.backend.check_pairing(request_id),
        );
        let outcome = poller::with_cancel(poll, cancel).await;

        let mut state = self.state.write().await;
        match outcome {
            Ok(resp) => {
                let now = self.clock.now_ms();
                let agent = Self::approve_pairing(&mut state, request_id, &resp, now)?;
                self.persist(&state).await?;
                info!(request_id, agent_id = %agent.id, "pairing approved");
                Ok(agent)
            }
            Err(err) => {
                if let Some(status) = settled_status(&err) {
                    if let Some(request) = state.pairings.get_mut(request_id) {
                        request.observe(status)?;
                    }
                }
                warn!(request_id, error = %err, "pairing did not complete");
                Err(err)
            }
        }
    }

    fn approve_pairing(
        state: &mut State,
        request_id: &str,
        resp: &PairingResponse,
        now: u64,
    ) -> AuthzResult<Agent> {
        let request = state
            .pairings
            .get_mut(request_id)
            .ok_or_else(|| AuthzError::not_found("pairing request", request_id))?;
        request.observe(NegotiationStatus::Approved)?;
        let agent_id = request.agent_id.clone();
        let agent_name = request.agent_name.clone();

        let agent = match state.agents.iter_mut().find(|a| a.id == agent_id) {
            Some(existing) => {
                existing.name = agent_name;
                existing.status = AgentStatus::Active;
                existing.paired_at = now;
                existing.clone()
            }
            None => {
                let agent = Agent {
                    id: agent_id.clone(),
                    name: agent_name,
                    paired_at: now,
                    last_seen: None,
                    status: AgentStatus::Active,
                };
                state.agents.push(agent.clone());
                agent
            }
        };
        state.credentials.insert(
            agent_id,
            AgentCredential {
                wallet_pubkey: resp.wallet_pubkey.clone(),
                auth_secret: resp.auth_secret.clone(),
            },
        );
        Ok(agent)
    }

    /// Mark an agent inactive, drop its credentials, and revoke its live sessions.
    ///
    /// The agent is unpaired before any session is revoked. Sessions the
    /// ledger refuses to revoke stay live and are listed in
    /// [`Unpaired::unrevoked`]; retry them with [`Authorizer::revoke`].
    pub async fn unpair(&self, agent_id: &str) -> AuthzResult<Unpaired> {
        let (agent, live) = {
            let mut state = self.state.write().await;
            let now = self.clock.now_ms();
            let agent = state
                .agents
                .iter_mut()
                .find(|a| a.id == agent_id)
                .ok_or_else(|| AuthzError::not_found("agent", agent_id))?;
            agent.status = AgentStatus::Inactive;
            let agent = agent.clone();
            state.credentials.remove(agent_id);
            let live: Vec<String> = state
                .sessions
                .iter()
                .filter(|s| s.agent_id == agent_id && !s.effective_status(now).is_terminal())
                .map(|s| s.id.clone())
                .collect();
            self.persist(&state).await?;
            (agent, live)
        };

        info!(agent_id, sessions = live.len(), "agent unpaired");
        let mut unrevoked = Vec::new();
        for session_id in live {
            if let Err(err) = self.revoke(&session_id).await {
                warn!(agent_id, session_id = %session_id, error = %err, "failed to revoke session on unpair");
                unrevoked.push(session_id);
            }
        }
        Ok(Unpaired { agent, unrevoked })
    }

    // ------------------------------------------------------------------------
    // Session negotiation
    // ------------------------------------------------------------------------

    fn validate_duration(&self, duration_seconds: u64) -> AuthzResult<()> {
        let min = self.config.min_session_duration.as_secs();
        let max = self.config.max_session_duration.as_secs();
        if duration_seconds < min || duration_seconds > max {
            return Err(AuthzError::InvalidRequest(format!(
                "session duration must be between {min} and {max} seconds, got {duration_seconds}"
            )));
        }
        Ok(())
    }

    /// Ask the owner for a spending session on behalf of an active agent.
    ///
    /// A fresh session key is generated and stored before the request goes
    /// out; its public half identifies the session and it signs the request.
    pub async fn request_session(
        &self,
        agent_id: &str,
        limits: Vec<SpendingLimit>,
        duration_seconds: u64,
    ) -> AuthzResult<SessionRequest> {
        limits::validate_limits(&limits)?;
        self.validate_duration(duration_seconds)?;

        let (wallet, agent, credential) = {
            let state = self.state.read().await;
            let wallet = state.wallet.clone().ok_or(AuthzError::NotOnboarded)?;
            let agent = state.agent(agent_id)?.clone();
            let credential = state.credentials.get(agent_id).cloned().unwrap_or_default();
            (wallet, agent, credential)
        };
        if agent.status != AgentStatus::Active {
            return Err(AuthzError::InvalidRequest(format!(
                "agent {} is {}",
                agent.id, agent.status
            )));
        }
        let auth_secret = credential.auth_secret.clone().ok_or_else(|| {
            AuthzError::InvalidRequest(format!("agent {agent_id} has no pairing credential"))
        })?;
        let wallet_pubkey = credential
            .wallet_pubkey
            .clone()
            .unwrap_or_else(|| wallet.wallet.public_key.clone());

        let keypair = SessionKeypair::generate();
        let session_pubkey = keypair.public_key();
        self.store
            .set(&keys::storage_key(&session_pubkey), &keypair.secret_bytes())
            .await?;

        let timestamp = self.clock.now_ms();
        let message = keys::session_request_message(
            agent_id,
            &wallet_pubkey,
            &session_pubkey,
            &limits,
            duration_seconds,
            timestamp,
        );
        let params = SessionParams {
            agent_id: agent_id.to_string(),
            agent_name: agent.name.clone(),
            wallet_pubkey: wallet_pubkey.clone(),
            session_pubkey: session_pubkey.clone(),
            duration_seconds,
            signature: keypair.sign(&message),
            timestamp,
            auth_secret,
            limits: limits.clone(),
        };

        let resp = match self.backend.create_session_request(&params).await {
            Ok(resp) => resp,
            Err(err) => {
                self.discard_session_key(&session_pubkey).await;
                return Err(err.into());
            }
        };

        let mut request = SessionRequest {
            request_id: resp.request_id.clone(),
            agent_id: agent_id.to_string(),
            agent_name: agent.name,
            wallet_pubkey,
            session_pubkey: session_pubkey.clone(),
            limits,
            duration_seconds,
            created_at: timestamp,
            status: NegotiationStatus::Pending,
        };
        request.observe(resp.status)?;

        {
            let mut state = self.state.write().await;
            state
                .session_requests
                .insert(request.request_id.clone(), request.clone());
            if resp.status == NegotiationStatus::Approved {
                let now = self.clock.now_ms();
                Self::approve_session(&mut state, &request.request_id, &resp, now)?;
                self.persist(&state).await?;
            }
        }
        if matches!(
            resp.status,
            NegotiationStatus::Rejected | NegotiationStatus::Expired
        ) {
            self.discard_session_key(&session_pubkey).await;
        }

        info!(
            request_id = %request.request_id,
            agent_id,
            duration_seconds,
            status = %request.status,
            "session requested"
        );
        Ok(request)
    }

    /// Poll a session request until it settles. On approval the session is
    /// materialized with `created_at = now`.
    pub async fn await_session(&self, request_id: &str) -> AuthzResult<Session> {
        self.await_session_or_cancel(request_id, std::future::pending())
            .await
    }

    /// As [`Self::await_session`], giving up with `Cancelled` once `cancel` resolves.
    pub async fn await_session_or_cancel<C>(
        &self,
        request_id: &str,
        cancel: C,
    ) -> AuthzResult<Session>
    where
        C: Future<Output = ()>,
    {
        let request = self.session_request(request_id).await?;
        match request.status {
            NegotiationStatus::Pending => {}
            NegotiationStatus::Approved => {
                let state = self.state.read().await;
                return state
                    .sessions
                    .iter()
                    .find(|s| s.session_pubkey == request.session_pubkey)
                    .cloned()
                    .ok_or_else(|| AuthzError::not_found("session", request_id));
            }
            status => {
                if let Some(err) = settled_error(request_id, status) {
                    return Err(err);
                }
            }
        }

        let poll = poller::poll_until_terminal(
            &self.config.poll,
            self.sleeper.as_ref(),
            request_id,
            |_| self.backend.check_session_request(request_id),
        );
        let outcome = poller::with_cancel(poll, cancel).await;

        let result = {
            let mut state = self.state.write().await;
            match outcome {
                Ok(resp) => {
                    let now = self.clock.now_ms();
                    let session = Self::approve_session(&mut state, request_id, &resp, now)?;
                    self.persist(&state).await?;
                    info!(
                        request_id,
                        session_id = %session.id,
                        expires_at = session.expires_at,
                        "session approved"
                    );
                    Ok(session)
                }
                Err(err) => {
                    if let Some(status) = settled_status(&err) {
                        if let Some(request) = state.session_requests.get_mut(request_id) {
                            request.observe(status)?;
                        }
                    }
                    warn!(request_id, error = %err, "session request did not complete");
                    Err(err)
                }
            }
        };

        if let Err(err) = &result {
            if settled_status(err).is_some() {
                self.discard_session_key(&request.session_pubkey).await;
            }
        }
        result
    }

    fn approve_session(
        state: &mut State,
        request_id: &str,
        resp: &SessionResponse,
        now: u64,
    ) -> AuthzResult<Session> {
        let request = state
            .session_requests
            .get_mut(request_id)
            .ok_or_else(|| AuthzError::not_found("session request", request_id))?;
        request.observe(NegotiationStatus::Approved)?;
        let request = request.clone();

        if let Some(existing) = state
            .sessions
            .iter()
            .find(|s| s.session_pubkey == request.session_pubkey)
        {
            return Ok(existing.clone());
        }

        // Limits and duration are the ones the owner saw on the approving
        // device; the backend payload only names the session and its state.
        let payload = resp.session.as_ref();
        let id = payload
            .map(|s| s.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let status = match payload.map(|s| s.status) {
            Some(SessionStatus::Pending) => SessionStatus::Pending,
            _ => SessionStatus::Active,
        };
        let session = Session::from_request(id, &request, status, now);

        state
            .session_keys
            .insert(session.id.clone(), request.session_pubkey.clone());
        state.sessions.push(session.clone());
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Move a pending session to active once the ledger reports its key usable.
    ///
    /// Returns the session unchanged while the key is not ready yet.
    pub async fn activate_session(&self, session_id: &str) -> AuthzResult<Session> {
        let session = self.session(session_id).await?;
        match session.effective_status(self.clock.now_ms()) {
            SessionStatus::Active => return Ok(session),
            SessionStatus::Pending => {}
            other => return Err(AuthzError::session_transition(other, SessionStatus::Active)),
        }

        let ready = self
            .ledger
            .session_key_ready(&session.wallet_pubkey, &session.session_pubkey)
            .await?;
        if !ready {
            debug!(session_id, "session key not ready");
            return Ok(session);
        }

        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        let current = state.session_mut(session_id)?;
        current.activate(now)?;
        let updated = current.clone();
        self.persist(&state).await?;
        info!(session_id, "session activated");
        Ok(updated)
    }

    /// Revoke a session and invalidate its key at the ledger.
    ///
    /// The local transition happens first. It is rolled back only if the
    /// ledger refuses with an error that leaves the key usable.
    pub async fn revoke(&self, session_id: &str) -> AuthzResult<Session> {
        let (previous, wallet_pubkey, session_pubkey) = {
            let mut state = self.state.write().await;
            let now = self.clock.now_ms();
            let session = state.session_mut(session_id)?;
            let previous = session.revoke(now)?;
            let keys = (session.wallet_pubkey.clone(), session.session_pubkey.clone());
            if let Err(err) = self.persist(&state).await {
                if let Ok(session) = state.session_mut(session_id) {
                    session.status = previous;
                }
                return Err(err);
            }
            (previous, keys.0, keys.1)
        };

        match self
            .ledger
            .revoke_session_key(&wallet_pubkey, &session_pubkey)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_idempotent() => {
                debug!(session_id, error = %err, "session key already unusable");
            }
            Err(err) => {
                warn!(session_id, error = %err, "ledger refused revocation, restoring session");
                let mut state = self.state.write().await;
                if let Ok(session) = state.session_mut(session_id) {
                    if session.status == SessionStatus::Revoked {
                        session.status = previous;
                    }
                }
                self.persist(&state).await?;
                return Err(err.into());
            }
        }

        self.discard_session_key(&session_pubkey).await;
        let mut state = self.state.write().await;
        state.session_keys.remove(session_id);
        self.persist(&state).await?;
        info!(session_id, "session revoked");
        state.session(session_id).cloned()
    }

    /// Persist lazily observed expiries and drop the keys of expired sessions.
    pub async fn sweep_expired(&self) -> AuthzResult<usize> {
        let expired: Vec<String> = {
            let mut state = self.state.write().await;
            let now = self.clock.now_ms();
            let ids: Vec<String> = state
                .sessions
                .iter_mut()
                .filter_map(|s| s.settle_expiry(now).then(|| s.id.clone()))
                .collect();
            if ids.is_empty() {
                return Ok(0);
            }
            let keys = ids
                .iter()
                .filter_map(|id| state.session_keys.remove(id))
                .collect();
            self.persist(&state).await?;
            keys
        };
        for session_pubkey in &expired {
            self.discard_session_key(session_pubkey).await;
        }
        debug!(count = expired.len(), "expired sessions settled");
        Ok(expired.len())
    }

    // ------------------------------------------------------------------------
    // Spending
    // ------------------------------------------------------------------------

    /// Count a confirmed spend against a session.
    ///
    /// Idempotent per `signature`: a replay is a successful no-op, whatever
    /// amount it carries. Accepted in any session status, since the spend
    /// was authorized when the transfer started.
    pub async fn record_spend(
        &self,
        session_id: &str,
        mint: &str,
        amount: f64,
        signature: &str,
    ) -> AuthzResult<Session> {
        if signature.trim().is_empty() {
            return Err(AuthzError::InvalidRequest("signature is required".into()));
        }

        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        if state.apply_confirmed_spend(session_id, mint, amount, signature, now)? {
            if state.transactions.get(signature).map(|tx| tx.status)
                == Some(TransactionStatus::Pending)
            {
                state
                    .transactions
                    .settle(signature, TransactionStatus::Confirmed)?;
            }
            self.persist(&state).await?;
            info!(session_id, mint, amount, signature, "spend recorded");
        }
        state.session(session_id).cloned()
    }

    /// Move funds through a session.
    pub async fn transfer(
        &self,
        session_id: &str,
        destination: &str,
        mint: &str,
        amount: f64,
    ) -> AuthzResult<Transaction> {
        let _gate = self.transfer_gate.lock().await;

        let (session, limit) = {
            let state = self.state.read().await;
            let session = state.session(session_id)?;
            require_active(session, self.clock.now_ms())?;
            limits::apply_spend(&state.projected(session, mint), mint, amount)?;
            let limit = session
                .limit(mint)
                .cloned()
                .ok_or_else(|| AuthzError::not_found("limit", mint))?;
            (session.clone(), limit)
        };
        if !self.ledger.is_valid_address(destination) {
            return Err(LedgerError::InvalidAddress(destination.to_string()).into());
        }
        let keypair = self.load_session_key(&session.session_pubkey).await?;

        let (kind, resp) = if limit.is_native() {
            let params = TransferParams {
                wallet_pubkey: session.wallet_pubkey.clone(),
                session_pubkey: session.session_pubkey.clone(),
                session_secret_key: keypair.keypair_base58().to_string(),
                destination: destination.to_string(),
                amount_sol: amount,
            };
            (TransactionKind::Transfer, self.backend.transfer_native(&params).await?)
        } else {
            let units = limits::to_base_units(amount, limit.decimals)
                .and_then(|units| u64::try_from(units).ok())
                .ok_or_else(|| {
                    AuthzError::InvalidRequest(format!("amount {amount} out of range for {mint}"))
                })?;
            let params = TokenTransferParams {
                wallet_pubkey: session.wallet_pubkey.clone(),
                session_pubkey: session.session_pubkey.clone(),
                session_secret_key: keypair.keypair_base58().to_string(),
                destination: destination.to_string(),
                mint: mint.to_string(),
                amount: units,
            };
            (TransactionKind::TokenTransfer, self.backend.transfer_token(&params).await?)
        };

        let tx = Transaction {
            signature: resp.signature.clone(),
            kind,
            from: session.wallet_pubkey.clone(),
            to: destination.to_string(),
            amount,
            mint: (!limit.is_native()).then(|| mint.to_string()),
            symbol: limit.symbol.clone(),
            timestamp: self.clock.now_ms(),
            status: TransactionStatus::Pending,
            session_id: Some(session.id.clone()),
        };
        info!(session_id, signature = %tx.signature, mint, amount, status = %resp.status, "transfer submitted");
        self.record_submission(tx, &resp).await
    }

    /// Have the backend co-sign and submit a prepared transaction.
    ///
    /// The entry carries no amount; count it with [`Self::record_spend`]
    /// once it confirms.
    pub async fn sign_and_send(
        &self,
        session_id: &str,
        transaction: &str,
    ) -> AuthzResult<Transaction> {
        if transaction.trim().is_empty() {
            return Err(AuthzError::InvalidRequest("transaction is required".into()));
        }
        let session = {
            let state = self.state.read().await;
            let session = state.session(session_id)?;
            require_active(session, self.clock.now_ms())?;
            session.clone()
        };
        let keypair = self.load_session_key(&session.session_pubkey).await?;
        let params = SignAndSendParams {
            transaction: transaction.to_string(),
            session_secret_key: keypair.keypair_base58().to_string(),
            session_pubkey: session.session_pubkey.clone(),
        };
        let resp = self.backend.sign_and_send(&params).await?;

        let tx = Transaction {
            signature: resp.signature.clone(),
            kind: TransactionKind::Other,
            from: session.wallet_pubkey.clone(),
            to: String::new(),
            amount: 0.0,
            mint: None,
            symbol: None,
            timestamp: self.clock.now_ms(),
            status: TransactionStatus::Pending,
            session_id: Some(session.id.clone()),
        };
        info!(session_id, signature = %tx.signature, status = %resp.status, "transaction submitted");
        self.record_submission(tx, &resp).await
    }

    async fn record_submission(
        &self,
        tx: Transaction,
        resp: &TransferResponse,
    ) -> AuthzResult<Transaction> {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        if !state.transactions.append(tx.clone()) {
            warn!(signature = %tx.signature, "backend returned a known signature");
        }
        match resp.status {
            TransactionStatus::Pending => {}
            TransactionStatus::Confirmed => state.settle_confirmed(&tx.signature, now)?,
            TransactionStatus::Failed => {
                state
                    .transactions
                    .settle(&tx.signature, TransactionStatus::Failed)?;
            }
        }
        self.persist(&state).await?;
        Ok(state.transactions.get(&tx.signature).cloned().unwrap_or(tx))
    }

    /// Ask the ledger for a pending transaction's outcome and settle it.
    pub async fn refresh_transaction(&self, signature: &str) -> AuthzResult<Transaction> {
        let current = self.transaction(signature).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let status = self.ledger.transaction_status(signature).await?;
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        match status {
            TransactionStatus::Pending => return Ok(current),
            TransactionStatus::Confirmed => state.settle_confirmed(signature, now)?,
            TransactionStatus::Failed => {
                state
                    .transactions
                    .settle(signature, TransactionStatus::Failed)?;
            }
        }
        self.persist(&state).await?;
        debug!(signature, %status, "transaction settled");
        state
            .transactions
            .get(signature)
            .cloned()
            .ok_or_else(|| AuthzError::not_found("transaction", signature))
    }

    /// Re-derive a session's `spent` from the ledger's record of its key.
    ///
    /// The ledger is authoritative. Totals above a limit are capped at the
    /// limit and logged.
    pub async fn reconcile_spent(&self, session_id: &str) -> AuthzResult<Session> {
        let session = self.session(session_id).await?;
        let history = self
            .ledger
            .session_history(&session.wallet_pubkey, &session.session_pubkey)
            .await?;

        let mut state = self.state.write().await;
        let current = state.session_mut(session_id)?;
        let mut spent = Vec::new();
        for limit in &current.limits {
            let total: u128 = history
                .iter()
                .filter(|s| s.mint == limit.mint)
                .filter_map(|s| limits::to_base_units(s.amount, limit.decimals))
                .sum();
            let ceiling = limit.base_units().unwrap_or(0);
            if total > ceiling {
                warn!(
                    session_id,
                    mint = %limit.mint,
                    "ledger shows spending beyond the session limit"
                );
            }
            let capped = total.min(ceiling);
            if capped > 0 {
                spent.push(SpendingLimit {
                    mint: limit.mint.clone(),
                    amount: limits::from_base_units(capped, limit.decimals),
                    decimals: limit.decimals,
                    symbol: limit.symbol.clone(),
                });
            }
        }
        for spend in &history {
            if current.limit(&spend.mint).is_none() {
                warn!(session_id, mint = %spend.mint, "ledger spend in a mint without a limit");
            }
        }
        current.spent = spent;
        let updated = current.clone();

        for spend in &history {
            state.applied.insert(spend.signature.clone());
            if state.transactions.get(&spend.signature).map(|tx| tx.status)
                == Some(TransactionStatus::Pending)
            {
                state
                    .transactions
                    .settle(&spend.signature, TransactionStatus::Confirmed)?;
            }
        }
        self.persist(&state).await?;
        info!(session_id, spends = history.len(), "spent reconciled with ledger");
        Ok(updated)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn agents(&self) -> Vec<Agent> {
        self.state.read().await.agents.clone()
    }

    pub async fn agent(&self, agent_id: &str) -> AuthzResult<Agent> {
        self.state.read().await.agent(agent_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.state.read().await.sessions.clone()
    }

    pub async fn sessions_for_agent(&self, agent_id: &str) -> Vec<Session> {
        self.state
            .read()
            .await
            .sessions
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub async fn session(&self, session_id: &str) -> AuthzResult<Session> {
        self.state.read().await.session(session_id).cloned()
    }

    pub async fn session_view(&self, session_id: &str) -> AuthzResult<SessionView> {
        let session = self.session(session_id).await?;
        Ok(session.view(self.clock.now_ms()))
    }

    pub async fn session_views(&self) -> Vec<SessionView> {
        let now = self.clock.now_ms();
        self.state
            .read()
            .await
            .sessions
            .iter()
            .map(|s| s.view(now))
            .collect()
    }

    pub async fn remaining(&self, session_id: &str, mint: &str) -> AuthzResult<f64> {
        Ok(self.session(session_id).await?.remaining(mint))
    }

    pub async fn transaction(&self, signature: &str) -> AuthzResult<Transaction> {
        self.state
            .read()
            .await
            .transactions
            .get(signature)
            .cloned()
            .ok_or_else(|| AuthzError::not_found("transaction", signature))
    }

    /// Newest first.
    pub async fn transactions(&self, limit: usize) -> Vec<Transaction> {
        self.state
            .read()
            .await
            .transactions
            .recent(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn session_transactions(&self, session_id: &str) -> Vec<Transaction> {
        self.state
            .read()
            .await
            .transactions
            .for_session(session_id)
            .cloned()
            .collect()
    }

    pub async fn pairing_request(&self, request_id: &str) -> AuthzResult<PairingRequest> {
        self.state
            .read()
            .await
            .pairings
            .get(request_id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found("pairing request", request_id))
    }

    pub async fn session_request(&self, request_id: &str) -> AuthzResult<SessionRequest> {
        self.state
            .read()
            .await
            .session_requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found("session request", request_id))
    }
}
