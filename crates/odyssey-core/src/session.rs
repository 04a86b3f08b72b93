//! Session lifecycle for approved spending delegations.
//!
//! A session is created when a session request is approved and moves
//! `Pending -> Active -> {Expired, Revoked}`. Expiry is never stored by a
//! timer: it is a pure function of the wall clock evaluated on every read
//! through [`Session::effective_status`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AuthzError, AuthzResult};
use crate::limits::{self, SpendingLimit};
use crate::negotiation::SessionRequest;

// ============================================================================
// Session State
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Approved, waiting for the session key to become usable.
    Pending,
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Revoked)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// A time- and amount-bounded delegation signed with a dedicated session key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub wallet_pubkey: String,
    pub session_pubkey: String,
    pub limits: Vec<SpendingLimit>,
    pub duration_seconds: u64,
    /// Unix milliseconds.
    pub created_at: u64,
    /// `created_at + duration_seconds * 1000`, fixed at creation.
    pub expires_at: u64,
    pub status: SessionStatus,
    #[serde(default)]
    pub spent: Vec<SpendingLimit>,
}

impl Session {
    /// Materialize a session from an approved request at `now_ms`.
    pub fn from_request(
        id: impl Into<String>,
        request: &SessionRequest,
        status: SessionStatus,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: request.agent_id.clone(),
            wallet_pubkey: request.wallet_pubkey.clone(),
            session_pubkey: request.session_pubkey.clone(),
            limits: request.limits.clone(),
            duration_seconds: request.duration_seconds,
            created_at: now_ms,
            expires_at: expiry_for(now_ms, request.duration_seconds),
            status,
            spent: Vec::new(),
        }
    }

    /// Status as of `now_ms`. Any non-revoked session at or past its expiry
    /// reads as `Expired`, whatever is stored.
    pub fn effective_status(&self, now_ms: u64) -> SessionStatus {
        match self.status {
            SessionStatus::Revoked => SessionStatus::Revoked,
            SessionStatus::Expired => SessionStatus::Expired,
            SessionStatus::Pending | SessionStatus::Active => {
                if now_ms >= self.expires_at {
                    SessionStatus::Expired
                } else {
                    self.status
                }
            }
        }
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.effective_status(now_ms) == SessionStatus::Active
    }

    /// `Pending -> Active` once the session key is usable.
    pub fn activate(&mut self, now_ms: u64) -> AuthzResult<()> {
        match self.effective_status(now_ms) {
            SessionStatus::Pending => {
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::Active => Ok(()),
            other => Err(AuthzError::session_transition(other, SessionStatus::Active)),
        }
    }

    /// Owner-initiated revocation. Returns the status it replaced so callers
    /// can roll back if the ledger refuses to invalidate the key.
    pub fn revoke(&mut self, now_ms: u64) -> AuthzResult<SessionStatus> {
        match self.effective_status(now_ms) {
            previous @ (SessionStatus::Pending | SessionStatus::Active) => {
                self.status = SessionStatus::Revoked;
                Ok(previous)
            }
            other => Err(AuthzError::session_transition(other, SessionStatus::Revoked)),
        }
    }

    /// Persist a lazily observed expiry. Returns true if the stored status changed.
    pub fn settle_expiry(&mut self, now_ms: u64) -> bool {
        let effective = self.effective_status(now_ms);
        if effective == SessionStatus::Expired && self.status != SessionStatus::Expired {
            self.status = SessionStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Time left before expiry; zero once expired.
    pub fn time_remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms))
    }

    pub fn limit(&self, mint: &str) -> Option<&SpendingLimit> {
        limits::find(&self.limits, mint)
    }

    pub fn spent(&self, mint: &str) -> Option<&SpendingLimit> {
        limits::find(&self.spent, mint)
    }

    /// Remaining allowance for `mint`; zero for mints without a limit.
    pub fn remaining(&self, mint: &str) -> f64 {
        self.limit(mint)
            .map(|limit| limits::remaining(limit, self.spent(mint)))
            .unwrap_or(0.0)
    }

    /// Derived read-only view for display.
    pub fn view(&self, now_ms: u64) -> SessionView {
        let status = self.effective_status(now_ms);
        let allowances = self
            .limits
            .iter()
            .map(|limit| {
                let spent = self.spent(&limit.mint);
                AllowanceView {
                    mint: limit.mint.clone(),
                    symbol: limit.symbol.clone(),
                    limit: limit.amount,
                    spent: spent.map(|s| s.amount).unwrap_or(0.0),
                    remaining: limits::remaining(limit, spent),
                    percent_spent: limits::percent_spent(limit, spent),
                }
            })
            .collect();
        SessionView {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            status,
            message: status_message(self, now_ms),
            expires_at: self.expires_at,
            time_remaining_secs: self.time_remaining(now_ms).as_secs(),
            duration: format_duration(self.duration_seconds),
            allowances,
        }
    }
}

/// `created_at + duration_seconds * 1000`, saturating.
pub fn expiry_for(created_at_ms: u64, duration_seconds: u64) -> u64 {
    created_at_ms.saturating_add(duration_seconds.saturating_mul(1000))
}

// ============================================================================
// Derived Views
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceView {
    pub mint: String,
    pub symbol: Option<String>,
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    pub percent_spent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub agent_id: String,
    pub status: SessionStatus,
    pub message: String,
    pub expires_at: u64,
    pub time_remaining_secs: u64,
    pub duration: String,
    pub allowances: Vec<AllowanceView>,
}

/// One-line description of where a session stands.
pub fn status_message(session: &Session, now_ms: u64) -> String {
    match session.effective_status(now_ms) {
        SessionStatus::Active => format!("Expires {}", format_expiry(session.expires_at, now_ms)),
        SessionStatus::Expired => "Session has expired".to_string(),
        SessionStatus::Revoked => "Session was revoked".to_string(),
        SessionStatus::Pending => "Waiting for activation".to_string(),
    }
}

/// Relative expiry, e.g. `in 1h 5m`.
pub fn format_expiry(expires_at_ms: u64, now_ms: u64) -> String {
    if expires_at_ms <= now_ms {
        return "Expired".to_string();
    }
    let diff = expires_at_ms - now_ms;
    let hours = diff / 3_600_000;
    let minutes = (diff % 3_600_000) / 60_000;
    if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else {
        format!("in {}m", minutes)
    }
}

/// Coarse duration label: whole days past 24h, whole hours otherwise.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    if hours >= 24 {
        format!("{}d", hours / 24)
    } else if hours > 0 {
        format!("{}h", hours)
    } else {
        format!("{}m", seconds / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_session(created_at: u64, duration_seconds: u64) -> Session {
        Session {
            id: "s1".into(),
            agent_id: "a1".into(),
            wallet_pubkey: "W".into(),
            session_pubkey: "S".into(),
            limits: vec![SpendingLimit::native(0.5)],
            duration_seconds,
            created_at,
            expires_at: expiry_for(created_at, duration_seconds),
            status: SessionStatus::Active,
            spent: Vec::new(),
        }
    }

    #[test]
    fn test_expiry_fixed_at_creation() {
        let s = active_session(1_000, 3600);
        assert_eq!(s.expires_at, 1_000 + 3_600_000);
    }

    #[test]
    fn test_effective_status_boundary() {
        let s = active_session(0, 60);
        assert_eq!(s.effective_status(59_999), SessionStatus::Active);
        assert_eq!(s.effective_status(60_000), SessionStatus::Expired);
        // Stored status is untouched by reads.
        assert_eq!(s.status, SessionStatus::Active);
    }

    #[test]
    fn test_pending_session_expires_too() {
        let mut s = active_session(0, 60);
        s.status = SessionStatus::Pending;
        assert_eq!(s.effective_status(10), SessionStatus::Pending);
        assert_eq!(s.effective_status(60_000), SessionStatus::Expired);
    }

    #[test]
    fn test_revoked_wins_over_expiry() {
        let mut s = active_session(0, 60);
        s.revoke(10).unwrap();
        assert_eq!(s.effective_status(1_000_000), SessionStatus::Revoked);
    }

    #[test]
    fn test_revoke_returns_previous_status() {
        let mut s = active_session(0, 60);
        assert_eq!(s.revoke(10).unwrap(), SessionStatus::Active);
        assert!(matches!(
            s.revoke(20),
            Err(AuthzError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cannot_revoke_expired() {
        let mut s = active_session(0, 60);
        assert!(matches!(
            s.revoke(60_000),
            Err(AuthzError::InvalidTransition { .. })
        ));
        assert_eq!(s.status, SessionStatus::Active);
    }

    #[test]
    fn test_activate() {
        let mut s = active_session(0, 60);
        s.status = SessionStatus::Pending;
        s.activate(1).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        // Re-activating is a no-op.
        s.activate(2).unwrap();
        s.revoke(3).unwrap();
        assert!(s.activate(4).is_err());
    }

    #[test]
    fn test_settle_expiry() {
        let mut s = active_session(0, 60);
        assert!(!s.settle_expiry(1));
        assert!(s.settle_expiry(60_000));
        assert_eq!(s.status, SessionStatus::Expired);
        assert!(!s.settle_expiry(70_000));
    }

    #[test]
    fn test_time_remaining() {
        let s = active_session(0, 60);
        assert_eq!(s.time_remaining(30_000), Duration::from_secs(30));
        assert_eq!(s.time_remaining(90_000), Duration::ZERO);
    }

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry(3_900_000, 0), "in 1h 5m");
        assert_eq!(format_expiry(600_000, 0), "in 10m");
        assert_eq!(format_expiry(0, 5), "Expired");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(86_400 * 2), "2d");
        assert_eq!(format_duration(900), "15m");
    }

    #[test]
    fn test_view() {
        let mut s = active_session(0, 3600);
        s.spent.push(SpendingLimit::native(0.1));
        let view = s.view(1_800_000);
        assert_eq!(view.status, SessionStatus::Active);
        assert_eq!(view.message, "Expires in 30m");
        assert_eq!(view.time_remaining_secs, 1800);
        assert_eq!(view.allowances.len(), 1);
        assert_eq!(view.allowances[0].remaining, 0.4);
        assert_eq!(view.allowances[0].percent_spent, 20.0);
    }
}
