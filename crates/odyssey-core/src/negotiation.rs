//! Negotiation state machines for pairing and session requests.
//!
//! Both requests share one shape: they start `Pending` and settle into
//! exactly one of `Approved`, `Rejected` or `Expired`. The engine never
//! decides the outcome; it only creates the request and records what the
//! approval backend reports, so the only mutation offered here is
//! [`Negotiation::observe`].

use serde::{Deserialize, Serialize};

use crate::errors::{AuthzError, AuthzResult};
use crate::limits::SpendingLimit;

// ============================================================================
// Negotiation Status
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl NegotiationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NegotiationStatus::Pending)
    }

    /// Validate moving from `self` to `next`.
    ///
    /// `Pending` may move anywhere. A terminal status only accepts itself
    /// (a repeated observation of the same outcome is not a transition).
    pub fn transition(self, next: NegotiationStatus) -> Result<NegotiationStatus, (Self, Self)> {
        if self == next || !self.is_terminal() {
            Ok(next)
        } else {
            Err((self, next))
        }
    }
}

impl std::fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationStatus::Pending => write!(f, "pending"),
            NegotiationStatus::Approved => write!(f, "approved"),
            NegotiationStatus::Rejected => write!(f, "rejected"),
            NegotiationStatus::Expired => write!(f, "expired"),
        }
    }
}

// ============================================================================
// Negotiation Trait
// ============================================================================

/// Common behaviour of a request awaiting remote approval.
pub trait Negotiation {
    /// Human-readable entity name used in errors and logs.
    const KIND: &'static str;

    fn request_id(&self) -> &str;

    fn status(&self) -> NegotiationStatus;

    #[doc(hidden)]
    fn status_mut(&mut self) -> &mut NegotiationStatus;

    /// Record a status reported by the backend.
    fn observe(&mut self, next: NegotiationStatus) -> AuthzResult<()> {
        let current = self.status();
        match current.transition(next) {
            Ok(status) => {
                if status != current {
                    tracing::debug!(
                        kind = Self::KIND,
                        request_id = %self.request_id(),
                        from = %current,
                        to = %status,
                        "negotiation status changed"
                    );
                }
                *self.status_mut() = status;
                Ok(())
            }
            Err((from, to)) => Err(AuthzError::negotiation_transition(Self::KIND, from, to)),
        }
    }

    fn is_settled(&self) -> bool {
        self.status().is_terminal()
    }
}

// ============================================================================
// Pairing Request
// ============================================================================

/// An owner-submitted pairing code awaiting approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub request_id: String,
    pub code: String,
    pub agent_id: String,
    pub agent_name: String,
    pub created_at: u64,
    pub status: NegotiationStatus,
}

impl Negotiation for PairingRequest {
    const KIND: &'static str = "pairing request";

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn status(&self) -> NegotiationStatus {
        self.status
    }

    fn status_mut(&mut self) -> &mut NegotiationStatus {
        &mut self.status
    }
}

// ============================================================================
// Session Request
// ============================================================================

/// An agent's ask for a spending session, before any session exists.
///
/// `limits` and `duration_seconds` are untrusted until the owner approves
/// them on the approving device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub request_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub wallet_pubkey: String,
    pub session_pubkey: String,
    pub limits: Vec<SpendingLimit>,
    pub duration_seconds: u64,
    pub created_at: u64,
    pub status: NegotiationStatus,
}

impl Negotiation for SessionRequest {
    const KIND: &'static str = "session request";

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn status(&self) -> NegotiationStatus {
        self.status
    }

    fn status_mut(&mut self) -> &mut NegotiationStatus {
        &mut self.status
    }
}
