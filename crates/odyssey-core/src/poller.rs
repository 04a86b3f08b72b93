//! Bounded polling of a remote negotiation until it settles.
//!
//! The poller waits one interval *before* every status check, so the first
//! check happens one interval after submission and `n` checks cost `n`
//! waits. It is generic over the fetch and the sleeper; it owns no timers,
//! so dropping the returned future cancels it without leaving anything
//! behind.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Sleeper;
use crate::errors::{ApiError, AuthzError, AuthzResult};
use crate::negotiation::NegotiationStatus;

/// Default wait between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of checks before giving up (five minutes at the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest a poll can take, ignoring fetch latency.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

/// A backend answer that carries a negotiation status.
pub trait Observation {
    fn status(&self) -> NegotiationStatus;
}

/// Poll `fetch` until it reports a terminal status or the budget runs out.
///
/// * `approved` returns the observation that carried it.
/// * `rejected` and `expired` map to [`AuthzError::Rejected`] and
///   [`AuthzError::RequestExpired`]; no further checks are made.
/// * A transport failure uses up its attempt and polling continues. If the
///   budget runs out and the last check failed at transport, the result is
///   [`AuthzError::Transport`]; otherwise [`AuthzError::Timeout`], which
///   reports how many checks failed at transport.
///
/// `fetch` receives the 1-based attempt number.
pub async fn poll_until_terminal<T, F, Fut>(
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    request_id: &str,
    mut fetch: F,
) -> AuthzResult<T>
where
    T: Observation,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut last_transport: Option<ApiError> = None;
    let mut transport_failures = 0u32;

    for attempt in 1..=policy.max_attempts {
        sleeper.sleep(policy.interval).await;

        match fetch(attempt).await {
            Ok(observation) => {
                last_transport = None;
                match observation.status() {
                    NegotiationStatus::Pending => {
                        debug!(request_id, attempt, "still pending");
                    }
                    NegotiationStatus::Approved => {
                        debug!(request_id, attempt, "approved");
                        return Ok(observation);
                    }
                    NegotiationStatus::Rejected => {
                        return Err(AuthzError::Rejected {
                            request_id: request_id.to_string(),
                        });
                    }
                    NegotiationStatus::Expired => {
                        return Err(AuthzError::RequestExpired {
                            request_id: request_id.to_string(),
                        });
                    }
                }
            }
            Err(err) => {
                warn!(request_id, attempt, error = %err, "status check failed");
                transport_failures += 1;
                last_transport = Some(err);
            }
        }
    }

    match last_transport {
        Some(err) => Err(AuthzError::Transport(err)),
        None => Err(AuthzError::Timeout {
            request_id: request_id.to_string(),
            attempts: policy.max_attempts,
            transport_failures,
        }),
    }
}

/// Run `poll` until it finishes or `cancel` resolves, whichever is first.
///
/// Cancellation drops the poll future, so no late status is applied.
pub async fn with_cancel<T, P, C>(poll: P, cancel: C) -> AuthzResult<T>
where
    P: Future<Output = AuthzResult<T>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancel => Err(AuthzError::Cancelled),
        result = poll => result,
    }
}
