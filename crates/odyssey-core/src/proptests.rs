//! Property-based tests for odyssey-core
//!
//! These tests check the ledger and state-machine invariants using proptest.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::limits::{self, SpendingLimit, NATIVE_MINT};
    use crate::negotiation::{Negotiation, NegotiationStatus, PairingRequest, SessionRequest};
    use crate::session::{expiry_for, Session, SessionStatus};

    fn request(limits: Vec<SpendingLimit>, duration_seconds: u64) -> SessionRequest {
        SessionRequest {
            request_id: "req-1".into(),
            agent_id: "agent-1".into(),
            agent_name: "Agent".into(),
            wallet_pubkey: "wallet".into(),
            session_pubkey: "session".into(),
            limits,
            duration_seconds,
            created_at: 0,
            status: NegotiationStatus::Approved,
        }
    }

    fn status_strategy() -> impl Strategy<Value = NegotiationStatus> {
        prop_oneof![
            Just(NegotiationStatus::Pending),
            Just(NegotiationStatus::Approved),
            Just(NegotiationStatus::Rejected),
            Just(NegotiationStatus::Expired),
        ]
    }

    // Property 1: Spending never exceeds the limit
    //
    // For any sequence of spend attempts against a session, every accepted
    // spend keeps `spent <= limit`, and a rejected spend leaves the session
    // unchanged.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_spent_never_exceeds_limit(
            limit_units in 1u64..10_000_000_000u64,
            attempts in prop::collection::vec(1u64..5_000_000_000u64, 1..30)
        ) {
            let limit = SpendingLimit::native(limits::from_base_units(limit_units.into(), 9));
            let mut session = Session::from_request(
                "s1",
                &request(vec![limit.clone()], 3600),
                SessionStatus::Active,
                0,
            );
            let ceiling = limit.base_units().unwrap();

            for units in attempts {
                let amount = limits::from_base_units(units.into(), 9);
                match limits::apply_spend(&session, NATIVE_MINT, amount) {
                    Ok(next) => session = next,
                    Err(_) => {
                        prop_assert!(!limits::can_spend(&session, NATIVE_MINT, amount));
                    }
                }
                let spent = session
                    .spent(NATIVE_MINT)
                    .and_then(|s| limits::to_base_units(s.amount, 9))
                    .unwrap_or(0);
                prop_assert!(spent <= ceiling, "spent {} over limit {}", spent, ceiling);
                prop_assert!(session.remaining(NATIVE_MINT) >= 0.0);
            }
        }

        #[test]
        fn test_unknown_mint_never_spendable(amount in 0.000_001f64..1_000.0f64) {
            let session = Session::from_request(
                "s1",
                &request(vec![SpendingLimit::native(1_000.0)], 3600),
                SessionStatus::Active,
                0,
            );
            prop_assert!(!limits::can_spend(&session, "SomeOtherMint", amount));
        }
    }

    // Property 2: Expiry is monotonic
    //
    // A live session reads as expired from `expires_at` onward and never
    // returns to a live status as time advances.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_expiry_is_monotonic(
            created in 0u64..4_000_000_000_000u64,
            duration in 1u64..10_000_000u64,
            offsets in prop::collection::vec(0u64..20_000_000_000u64, 1..20),
            pending in any::<bool>()
        ) {
            let stored = if pending { SessionStatus::Pending } else { SessionStatus::Active };
            let session = Session::from_request(
                "s1",
                &request(vec![SpendingLimit::native(1.0)], duration),
                stored,
                created,
            );
            prop_assert_eq!(session.expires_at, expiry_for(created, duration));

            let mut times: Vec<u64> = offsets.iter().map(|o| created.saturating_add(*o)).collect();
            times.sort_unstable();
            let mut seen_expired = false;
            for now in times {
                let status = session.effective_status(now);
                if now >= session.expires_at {
                    prop_assert_eq!(status, SessionStatus::Expired);
                } else {
                    prop_assert_eq!(status, stored);
                }
                if seen_expired {
                    prop_assert_eq!(status, SessionStatus::Expired);
                }
                seen_expired |= status == SessionStatus::Expired;
            }
        }
    }

    // Property 3: Settled negotiations are immutable
    //
    // Once a request leaves `pending`, observing any other status fails and
    // leaves it as it was; observing the same status again is accepted.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_settled_negotiation_is_immutable(
            first in status_strategy(),
            later in prop::collection::vec(status_strategy(), 1..10)
        ) {
            let mut pairing = PairingRequest {
                request_id: "pair-1".into(),
                code: "ABC".into(),
                agent_id: "agent-1".into(),
                agent_name: "Agent".into(),
                created_at: 0,
                status: NegotiationStatus::Pending,
            };
            prop_assert!(pairing.observe(first).is_ok());

            for next in later {
                let before = pairing.status();
                let result = pairing.observe(next);
                if before.is_terminal() && next != before {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(pairing.status(), before);
                } else {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(pairing.status(), next);
                }
            }
        }
    }

    // Property 4: Base-unit conversion is exact for representable amounts
    proptest! {
        #[test]
        fn test_base_units_roundtrip(units in 0u64..(1u64 << 50), decimals in 0u8..=9u8) {
            let amount = limits::from_base_units(units.into(), decimals);
            prop_assert_eq!(limits::to_base_units(amount, decimals), Some(u128::from(units)));
        }
    }
}
