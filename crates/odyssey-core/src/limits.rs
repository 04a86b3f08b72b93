//! Per-asset spending allowances and the arithmetic over them.
//!
//! Limits and consumption are carried in decimal units on the wire (the way
//! owners read them), but every comparison and sum is done in integer base
//! units derived from the limit's `decimals`, so `0.5 - 0.3` is exactly
//! `0.2` and repeated spends never drift past the ceiling.

use serde::{Deserialize, Serialize};

use crate::errors::{AuthzError, AuthzResult};
use crate::session::Session;

/// Mint identifier for the chain's base asset.
pub const NATIVE_MINT: &str = "native";

/// Largest `decimals` accepted; keeps base-unit math inside `u128`.
pub const MAX_DECIMALS: u8 = 18;

/// A per-asset ceiling (or, in a session's `spent` set, the consumption so far).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingLimit {
    pub mint: String,
    pub amount: f64,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl SpendingLimit {
    pub fn new(mint: impl Into<String>, amount: f64, decimals: u8) -> Self {
        Self {
            mint: mint.into(),
            amount,
            decimals,
            symbol: None,
        }
    }

    /// Native-asset limit with 9 decimals.
    pub fn native(amount: f64) -> Self {
        Self {
            mint: NATIVE_MINT.to_string(),
            amount,
            decimals: 9,
            symbol: Some("SOL".to_string()),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn is_native(&self) -> bool {
        self.mint == NATIVE_MINT
    }

    /// The amount in base units, or `None` for negative / non-finite values.
    pub fn base_units(&self) -> Option<u128> {
        to_base_units(self.amount, self.decimals)
    }

    /// A zero-valued entry of the same asset, used to seed `spent`.
    fn zeroed(&self) -> Self {
        Self {
            mint: self.mint.clone(),
            amount: 0.0,
            decimals: self.decimals,
            symbol: self.symbol.clone(),
        }
    }
}

// ============================================================================
// Base-unit Conversion
// ============================================================================

fn scale(decimals: u8) -> f64 {
    10f64.powi(i32::from(decimals.min(MAX_DECIMALS)))
}

/// Convert a decimal amount to base units, rounding to the nearest unit.
pub fn to_base_units(amount: f64, decimals: u8) -> Option<u128> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let scaled = (amount * scale(decimals)).round();
    if scaled >= u128::MAX as f64 {
        return None;
    }
    Some(scaled as u128)
}

/// Convert base units back to a decimal amount.
pub fn from_base_units(units: u128, decimals: u8) -> f64 {
    units as f64 / scale(decimals)
}

// ============================================================================
// Limit Set Helpers
// ============================================================================

/// Find the entry for `mint` in a limit (or spent) set.
pub fn find<'a>(set: &'a [SpendingLimit], mint: &str) -> Option<&'a SpendingLimit> {
    set.iter().find(|l| l.mint == mint)
}

fn remaining_units(limit: &SpendingLimit, spent: Option<&SpendingLimit>) -> u128 {
    let ceiling = limit.base_units().unwrap_or(0);
    let used = spent
        .and_then(|s| to_base_units(s.amount, limit.decimals))
        .unwrap_or(0);
    ceiling.saturating_sub(used)
}

/// Allowance left under `limit` after `spent`, clamped at zero.
pub fn remaining(limit: &SpendingLimit, spent: Option<&SpendingLimit>) -> f64 {
    from_base_units(remaining_units(limit, spent), limit.decimals)
}

/// Share of the limit already consumed, in percent, capped at 100.
pub fn percent_spent(limit: &SpendingLimit, spent: Option<&SpendingLimit>) -> f64 {
    let ceiling = limit.base_units().unwrap_or(0);
    if ceiling == 0 {
        return 0.0;
    }
    let used = spent
        .and_then(|s| to_base_units(s.amount, limit.decimals))
        .unwrap_or(0);
    ((used as f64 / ceiling as f64) * 100.0).min(100.0)
}

/// Whether `amount` of `mint` fits inside the session's remaining allowance.
///
/// A mint absent from the session's limits never has an allowance.
pub fn can_spend(session: &Session, mint: &str, amount: f64) -> bool {
    let Some(limit) = find(&session.limits, mint) else {
        return false;
    };
    if !amount.is_finite() || amount <= 0.0 {
        return false;
    }
    match to_base_units(amount, limit.decimals) {
        Some(units) if units > 0 => units <= remaining_units(limit, find(&session.spent, mint)),
        _ => false,
    }
}

/// Record `amount` of `mint` as consumed, returning the updated session.
///
/// Fails with `LimitExceeded` when [`can_spend`] does not hold. Idempotence
/// per transaction signature is the caller's responsibility.
pub fn apply_spend(session: &Session, mint: &str, amount: f64) -> AuthzResult<Session> {
    if !can_spend(session, mint, amount) {
        let remaining = find(&session.limits, mint)
            .map(|limit| remaining(limit, find(&session.spent, mint)))
            .unwrap_or(0.0);
        return Err(AuthzError::LimitExceeded {
            mint: mint.to_string(),
            requested: amount,
            remaining,
        });
    }

    // can_spend guarantees the limit exists and the amount converts.
    let limit = find(&session.limits, mint).ok_or_else(|| AuthzError::LimitExceeded {
        mint: mint.to_string(),
        requested: amount,
        remaining: 0.0,
    })?;
    let add = to_base_units(amount, limit.decimals).unwrap_or(0);

    let mut next = session.clone();
    let entry = match next.spent.iter_mut().position(|s| s.mint == mint) {
        Some(idx) => &mut next.spent[idx],
        None => {
            next.spent.push(limit.zeroed());
            let last = next.spent.len() - 1;
            &mut next.spent[last]
        }
    };
    let used = to_base_units(entry.amount, limit.decimals).unwrap_or(0);
    entry.amount = from_base_units(used + add, limit.decimals);
    Ok(next)
}

/// Validate an untrusted limit set before it is sent for approval.
pub fn validate_limits(limits: &[SpendingLimit]) -> AuthzResult<()> {
    if limits.is_empty() {
        return Err(AuthzError::InvalidRequest(
            "at least one spending limit is required".into(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for limit in limits {
        if limit.mint.trim().is_empty() {
            return Err(AuthzError::InvalidRequest("limit mint must not be empty".into()));
        }
        if !seen.insert(limit.mint.as_str()) {
            return Err(AuthzError::InvalidRequest(format!(
                "duplicate limit for mint {}",
                limit.mint
            )));
        }
        if limit.decimals > MAX_DECIMALS {
            return Err(AuthzError::InvalidRequest(format!(
                "decimals {} exceeds maximum of {}",
                limit.decimals, MAX_DECIMALS
            )));
        }
        if !limit.amount.is_finite() || limit.amount <= 0.0 {
            return Err(AuthzError::InvalidRequest(format!(
                "limit for {} must be a positive amount",
                limit.mint
            )));
        }
        if limit.base_units().unwrap_or(0) == 0 {
            return Err(AuthzError::InvalidRequest(format!(
                "limit for {} is below the asset's smallest unit",
                limit.mint
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    fn session_with(limits: Vec<SpendingLimit>) -> Session {
        Session {
            id: "s1".into(),
            agent_id: "a1".into(),
            wallet_pubkey: "W".into(),
            session_pubkey: "S".into(),
            limits,
            duration_seconds: 3600,
            created_at: 0,
            expires_at: 3_600_000,
            status: SessionStatus::Active,
            spent: Vec::new(),
        }
    }

    #[test]
    fn test_remaining_without_spent() {
        let limit = SpendingLimit::native(0.5);
        assert_eq!(remaining(&limit, None), 0.5);
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let limit = SpendingLimit::native(0.5);
        let spent = SpendingLimit::native(0.7);
        assert_eq!(remaining(&limit, Some(&spent)), 0.0);
    }

    #[test]
    fn test_base_unit_arithmetic_is_exact() {
        let session = session_with(vec![SpendingLimit::native(0.5)]);
        let after = apply_spend(&session, NATIVE_MINT, 0.3).unwrap();
        let limit = find(&after.limits, NATIVE_MINT).unwrap();
        assert_eq!(remaining(limit, find(&after.spent, NATIVE_MINT)), 0.2);
    }

    #[test]
    fn test_can_spend_unknown_mint() {
        let session = session_with(vec![SpendingLimit::native(1.0)]);
        assert!(!can_spend(&session, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 0.1));
    }

    #[test]
    fn test_can_spend_rejects_non_positive() {
        let session = session_with(vec![SpendingLimit::native(1.0)]);
        assert!(!can_spend(&session, NATIVE_MINT, 0.0));
        assert!(!can_spend(&session, NATIVE_MINT, -0.1));
        assert!(!can_spend(&session, NATIVE_MINT, f64::NAN));
        // Below one lamport rounds to zero base units.
        assert!(!can_spend(&session, NATIVE_MINT, 1e-12));
    }

    #[test]
    fn test_can_spend_exact_remaining() {
        let session = session_with(vec![SpendingLimit::native(0.5)]);
        assert!(can_spend(&session, NATIVE_MINT, 0.5));
        assert!(!can_spend(&session, NATIVE_MINT, 0.500000001));
    }

    #[test]
    fn test_apply_spend_limit_exceeded() {
        let session = session_with(vec![SpendingLimit::native(0.5)]);
        let after = apply_spend(&session, NATIVE_MINT, 0.3).unwrap();
        let err = apply_spend(&after, NATIVE_MINT, 0.25).unwrap_err();
        match err {
            AuthzError::LimitExceeded { mint, remaining, .. } => {
                assert_eq!(mint, NATIVE_MINT);
                assert_eq!(remaining, 0.2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Original session is untouched.
        assert!(session.spent.is_empty());
    }

    #[test]
    fn test_apply_spend_tracks_mints_separately() {
        let usdc = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        let session = session_with(vec![
            SpendingLimit::native(1.0),
            SpendingLimit::new(usdc, 25.0, 6).with_symbol("USDC"),
        ]);
        let s = apply_spend(&session, usdc, 10.5).unwrap();
        let s = apply_spend(&s, NATIVE_MINT, 0.25).unwrap();
        let s = apply_spend(&s, usdc, 4.5).unwrap();
        assert_eq!(find(&s.spent, usdc).unwrap().amount, 15.0);
        assert_eq!(find(&s.spent, usdc).unwrap().symbol.as_deref(), Some("USDC"));
        assert_eq!(find(&s.spent, NATIVE_MINT).unwrap().amount, 0.25);
    }

    #[test]
    fn test_percent_spent() {
        let limit = SpendingLimit::native(0.5);
        assert_eq!(percent_spent(&limit, None), 0.0);
        assert_eq!(percent_spent(&limit, Some(&SpendingLimit::native(0.1))), 20.0);
        assert_eq!(percent_spent(&limit, Some(&SpendingLimit::native(2.0))), 100.0);
    }

    #[test]
    fn test_validate_limits() {
        assert!(validate_limits(&[SpendingLimit::native(0.5)]).is_ok());
        assert!(validate_limits(&[]).is_err());
        assert!(validate_limits(&[SpendingLimit::native(0.5), SpendingLimit::native(1.0)]).is_err());
        assert!(validate_limits(&[SpendingLimit::native(0.0)]).is_err());
        assert!(validate_limits(&[SpendingLimit::native(f64::INFINITY)]).is_err());
        assert!(validate_limits(&[SpendingLimit::new("mint", 1.0, 30)]).is_err());
        assert!(validate_limits(&[SpendingLimit::new(" ", 1.0, 6)]).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let limit: SpendingLimit =
            serde_json::from_str(r#"{"mint":"native","amount":0.5,"decimals":9}"#).unwrap();
        assert!(limit.is_native());
        assert_eq!(limit.symbol, None);
        assert_eq!(limit.base_units(), Some(500_000_000));
    }
}
