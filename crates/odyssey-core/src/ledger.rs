//! Chain-facing ledger service boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::transactions::TransactionStatus;
use crate::types::TokenBalance;

/// A confirmed movement out of the wallet attributed to a session key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSpend {
    pub signature: String,
    pub mint: String,
    /// Decimal units.
    pub amount: f64,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    fn is_valid_address(&self, address: &str) -> bool {
        is_well_formed_address(address)
    }

    /// Native balance in decimal units.
    async fn native_balance(&self, owner: &str) -> Result<f64, LedgerError>;

    async fn token_balances(&self, owner: &str) -> Result<Vec<TokenBalance>, LedgerError>;

    /// `Pending` when the ledger has not seen the signature yet.
    async fn transaction_status(&self, signature: &str) -> Result<TransactionStatus, LedgerError>;

    /// Whether the session key can sign for the wallet yet.
    async fn session_key_ready(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<bool, LedgerError>;

    /// Invalidate the session key. `AlreadyRevoked` and `UnknownSessionKey`
    /// still leave the key unusable.
    async fn revoke_session_key(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<(), LedgerError>;

    /// Confirmed spends made with the session key, oldest first.
    async fn session_history(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<Vec<LedgerSpend>, LedgerError>;
}

/// A base58 string that decodes to 32 bytes.
pub fn is_well_formed_address(address: &str) -> bool {
    if address.len() < 32 || address.len() > 44 {
        return false;
    }
    matches!(bs58::decode(address).into_vec(), Ok(bytes) if bytes.len() == 32)
}

/// `Abcd...wxyz` form for display.
pub fn shorten_address(address: &str, chars: usize) -> String {
    let count = address.chars().count();
    if count <= chars * 2 {
        return address.to_string();
    }
    let head: String = address.chars().take(chars).collect();
    let tail: String = address.chars().skip(count - chars).collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_address() {
        assert!(is_well_formed_address("11111111111111111111111111111111"));
        assert!(is_well_formed_address("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"));
        assert!(!is_well_formed_address("not-an-address"));
        // '0' and 'O' are outside the base58 alphabet.
        assert!(!is_well_formed_address("0OOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOO"));
        assert!(!is_well_formed_address(""));
    }

    #[test]
    fn test_shorten_address() {
        assert_eq!(
            shorten_address("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA", 4),
            "Toke...Q5DA"
        );
        assert_eq!(shorten_address("short", 4), "short");
    }
}
