//! Identity and bookkeeping records shared across the crate.

use serde::{Deserialize, Serialize};

/// Root wallet identity. The matching private key never leaves the owner's
/// authenticator; only the public half is known here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub public_key: String,
    /// Unix milliseconds.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The single secure-store entry written at onboarding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWallet {
    pub wallet: Wallet,
    /// Binding to the owner's authentication factor (passkey credential).
    pub credential_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Pending,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Pending => write!(f, "pending"),
        }
    }
}

/// A third party paired with the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub paired_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
    pub status: AgentStatus,
}

/// Secrets handed out by the backend when a pairing is approved. Kept in the
/// secure store only; never logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<String>,
}

impl std::fmt::Debug for AgentCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredential")
            .field("wallet_pubkey", &self.wallet_pubkey)
            .field("auth_secret", &self.auth_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Token holding reported by the ledger service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Raw base-unit amount, as reported by the chain.
    pub balance: u64,
    pub ui_balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

/// Wallet holdings snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub native: f64,
    pub tokens: Vec<TokenBalance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_wallet_wire_shape() {
        let stored = StoredWallet {
            wallet: Wallet {
                public_key: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".into(),
                created_at: 1_700_000_000_000,
                name: Some("My Wallet".into()),
            },
            credential_id: "cred_abc".into(),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["credentialId"], "cred_abc");
        assert_eq!(json["wallet"]["publicKey"], "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
        assert_eq!(json["wallet"]["createdAt"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_agent_status_lowercase() {
        let agent: Agent = serde_json::from_str(
            r#"{"id":"a1","name":"Trader","pairedAt":1,"status":"inactive"}"#,
        )
        .unwrap();
        assert_eq!(agent.status, AgentStatus::Inactive);
        assert!(agent.last_seen.is_none());
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = AgentCredential {
            wallet_pubkey: Some("W".into()),
            auth_secret: Some("super-secret".into()),
        };
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
