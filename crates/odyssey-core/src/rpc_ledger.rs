#![cfg(feature = "rpc-ledger")]

//! [`LedgerService`] over Solana JSON-RPC.
//!
//! Reads (balances, signature status, session history) go to the RPC node.
//! Session-key revocation is an owner-authorized instruction the device
//! cannot build on its own, so it is delegated to the revocation endpoint
//! of the approval backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::LedgerError;
use crate::ledger::{LedgerService, LedgerSpend};
use crate::limits::NATIVE_MINT;
use crate::transactions::TransactionStatus;
use crate::types::TokenBalance;

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

pub const REVOKE_PATH: &str = "/api/session/revoke";

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Signatures scanned per history lookup.
const HISTORY_LIMIT: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    /// Base URL of the service that submits revocations.
    pub authority_url: String,
    pub timeout: Duration,
}

impl Default for RpcLedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            authority_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct RpcLedger {
    rpc_url: String,
    authority_url: String,
    client: reqwest::Client,
}

impl RpcLedger {
    pub fn new(config: &RpcLedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(Self {
            rpc_url: config.rpc_url.clone(),
            authority_url: config.authority_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "{method}: HTTP {}",
                resp.status().as_u16()
            )));
        }
        let mut value: Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{method}: {e}")))?;
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            return Err(LedgerError::Rejected(format!("{method}: {message}")));
        }
        Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    fn require_address(&self, address: &str) -> Result<(), LedgerError> {
        if self.is_valid_address(address) {
            Ok(())
        } else {
            Err(LedgerError::InvalidAddress(address.to_string()))
        }
    }
}

#[async_trait]
impl LedgerService for RpcLedger {
    async fn native_balance(&self, owner: &str) -> Result<f64, LedgerError> {
        self.require_address(owner)?;
        let result = self.call("getBalance", json!([owner])).await?;
        let lamports = result["value"]
            .as_u64()
            .ok_or_else(|| LedgerError::Unavailable("getBalance: missing value".into()))?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }

    async fn token_balances(&self, owner: &str) -> Result<Vec<TokenBalance>, LedgerError> {
        self.require_address(owner)?;
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"programId": TOKEN_PROGRAM_ID}, {"encoding": "jsonParsed"}]),
            )
            .await?;
        let accounts = result["value"].as_array().cloned().unwrap_or_default();
        Ok(accounts.iter().filter_map(parse_token_account).collect())
    }

    async fn transaction_status(&self, signature: &str) -> Result<TransactionStatus, LedgerError> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;
        Ok(parse_signature_status(&result["value"][0]))
    }

    async fn session_key_ready(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<bool, LedgerError> {
        self.require_address(wallet_pubkey)?;
        self.require_address(session_pubkey)?;
        // The backend funds the session key for fees once it is authorized.
        let result = self
            .call("getAccountInfo", json!([session_pubkey, {"encoding": "base64"}]))
            .await?;
        Ok(!result["value"].is_null())
    }

    async fn revoke_session_key(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<(), LedgerError> {
        let url = format!("{}{}", self.authority_url, REVOKE_PATH);
        let resp = self
            .client
            .post(url)
            .json(&json!({"walletPubkey": wallet_pubkey, "sessionPubkey": session_pubkey}))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(LedgerError::UnknownSessionKey),
            StatusCode::CONFLICT | StatusCode::GONE => Err(LedgerError::AlreadyRevoked),
            s if s.is_server_error() => Err(LedgerError::Unavailable(format!("HTTP {}", s.as_u16()))),
            s => {
                let text = resp.text().await.unwrap_or_default();
                Err(LedgerError::Rejected(format!("HTTP {}: {}", s.as_u16(), text)))
            }
        }
    }

    async fn session_history(
        &self,
        wallet_pubkey: &str,
        session_pubkey: &str,
    ) -> Result<Vec<LedgerSpend>, LedgerError> {
        self.require_address(session_pubkey)?;
        let sigs = self
            .call(
                "getSignaturesForAddress",
                json!([session_pubkey, {"limit": HISTORY_LIMIT}]),
            )
            .await?;
        let mut signatures: Vec<String> = sigs
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e["err"].is_null())
                    .filter_map(|e| e["signature"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        // RPC returns newest first.
        signatures.reverse();

        let mut spends = Vec::new();
        for signature in signatures {
            let tx = self
                .call(
                    "getTransaction",
                    json!([signature, {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}]),
                )
                .await?;
            let found = parse_spends(&signature, wallet_pubkey, &tx);
            debug!(%signature, count = found.len(), "scanned session transaction");
            spends.extend(found);
        }
        Ok(spends)
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

fn parse_token_account(entry: &Value) -> Option<TokenBalance> {
    let info = &entry["account"]["data"]["parsed"]["info"];
    let mint = info["mint"].as_str()?.to_string();
    let amount = &info["tokenAmount"];
    let decimals = u8::try_from(amount["decimals"].as_u64()?).ok()?;
    let balance = amount["amount"].as_str()?.parse::<u64>().ok()?;
    let ui = amount["uiAmount"].as_f64().unwrap_or(0.0);
    Some(TokenBalance {
        mint,
        symbol: "UNKNOWN".to_string(),
        name: "Unknown Token".to_string(),
        decimals,
        balance,
        ui_balance: ui.to_string(),
        logo_uri: None,
    })
}

fn parse_signature_status(status: &Value) -> TransactionStatus {
    if status.is_null() {
        return TransactionStatus::Pending;
    }
    if !status["err"].is_null() {
        return TransactionStatus::Failed;
    }
    match status["confirmationStatus"].as_str() {
        Some("confirmed") | Some("finalized") => TransactionStatus::Confirmed,
        _ => TransactionStatus::Pending,
    }
}

/// Outgoing transfers from `wallet` in a parsed transaction.
fn parse_spends(signature: &str, wallet: &str, tx: &Value) -> Vec<LedgerSpend> {
    if tx.is_null() || !tx["meta"]["err"].is_null() {
        return Vec::new();
    }
    let Some(instructions) = tx["transaction"]["message"]["instructions"].as_array() else {
        return Vec::new();
    };

    let mut spends = Vec::new();
    for ix in instructions {
        let program = ix["program"].as_str().unwrap_or_default();
        let kind = ix["parsed"]["type"].as_str().unwrap_or_default();
        let info = &ix["parsed"]["info"];
        match (program, kind) {
            ("system", "transfer") if info["source"].as_str() == Some(wallet) => {
                if let Some(lamports) = info["lamports"].as_u64() {
                    spends.push(LedgerSpend {
                        signature: signature.to_string(),
                        mint: NATIVE_MINT.to_string(),
                        amount: lamports as f64 / LAMPORTS_PER_SOL,
                    });
                }
            }
            ("spl-token", "transferChecked") if info["authority"].as_str() == Some(wallet) => {
                let mint = info["mint"].as_str();
                let ui = info["tokenAmount"]["uiAmount"].as_f64();
                if let (Some(mint), Some(amount)) = (mint, ui) {
                    spends.push(LedgerSpend {
                        signature: signature.to_string(),
                        mint: mint.to_string(),
                        amount,
                    });
                }
            }
            _ => {}
        }
    }
    spends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_status_mapping() {
        assert_eq!(parse_signature_status(&Value::Null), TransactionStatus::Pending);
        assert_eq!(
            parse_signature_status(&json!({"err": null, "confirmationStatus": "processed"})),
            TransactionStatus::Pending
        );
        assert_eq!(
            parse_signature_status(&json!({"err": null, "confirmationStatus": "finalized"})),
            TransactionStatus::Confirmed
        );
        assert_eq!(
            parse_signature_status(&json!({"err": {"InstructionError": [0, "Custom"]}})),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn test_parse_token_account() {
        let entry = json!({
            "account": {"data": {"parsed": {"info": {
                "mint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                "tokenAmount": {"amount": "2500000", "decimals": 6, "uiAmount": 2.5}
            }}}}
        });
        let balance = parse_token_account(&entry).unwrap();
        assert_eq!(balance.balance, 2_500_000);
        assert_eq!(balance.decimals, 6);
        assert_eq!(balance.ui_balance, "2.5");
        assert!(parse_token_account(&json!({})).is_none());
    }

    #[test]
    fn test_parse_spends_filters_by_source() {
        let wallet = "W1111111111111111111111111111111";
        let tx = json!({
            "meta": {"err": null},
            "transaction": {"message": {"instructions": [
                {"program": "system", "parsed": {"type": "transfer",
                    "info": {"source": wallet, "destination": "D", "lamports": 300_000_000u64}}},
                {"program": "system", "parsed": {"type": "transfer",
                    "info": {"source": "other", "destination": wallet, "lamports": 5u64}}},
                {"program": "spl-token", "parsed": {"type": "transferChecked",
                    "info": {"authority": wallet, "mint": "M", "tokenAmount": {"uiAmount": 1.5}}}}
            ]}}
        });
        let spends = parse_spends("sigA", wallet, &tx);
        assert_eq!(spends.len(), 2);
        assert_eq!(spends[0].mint, NATIVE_MINT);
        assert_eq!(spends[0].amount, 0.3);
        assert_eq!(spends[1].mint, "M");
    }

    #[test]
    fn test_failed_transaction_has_no_spends() {
        let tx = json!({"meta": {"err": "boom"}, "transaction": {"message": {"instructions": []}}});
        assert!(parse_spends("sig", "W", &tx).is_empty());
    }
}
