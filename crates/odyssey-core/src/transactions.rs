//! Append-only record of transfers made through sessions.

use serde::{Deserialize, Serialize};

use crate::errors::{AuthzError, AuthzResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Confirmed => write!(f, "confirmed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    TokenTransfer,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub signature: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub from: String,
    pub to: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub timestamp: u64,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Transactions keyed by signature, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    entries: Vec<Transaction>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &str) -> Option<&Transaction> {
        self.entries.iter().find(|tx| tx.signature == signature)
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.get(signature).is_some()
    }

    /// Append a new entry. A signature already present is left untouched and
    /// `false` is returned.
    pub fn append(&mut self, tx: Transaction) -> bool {
        if self.contains(&tx.signature) {
            return false;
        }
        self.entries.push(tx);
        true
    }

    /// Move an entry out of `pending`. Settling to the status it already has
    /// is a no-op; any other change to a settled entry is rejected.
    ///
    /// Returns true if the stored status changed.
    pub fn settle(&mut self, signature: &str, status: TransactionStatus) -> AuthzResult<bool> {
        let tx = self
            .entries
            .iter_mut()
            .find(|tx| tx.signature == signature)
            .ok_or_else(|| AuthzError::not_found("transaction", signature))?;

        if tx.status == status {
            return Ok(false);
        }
        if tx.status.is_terminal() || status == TransactionStatus::Pending {
            return Err(AuthzError::InvalidTransition {
                entity: "transaction",
                from: tx.status.to_string(),
                to: status.to_string(),
            });
        }
        tx.status = status;
        Ok(true)
    }

    /// Entries for one session, oldest first.
    pub fn for_session<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a Transaction> {
        self.entries
            .iter()
            .filter(move |tx| tx.session_id.as_deref() == Some(session_id))
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<&Transaction> {
        self.entries.iter().rev().take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(signature: &str, session: Option<&str>) -> Transaction {
        Transaction {
            signature: signature.into(),
            kind: TransactionKind::Transfer,
            from: "W".into(),
            to: "D".into(),
            amount: 0.1,
            mint: None,
            symbol: Some("SOL".into()),
            timestamp: 1,
            status: TransactionStatus::Pending,
            session_id: session.map(String::from),
        }
    }

    #[test]
    fn test_append_is_keyed_on_signature() {
        let mut log = TransactionLog::new();
        assert!(log.append(tx("sigA", Some("s1"))));
        let mut dup = tx("sigA", Some("s1"));
        dup.amount = 9.0;
        assert!(!log.append(dup));
        assert_eq!(log.len(), 1);
        assert_eq!(log.get("sigA").unwrap().amount, 0.1);
    }

    #[test]
    fn test_settle_only_from_pending() {
        let mut log = TransactionLog::new();
        log.append(tx("sigA", None));
        assert!(log.settle("sigA", TransactionStatus::Confirmed).unwrap());
        assert!(!log.settle("sigA", TransactionStatus::Confirmed).unwrap());
        assert!(matches!(
            log.settle("sigA", TransactionStatus::Failed),
            Err(AuthzError::InvalidTransition { .. })
        ));
        assert!(matches!(
            log.settle("missing", TransactionStatus::Failed),
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[test]
    fn test_cannot_settle_back_to_pending() {
        let mut log = TransactionLog::new();
        log.append(tx("sigA", None));
        log.settle("sigA", TransactionStatus::Failed).unwrap();
        assert!(log.settle("sigA", TransactionStatus::Pending).is_err());
    }

    #[test]
    fn test_for_session_and_recent() {
        let mut log = TransactionLog::new();
        log.append(tx("a", Some("s1")));
        log.append(tx("b", Some("s2")));
        log.append(tx("c", Some("s1")));
        let sigs: Vec<_> = log.for_session("s1").map(|t| t.signature.as_str()).collect();
        assert_eq!(sigs, ["a", "c"]);
        let recent: Vec<_> = log.recent(2).iter().map(|t| t.signature.as_str()).collect();
        assert_eq!(recent, ["c", "b"]);
    }

    #[test]
    fn test_type_field_name() {
        let mut t = tx("a", None);
        t.kind = TransactionKind::TokenTransfer;
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "token_transfer");
        assert!(json.get("sessionId").is_none());
    }
}
