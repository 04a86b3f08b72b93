//! Output formatting for CLI results
//!
//! Every command renders through [`OutputFormatter`] in one of three modes:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use chrono::TimeZone;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use odyssey_core::ledger::shorten_address;
use odyssey_core::limits::NATIVE_MINT;
use odyssey_core::session::SessionView;
use odyssey_core::transactions::{Transaction, TransactionKind};
use odyssey_core::types::{Agent, Balances, Wallet};

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    /// Whether the operation was successful
    pub success: bool,
    /// The response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Command that was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }

    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Self::success(data)
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }

    pub fn error_with_command(message: &str, command: &str) -> JsonResponse<()> {
        JsonResponse {
            command: Some(command.to_string()),
            ..JsonResponse::error(message)
        }
    }
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    /// Format the wallet, with balances when they could be fetched
    pub fn format_wallet(
        &self,
        wallet: &Wallet,
        balances: Option<&Balances>,
        command: &str,
    ) -> String {
        match self.format {
            OutputFormat::Table => self.wallet_table(wallet, balances),
            OutputFormat::Json => {
                self.to_json_response(&WalletOutput { wallet, balances }, command)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_agents(&self, agents: &[Agent]) -> String {
        match self.format {
            OutputFormat::Table => self.agents_table(agents),
            OutputFormat::Json => self.to_json_response(
                &AgentsOutput {
                    count: agents.len(),
                    agents,
                },
                "agents",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_agent(&self, agent: &Agent, command: &str) -> String {
        match self.format {
            OutputFormat::Table => self.agent_table(agent),
            OutputFormat::Json => self.to_json_response(agent, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_sessions(&self, sessions: &[SessionView]) -> String {
        match self.format {
            OutputFormat::Table => self.sessions_table(sessions),
            OutputFormat::Json => self.to_json_response(
                &SessionsOutput {
                    count: sessions.len(),
                    sessions,
                },
                "session list",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_session(&self, session: &SessionView, command: &str) -> String {
        match self.format {
            OutputFormat::Table => self.session_table(session),
            OutputFormat::Json => self.to_json_response(session, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_transactions(&self, transactions: &[Transaction]) -> String {
        match self.format {
            OutputFormat::Table => self.transactions_table(transactions),
            OutputFormat::Json => self.to_json_response(
                &TransactionsOutput {
                    count: transactions.len(),
                    transactions,
                },
                "tx list",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_transaction(&self, tx: &Transaction, command: &str) -> String {
        match self.format {
            OutputFormat::Table => self.transaction_table(tx),
            OutputFormat::Json => self.to_json_response(tx, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format a generic success result
    pub fn format_success<T: Serialize>(&self, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Table | OutputFormat::Quiet => String::new(),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, error: &dyn std::error::Error, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {error}"),
            OutputFormat::Json => {
                let response = JsonResponse::error(&error.to_string());
                let mut output = match serde_json::to_value(&response) {
                    Ok(value) => value,
                    Err(e) => return format!("{{\"error\": \"{e}\"}}"),
                };
                output["exit_code"] = serde_json::json!(code as i32);
                output["exit_code_name"] = serde_json::json!(code.name());
                self.to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("✗ {message}"),
            OutputFormat::Json => println!(
                "{}",
                self.to_json(&ErrorOutput {
                    error: message.to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("⚠ {message}"),
            // Warnings go to stderr so stdout stays a single JSON document.
            OutputFormat::Json => eprintln!(
                "{}",
                self.to_json(&WarningOutput {
                    warning: message.to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    /// Info message (only in verbose mode)
    pub fn info(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            println!("ℹ {message}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        let response = JsonResponse::success_with_command(value, command);
        serde_json::to_string_pretty(&response).unwrap_or_else(|e| {
            self.to_json(&JsonResponse::error_with_command(
                &format!("Serialization error: {e}"),
                command,
            ))
        })
    }

    fn wallet_table(&self, wallet: &Wallet, balances: Option<&Balances>) -> String {
        let mut table = property_table();
        table.add_row(vec!["Public Key", &wallet.public_key]);
        table.add_row(vec!["Name", wallet.name.as_deref().unwrap_or("-")]);
        table.add_row(vec!["Created At", &format_time(wallet.created_at)]);
        match balances {
            Some(balances) => {
                table.add_row(vec!["SOL", &format_amount(balances.native)]);
                for token in &balances.tokens {
                    let label = if token.symbol.is_empty() {
                        shorten_address(&token.mint, 4)
                    } else {
                        token.symbol.clone()
                    };
                    table.add_row(vec![label, token.ui_balance.clone()]);
                }
            }
            None => {
                table.add_row(vec!["Balances", "unavailable"]);
            }
        }
        table.to_string()
    }

    fn agents_table(&self, agents: &[Agent]) -> String {
        if agents.is_empty() {
            return "No agents paired.".to_string();
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Agent ID", "Name", "Status", "Paired At", "Last Seen"]);
        for agent in agents {
            table.add_row(vec![
                agent.id.clone(),
                agent.name.clone(),
                agent.status.to_string(),
                format_time(agent.paired_at),
                agent
                    .last_seen
                    .map(format_time)
                    .unwrap_or_else(|| "Never".to_string()),
            ]);
        }
        table.to_string()
    }

    fn agent_table(&self, agent: &Agent) -> String {
        let mut table = property_table();
        table.add_row(vec!["Agent ID", &agent.id]);
        table.add_row(vec!["Name", &agent.name]);
        table.add_row(vec!["Status", &agent.status.to_string()]);
        table.add_row(vec!["Paired At", &format_time(agent.paired_at)]);
        table.to_string()
    }

    fn sessions_table(&self, sessions: &[SessionView]) -> String {
        if sessions.is_empty() {
            return "No sessions found.".to_string();
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Session ID", "Agent", "Status", "Remaining", "Expiry"]);
        for session in sessions {
            let remaining = session
                .allowances
                .iter()
                .map(|a| format!("{} {}", format_amount(a.remaining), allowance_label(a)))
                .collect::<Vec<_>>()
                .join("\n");
            table.add_row(vec![
                session.id.clone(),
                session.agent_id.clone(),
                session.status.to_string(),
                remaining,
                session.message.clone(),
            ]);
        }
        table.to_string()
    }

    fn session_table(&self, session: &SessionView) -> String {
        let mut table = property_table();
        table.add_row(vec!["Session ID", &session.id]);
        table.add_row(vec!["Agent", &session.agent_id]);
        table.add_row(vec!["Status", &session.status.to_string()]);
        table.add_row(vec!["Duration", &session.duration]);
        table.add_row(vec!["Expires At", &format_time(session.expires_at)]);
        table.add_row(vec!["Expiry", &session.message]);
        for allowance in &session.allowances {
            table.add_row(vec![
                allowance_label(allowance),
                format!(
                    "{} of {} spent ({:.1}%), {} left",
                    format_amount(allowance.spent),
                    format_amount(allowance.limit),
                    allowance.percent_spent,
                    format_amount(allowance.remaining),
                ),
            ]);
        }
        table.to_string()
    }

    fn transactions_table(&self, transactions: &[Transaction]) -> String {
        if transactions.is_empty() {
            return "No transactions recorded.".to_string();
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Signature", "Kind", "To", "Amount", "Status", "Time"]);
        for tx in transactions {
            table.add_row(vec![
                shorten_address(&tx.signature, 6),
                kind_label(tx.kind).to_string(),
                shorten_address(&tx.to, 4),
                format!("{} {}", format_amount(tx.amount), asset_label(tx)),
                tx.status.to_string(),
                format_time(tx.timestamp),
            ]);
        }
        table.to_string()
    }

    fn transaction_table(&self, tx: &Transaction) -> String {
        let mut table = property_table();
        table.add_row(vec!["Signature", &tx.signature]);
        table.add_row(vec!["Kind", kind_label(tx.kind)]);
        table.add_row(vec!["From", &tx.from]);
        table.add_row(vec!["To", &tx.to]);
        table.add_row(vec![
            "Amount",
            &format!("{} {}", format_amount(tx.amount), asset_label(tx)),
        ]);
        table.add_row(vec!["Status", &tx.status.to_string()]);
        table.add_row(vec!["Session", tx.session_id.as_deref().unwrap_or("-")]);
        table.add_row(vec!["Time", &format_time(tx.timestamp)]);
        table.to_string()
    }
}

fn property_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table
}

fn kind_label(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Transfer => "transfer",
        TransactionKind::TokenTransfer => "token transfer",
        TransactionKind::Other => "other",
    }
}

fn allowance_label(allowance: &odyssey_core::session::AllowanceView) -> String {
    match &allowance.symbol {
        Some(symbol) => symbol.clone(),
        None if allowance.mint == NATIVE_MINT => "SOL".to_string(),
        None => shorten_address(&allowance.mint, 4),
    }
}

fn asset_label(tx: &Transaction) -> String {
    match (&tx.symbol, &tx.mint) {
        (Some(symbol), _) => symbol.clone(),
        (None, Some(mint)) if mint != NATIVE_MINT => shorten_address(mint, 4),
        _ => "SOL".to_string(),
    }
}

/// Trims trailing zeros so `0.250000000` reads as `0.25`.
fn format_amount(amount: f64) -> String {
    let text = format!("{amount:.9}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Unix milliseconds as a UTC timestamp.
pub fn format_time(ms: u64) -> String {
    match i64::try_from(ms)
        .ok()
        .and_then(|ms| chrono::Utc.timestamp_millis_opt(ms).single())
    {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ms.to_string(),
    }
}

// JSON output structures

#[derive(Serialize)]
struct WalletOutput<'a> {
    wallet: &'a Wallet,
    #[serde(skip_serializing_if = "Option::is_none")]
    balances: Option<&'a Balances>,
}

#[derive(Serialize)]
struct AgentsOutput<'a> {
    agents: &'a [Agent],
    count: usize,
}

#[derive(Serialize)]
struct SessionsOutput<'a> {
    sessions: &'a [SessionView],
    count: usize,
}

#[derive(Serialize)]
struct TransactionsOutput<'a> {
    transactions: &'a [Transaction],
    count: usize,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
    timestamp: String,
}

#[derive(Serialize)]
struct WarningOutput {
    warning: String,
    timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use odyssey_core::session::{AllowanceView, SessionStatus};
    use odyssey_core::transactions::TransactionStatus;
    use odyssey_core::types::AgentStatus;

    fn sample_agent() -> Agent {
        Agent {
            id: "agent-1".into(),
            name: "Research Bot".into(),
            paired_at: 1_700_000_000_000,
            last_seen: None,
            status: AgentStatus::Active,
        }
    }

    fn sample_view() -> SessionView {
        SessionView {
            id: "sess-1".into(),
            agent_id: "agent-1".into(),
            status: SessionStatus::Active,
            message: "Expires in 59m".into(),
            expires_at: 1_700_003_600_000,
            time_remaining_secs: 3540,
            duration: "1h".into(),
            allowances: vec![AllowanceView {
                mint: NATIVE_MINT.into(),
                symbol: None,
                limit: 0.5,
                spent: 0.3,
                remaining: 0.2,
                percent_spent: 60.0,
            }],
        }
    }

    fn sample_tx() -> Transaction {
        Transaction {
            signature: "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb".into(),
            kind: TransactionKind::Transfer,
            from: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".into(),
            to: "SysvarRent111111111111111111111111111111111".into(),
            amount: 0.25,
            mint: Some(NATIVE_MINT.into()),
            symbol: None,
            timestamp: 1_700_000_000_000,
            status: TransactionStatus::Confirmed,
            session_id: Some("sess-1".into()),
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("quiet".parse::<OutputFormat>().unwrap(), OutputFormat::Quiet);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_json_agents_schema() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let output = formatter.format_agents(&[sample_agent()]);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "agents");
        assert_eq!(value["data"]["count"], 1);
        assert_eq!(value["data"]["agents"][0]["id"], "agent-1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_table_session_shows_allowance() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let output = formatter.format_session(&sample_view(), "session show");
        assert!(output.contains("sess-1"));
        assert!(output.contains("0.3 of 0.5 spent (60.0%), 0.2 left"));
        assert!(output.contains("SOL"));
    }

    #[test]
    fn test_empty_lists() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.format_agents(&[]), "No agents paired.");
        assert_eq!(formatter.format_sessions(&[]), "No sessions found.");
        assert_eq!(formatter.format_transactions(&[]), "No transactions recorded.");
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        assert!(formatter.is_quiet());
        assert!(formatter.format_transaction(&sample_tx(), "tx confirm").is_empty());
        assert!(formatter.format_sessions(&[sample_view()]).is_empty());
    }

    #[test]
    fn test_transaction_table_uses_short_addresses() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let output = formatter.format_transactions(&[sample_tx()]);
        assert!(output.contains("5VERv8...JjBRnb"));
        assert!(output.contains("0.25 SOL"));
        assert!(output.contains("confirmed"));
    }

    #[test]
    fn test_error_with_code_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let err = odyssey_core::AuthzError::NotOnboarded;
        let output = formatter.format_error_with_code(&err, ExitCode::NotFound);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["exit_code"], 6);
        assert_eq!(value["exit_code_name"], "NOT_FOUND");
    }

    #[test]
    fn test_format_amount_trims_zeros() {
        assert_eq!(format_amount(0.25), "0.25");
        assert_eq!(format_amount(1.0), "1");
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(0.000000001), "0.000000001");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_time(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
    }
}
