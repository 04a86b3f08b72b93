//! CLI command definitions and argument parsing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};

use odyssey_core::errors::{AuthzError, AuthzResult};
use odyssey_core::http_backend::HttpBackend;
use odyssey_core::limits::{SpendingLimit, NATIVE_MINT};
use odyssey_core::rpc_ledger::RpcLedger;
use odyssey_core::{Authorizer, Collaborators};

use crate::config::Config;
use crate::output::{OutputFormat, OutputFormatter};
use crate::store::FileSecureStore;
use crate::ExitCode;

/// Odyssey Controller CLI - delegated spending for agents
#[derive(Parser, Debug)]
#[command(name = "odyssey-controller")]
#[command(version, about = "Odyssey Controller CLI - delegated spending for agents")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet (defaults to the config file)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Approval backend base URL
    #[arg(long, global = true, env = "ODYSSEY_API_URL")]
    pub api_url: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record the wallet created on the owner's authenticator
    Init(InitArgs),
    /// Show the wallet and its balances
    Wallet(WalletArgs),
    /// Pair an agent using the code it displays
    Pair(PairArgs),
    /// List paired agents
    Agents,
    /// Remove a paired agent
    Unpair {
        /// Agent to remove
        agent_id: String,
    },
    /// Request, inspect, and revoke spending sessions
    Session(SessionArgs),
    /// Transfer funds through a session
    Send(SendArgs),
    /// Inspect and settle transactions
    Tx(TxArgs),
    /// Manage the configuration file
    Config(ConfigArgs),
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let format = config
            .output
            .format
            .parse::<OutputFormat>()
            .unwrap_or_default();
        let formatter = OutputFormatter::new(format, config.output.verbose);

        let command = match self.command {
            Commands::Config(args) => {
                return args.execute(&config, self.config.as_deref(), &formatter);
            }
            command => command,
        };

        let authz = match open_authorizer(&config, &formatter).await {
            Ok(authz) => authz,
            Err(e) => return Ok(report(&formatter, &e)),
        };
        if let Err(e) = authz.sweep_expired().await {
            warn!(error = %e, "could not sweep expired sessions");
        }

        let result = match command {
            Commands::Init(args) => args.execute(&authz, &formatter).await,
            Commands::Wallet(args) => args.execute(&authz, &formatter).await,
            Commands::Pair(args) => args.execute(&authz, &formatter).await,
            Commands::Agents => {
                emit(formatter.format_agents(&authz.agents().await));
                Ok(())
            }
            Commands::Unpair { agent_id } => unpair(&authz, &formatter, &agent_id).await,
            Commands::Session(args) => args.execute(&authz, &formatter).await,
            Commands::Send(args) => args.execute(&authz, &formatter).await,
            Commands::Tx(args) => args.execute(&authz, &formatter).await,
            Commands::Config(_) => Ok(()),
        };

        Ok(match result {
            Ok(()) => ExitCode::Success,
            Err(e) => report(&formatter, &e),
        })
    }
}

async fn open_authorizer(config: &Config, formatter: &OutputFormatter) -> AuthzResult<Authorizer> {
    let backend = HttpBackend::new(&config.backend_config())?;
    let ledger = RpcLedger::new(&config.ledger_config())?;
    let path = config.storage_path();
    formatter.progress(&format!("Using secure store {}", path.display()));
    debug!(
        backend = %config.backend.base_url,
        rpc = %config.ledger.effective_rpc_url(),
        "opening authorizer"
    );
    let deps = Collaborators::new(
        Arc::new(backend),
        Arc::new(ledger),
        Arc::new(FileSecureStore::new(path)),
    );
    Authorizer::open(deps, config.authz_config()).await
}

async fn unpair(authz: &Authorizer, formatter: &OutputFormatter, agent_id: &str) -> AuthzResult<()> {
    let unpaired = authz.unpair(agent_id).await?;
    formatter.success(&format!("Unpaired agent {}", unpaired.agent.id));
    for session_id in &unpaired.unrevoked {
        formatter.warning(&format!(
            "Session {session_id} is still live; run `session revoke {session_id}` to retry"
        ));
    }
    emit(formatter.format_agent(&unpaired.agent, "unpair"));
    Ok(())
}

fn report(formatter: &OutputFormatter, err: &AuthzError) -> ExitCode {
    let code = ExitCode::from(err);
    let message = formatter.format_error_with_code(err, code);
    match formatter.format() {
        OutputFormat::Table => eprintln!("{message}"),
        OutputFormat::Json => println!("{message}"),
        OutputFormat::Quiet => {}
    }
    code
}

fn emit(text: String) {
    if !text.is_empty() {
        println!("{text}");
    }
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be watched.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Parse `MINT:AMOUNT:DECIMALS[:SYMBOL]`.
pub fn parse_token_limit(s: &str) -> Result<SpendingLimit, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let (mint, amount, decimals, symbol) = match parts.as_slice() {
        [mint, amount, decimals] => (*mint, *amount, *decimals, None),
        [mint, amount, decimals, symbol] => (*mint, *amount, *decimals, Some(*symbol)),
        _ => return Err("expected MINT:AMOUNT:DECIMALS[:SYMBOL]".to_string()),
    };
    if mint.is_empty() {
        return Err("mint is required".to_string());
    }
    let amount: f64 = amount
        .parse()
        .map_err(|e| format!("invalid amount '{amount}': {e}"))?;
    let decimals: u8 = decimals
        .parse()
        .map_err(|e| format!("invalid decimals '{decimals}': {e}"))?;

    let limit = SpendingLimit::new(mint, amount, decimals);
    Ok(match symbol.filter(|s| !s.is_empty()) {
        Some(symbol) => limit.with_symbol(symbol),
        None => limit,
    })
}

// ============================================================================
// Wallet
// ============================================================================

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Wallet public key (base58)
    #[arg(long)]
    pub public_key: String,

    /// Authenticator credential id
    #[arg(long)]
    pub credential_id: String,

    /// Display name for the wallet
    #[arg(long)]
    pub name: Option<String>,
}

impl InitArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        let wallet = authz
            .onboard(&self.public_key, &self.credential_id, self.name)
            .await?;
        formatter.success("Wallet recorded");
        emit(formatter.format_wallet(&wallet, None, "init"));
        Ok(())
    }
}

/// Arguments for the wallet command
#[derive(Args, Debug)]
pub struct WalletArgs {
    /// Skip the balance lookup
    #[arg(long)]
    pub offline: bool,
}

impl WalletArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        let wallet = authz.wallet().await?;
        let balances = if self.offline {
            None
        } else {
            formatter.progress("Fetching balances...");
            match authz.balances().await {
                Ok(balances) => Some(balances),
                Err(e) => {
                    formatter.warning(&format!("Balances unavailable: {e}"));
                    None
                }
            }
        };
        emit(formatter.format_wallet(&wallet, balances.as_ref(), "wallet"));
        Ok(())
    }
}

// ============================================================================
// Pairing
// ============================================================================

/// Arguments for the pair command
#[derive(Args, Debug)]
pub struct PairArgs {
    /// Pairing code shown by the agent
    pub code: String,

    /// Identifier the agent will be known by
    #[arg(long)]
    pub agent_id: String,

    /// Display name (defaults to the agent id)
    #[arg(long)]
    pub agent_name: Option<String>,
}

impl PairArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        let name = self.agent_name.as_deref().unwrap_or(&self.agent_id);
        let request = authz
            .initiate_pairing(&self.code, &self.agent_id, name)
            .await?;
        formatter.info(&format!("Pairing request {} submitted", request.request_id));
        formatter.progress("Waiting for the owner to approve (Ctrl-C to stop)...");

        let agent = authz
            .await_pairing_or_cancel(&request.request_id, interrupted())
            .await?;
        formatter.success(&format!("Paired agent {}", agent.id));
        emit(formatter.format_agent(&agent, "pair"));
        Ok(())
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Arguments for the session command
#[derive(Args, Debug)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub action: SessionAction,
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Ask the owner for a spending session and wait for the answer
    Request {
        /// Agent the session is for
        agent_id: String,

        /// Native allowance in SOL
        #[arg(long)]
        sol: Option<f64>,

        /// Token allowance as MINT:AMOUNT:DECIMALS[:SYMBOL] (repeatable)
        #[arg(long = "token", value_parser = parse_token_limit)]
        tokens: Vec<SpendingLimit>,

        /// Session length in seconds
        #[arg(long, default_value_t = 3600)]
        duration: u64,
    },
    /// List sessions
    List {
        /// Only sessions of this agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show one session with its allowances
    Show { session_id: String },
    /// Activate a pending session once its key is usable on the ledger
    Activate { session_id: String },
    /// Revoke a session
    Revoke { session_id: String },
    /// Re-derive spent amounts from the ledger
    Reconcile { session_id: String },
}

impl SessionArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        match self.action {
            SessionAction::Request {
                agent_id,
                sol,
                tokens,
                duration,
            } => {
                let limits: Vec<SpendingLimit> = sol
                    .map(SpendingLimit::native)
                    .into_iter()
                    .chain(tokens)
                    .collect();
                let request = authz.request_session(&agent_id, limits, duration).await?;
                formatter.info(&format!(
                    "Session request {} submitted for key {}",
                    request.request_id, request.session_pubkey
                ));
                let poll = &authz.config().poll;
                formatter.progress(&format!(
                    "Waiting for approval, checking every {}s up to {} times (Ctrl-C to stop)...",
                    poll.interval.as_secs(),
                    poll.max_attempts
                ));

                let session = authz
                    .await_session_or_cancel(&request.request_id, interrupted())
                    .await?;
                formatter.success(&format!("Session {} approved", session.id));
                let view = authz.session_view(&session.id).await?;
                emit(formatter.format_session(&view, "session request"));
            }
            SessionAction::List { agent } => {
                let views: Vec<_> = authz
                    .session_views()
                    .await
                    .into_iter()
                    .filter(|v| agent.as_deref().map_or(true, |a| v.agent_id == a))
                    .collect();
                emit(formatter.format_sessions(&views));
            }
            SessionAction::Show { session_id } => {
                let view = authz.session_view(&session_id).await?;
                emit(formatter.format_session(&view, "session show"));
            }
            SessionAction::Activate { session_id } => {
                authz.activate_session(&session_id).await?;
                formatter.success(&format!("Session {session_id} is active"));
                let view = authz.session_view(&session_id).await?;
                emit(formatter.format_session(&view, "session activate"));
            }
            SessionAction::Revoke { session_id } => {
                authz.revoke(&session_id).await?;
                formatter.success(&format!("Session {session_id} revoked"));
                let view = authz.session_view(&session_id).await?;
                emit(formatter.format_session(&view, "session revoke"));
            }
            SessionAction::Reconcile { session_id } => {
                formatter.progress("Reading session history from the ledger...");
                authz.reconcile_spent(&session_id).await?;
                let view = authz.session_view(&session_id).await?;
                emit(formatter.format_session(&view, "session reconcile"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Transfers
// ============================================================================

/// Arguments for the send command
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Session to spend from
    pub session_id: String,

    /// Destination address (base58)
    pub destination: String,

    /// Amount in display units
    pub amount: f64,

    /// Token mint, or "native" for SOL
    #[arg(long, default_value = NATIVE_MINT)]
    pub mint: String,
}

impl SendArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        formatter.progress(&format!(
            "Sending {} {} to {}...",
            self.amount, self.mint, self.destination
        ));
        let tx = authz
            .transfer(&self.session_id, &self.destination, &self.mint, self.amount)
            .await?;
        formatter.success(&format!("Transaction {} {}", tx.signature, tx.status));
        emit(formatter.format_transaction(&tx, "send"));
        Ok(())
    }
}

/// Arguments for the tx command
#[derive(Args, Debug)]
pub struct TxArgs {
    #[command(subcommand)]
    pub action: TxAction,
}

/// Transaction subcommands
#[derive(Subcommand, Debug)]
pub enum TxAction {
    /// Ask the ledger whether a pending transaction settled
    Confirm { signature: String },
    /// List recorded transactions, newest first
    List {
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only transactions of this session
        #[arg(long)]
        session: Option<String>,
    },
    /// Co-sign and submit a prepared base64 transaction through a session
    Submit {
        session_id: String,
        transaction: String,
    },
    /// Count a confirmed spend against a session
    Record {
        session_id: String,
        signature: String,
        amount: f64,

        #[arg(long, default_value = NATIVE_MINT)]
        mint: String,
    },
}

impl TxArgs {
    pub async fn execute(self, authz: &Authorizer, formatter: &OutputFormatter) -> AuthzResult<()> {
        match self.action {
            TxAction::Confirm { signature } => {
                let tx = authz.refresh_transaction(&signature).await?;
                emit(formatter.format_transaction(&tx, "tx confirm"));
            }
            TxAction::List { limit, session } => {
                let txs = match session {
                    Some(session_id) => {
                        let mut txs = authz.session_transactions(&session_id).await;
                        txs.truncate(limit);
                        txs
                    }
                    None => authz.transactions(limit).await,
                };
                emit(formatter.format_transactions(&txs));
            }
            TxAction::Submit {
                session_id,
                transaction,
            } => {
                let tx = authz.sign_and_send(&session_id, &transaction).await?;
                formatter.success(&format!("Submitted {}", tx.signature));
                emit(formatter.format_transaction(&tx, "tx submit"));
            }
            TxAction::Record {
                session_id,
                signature,
                amount,
                mint,
            } => {
                authz
                    .record_spend(&session_id, &mint, amount, &signature)
                    .await?;
                let view = authz.session_view(&session_id).await?;
                emit(formatter.format_session(&view, "tx record"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a commented sample configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigArgs {
    pub fn execute(
        self,
        config: &Config,
        custom_path: Option<&Path>,
        formatter: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        match self.action {
            ConfigAction::Show => {
                match formatter.format() {
                    OutputFormat::Table => println!("{}", toml::to_string_pretty(config)?),
                    _ => emit(formatter.format_success(config, "config show")),
                }
                Ok(ExitCode::Success)
            }
            ConfigAction::Init { force } => {
                let path = match custom_path.map(Path::to_path_buf).or_else(Config::default_path) {
                    Some(path) => path,
                    None => {
                        formatter.error("No configuration directory is available; pass --config");
                        return Ok(ExitCode::InvalidInput);
                    }
                };
                if path.exists() && !force {
                    formatter.error(&format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    ));
                    return Ok(ExitCode::InvalidInput);
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, Config::sample_toml())?;
                formatter.success(&format!("Wrote {}", path.display()));
                emit(formatter.format_success(&path, "config init"));
                Ok(ExitCode::Success)
            }
        }
    }
}
