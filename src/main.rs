use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use gbkd::config::AppConfig;
use gbkd::context::AppContext;
use gbkd::core::identity::{IdentityResolver, NoIdentity, OAuthIdentityResolver};
use gbkd::core::transfer_tool::{RunLimits, create_tool};
use gbkd::core::Orchestrator;
use gbkd::db::SqliteStore;
use gbkd::logging::{self, LogConfig};
use gbkd::rpc::RpcClient;

#[derive(Parser)]
#[command(name = "gbkd")]
#[command(about = "Scheduled backup and restore daemon for rclone remotes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: /etc/gbkd/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, remote monitor and control channel
    Daemon(ServerArgs),
    /// Show daemon status
    Status,
    /// List jobs with their next run
    Jobs,
    /// Run a job now
    Trigger { id: String },
    /// List tracked remotes
    Remotes,
    /// Re-read the rclone profiles now
    SyncRemotes,
    /// List entries under a path of a remote
    Browse {
        name: String,
        #[arg(default_value = "")]
        path: String,
    },
    /// Show recent job logs
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    database_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rclone_binary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rclone_config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    phase_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::new(cli.config.clone(), Some(args))?,
        _ => AppConfig::new(cli.config.clone(), None::<&ServerArgs>)?,
    };

    logging::init(LogConfig::from(&config));

    match cli.command {
        Commands::Daemon(_) => run_daemon(config).await.context("Failed to start daemon")?,
        Commands::Config => print!("{}", config.to_toml()?),
        Commands::Status => print_call(&config, "daemon.status", None).await?,
        Commands::Jobs => print_call(&config, "jobs.list", None).await?,
        Commands::Trigger { id } => print_call(&config, "jobs.trigger", Some(json!({ "id": id }))).await?,
        Commands::Remotes => print_call(&config, "remotes.list", None).await?,
        Commands::SyncRemotes => print_call(&config, "remotes.sync", None).await?,
        Commands::Browse { name, path } => {
            print_call(&config, "remotes.browse", Some(json!({ "name": name, "path": path }))).await?
        }
        Commands::Logs { limit } => print_call(&config, "logs.list", Some(json!({ "limit": limit }))).await?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let store = SqliteStore::open(&config.database_path, config.log_history_limit).await?;
    let cancel = CancellationToken::new();
    let tool = create_tool(
        &config,
        RunLimits {
            deadline: config.phase_timeout(),
            cancel: cancel.clone(),
        },
    );

    let identity: Arc<dyn IdentityResolver> = if config.simulation {
        Arc::new(NoIdentity)
    } else {
        Arc::new(OAuthIdentityResolver::new(
            config.rclone_config_path(),
            config.identity_endpoint.clone(),
            config.identity_attempts,
        ))
    };

    let ctx = AppContext::new(config, store, tool, identity, cancel);
    Orchestrator::new(ctx).start().await
}

async fn print_call(config: &AppConfig, method: &str, params: Option<Value>) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    let result: Value = client
        .call(method, params)
        .await
        .with_context(|| format!("{method} failed (is the daemon running on {}?)", config.rpc_bind))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
