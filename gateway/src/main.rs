//! CLI entry point. Subcommands mirror the gateway's operational surface:
//! `run` starts the ingress/egress loop and admin server,
//! `dryrun` validates configuration without binding a socket, `keys`
//! manages the session key lifecycle out of band, and `audit summary`
//! reads back a session's counters.

use std::path::PathBuf;
use std::sync::Arc;

use aegis_gateway::admin;
use aegis_gateway::audit::AuditLogger;
use aegis_gateway::config::Config;
use aegis_gateway::crypto::KeyManager;
use aegis_gateway::error::AegisError;
use aegis_gateway::gateway::Gateway;

use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "aegis-gateway", version, about = "In-line security gateway for UAV command-and-control traffic")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: binds the ingress/egress sockets and the admin server.
    Run,
    /// Load and validate configuration, then exit without binding a socket.
    Dryrun,
    /// Session key lifecycle operations, independent of a running gateway.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Audit trail inspection.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Force a session key rotation, regardless of the usual rotation triggers.
    Rotate,
    /// Revoke the active session key immediately.
    Revoke,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Print a session's decision summary. Defaults to the most recent one.
    Summary {
        #[arg(long)]
        session: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "aegis_gateway=info,tower_http=info".into()))
        .json()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let exit_code = match command {
        Command::Run => run().await,
        Command::Dryrun => dryrun(),
        Command::Keys { action } => keys(action),
        Command::Audit { action } => audit(action),
    };

    match exit_code {
        Ok(()) => std::process::exit(aegis_gateway::error::exit_code::CLEAN),
        Err(e) => {
            error!(error = %e, "aegis_gateway_exit");
            std::process::exit(e.exit_code());
        }
    }
}

fn load_config() -> Result<Config, AegisError> {
    Config::load_default_path()
}

async fn run() -> Result<(), AegisError> {
    let config = load_config()?;
    info!(
        listen = %config.listen_host,
        port = config.listen_port,
        fc = %config.fc_ip,
        crypto = config.enable_crypto,
        ml = config.enable_ml,
        shadow = config.enable_shadow,
        "starting"
    );

    let session_id = aegis_gateway::audit::new_session_id();
    let audit = Arc::new(AuditLogger::new(&config.log_dir, session_id)?);
    let metrics = Arc::new(admin::Metrics::new());

    let admin_addr = std::net::SocketAddr::new(config.listen_host, config.listen_port.saturating_add(1000));
    let admin_metrics = metrics.clone();
    let admin_audit = audit.clone();
    let admin_handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(admin_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%admin_addr, error = %e, "admin_bind_failed");
                return;
            }
        };
        info!(%admin_addr, "admin_listening");
        if let Err(e) = axum::serve(listener, admin::router(admin_metrics, admin_audit)).await {
            error!(error = %e, "admin_server_failed");
        }
    });

    let gateway = Gateway::new(config, audit, metrics)?;
    let result = gateway.run().await;
    admin_handle.abort();
    result
}

fn dryrun() -> Result<(), AegisError> {
    let config = load_config()?;
    println!("configuration OK");
    println!("  listen:        {}:{}", config.listen_host, config.listen_port);
    println!("  flight controller: {}:{}", config.fc_ip, config.fc_port);
    println!("  trusted GCS:   {:?}", config.trusted_gcs_ip);
    println!("  strict_mode:   {}", config.strict_mode);
    println!("  crypto:        {}", config.enable_crypto);
    println!("  ml:            {}", config.enable_ml);
    println!("  shadow:        {}", config.enable_shadow);
    println!("  log_dir:       {}", config.log_dir.display());
    Ok(())
}

fn keys(action: KeysAction) -> Result<(), AegisError> {
    let config = load_config()?;
    let mut manager = KeyManager::load_or_provision(
        config.log_dir.join("crypto"),
        config.crypto_session_lifetime_sec,
        config.crypto_max_commands_per_session,
        config.crypto_grace_period_sec,
    )?;
    match action {
        KeysAction::Rotate => {
            manager.rotate("manual");
            info!(session = %manager.metadata().session_id, "key_rotated");
            println!("rotated to session {}", manager.metadata().session_id);
        }
        KeysAction::Revoke => {
            manager.revoke("manual");
            info!("key_revoked");
            println!("session key revoked");
        }
    }
    Ok(())
}

fn audit(action: AuditAction) -> Result<(), AegisError> {
    let config = load_config()?;
    let AuditAction::Summary { session } = action;

    let path = match session {
        Some(id) => config.log_dir.join(format!("summary_{id}.json")),
        None => latest_summary_path(&config.log_dir)?,
    };

    let text = std::fs::read_to_string(&path)
        .map_err(|e| AegisError::Storage(format!("cannot read {}: {e}", path.display())))?;
    println!("{text}");
    Ok(())
}

fn latest_summary_path(log_dir: &std::path::Path) -> Result<PathBuf, AegisError> {
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(log_dir)
        .map_err(|e| AegisError::Storage(format!("cannot read {}: {e}", log_dir.display())))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("summary_")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    candidates.sort_by_key(|(modified, _)| *modified);
    candidates
        .pop()
        .map(|(_, path)| path)
        .ok_or_else(|| AegisError::Storage(format!("no session summaries found in {}", log_dir.display())))
}
