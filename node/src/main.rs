// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # PFTA Kernel Node
//!
//! Entry point for the `pfta-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens (or deploys) the treasury kernel, and serves
//! the HTTP/WS API.
//!
//! The binary supports five subcommands:
//!
//! - `run`: start the node
//! - `init`: initialize the data directory and generate the admin key
//! - `status`: query a running node's status endpoint
//! - `call`: send a signed request to a running node
//! - `version`: print build version information

mod api;
mod auth;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use pfta_contracts::KernelIndex;
use pfta_protocol::config::{
    MATURITY_SCAN_INTERVAL_MS, PROTOCOL_VERSION, PUBLIC_KEY_HEADER, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use pfta_protocol::{KernelDb, OperatorKey, Principal, SystemClock, TokenLedger};

use cli::{Commands, PftaNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Administrator key file inside the data directory.
const ADMIN_KEY_FILE: &str = "admin.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PftaNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Call(args) => call_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: kernel, API server, metrics endpoint, and the maturity
/// watcher.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "pfta_node=info,pfta_contracts=info,pfta_protocol=info,tower_http=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting pfta-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = KernelDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Kernel ---
    let admin = resolve_admin(args.admin.as_deref(), &args.data_dir)?;
    let ledger = Arc::new(TokenLedger::open(db.clone()).context("failed to load asset ledger")?);
    let kernel = KernelIndex::open_or_deploy(
        db,
        admin,
        args.max_payment,
        ledger.clone(),
        Arc::new(SystemClock),
    )
    .context("failed to open or deploy the kernel")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        kernel: kernel.clone(),
        ledger,
        event_tx,
        metrics: Arc::clone(&node_metrics),
        replay: Arc::new(auth::ReplayGuard::new()),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Maturity watcher ---
    // Payments are never executed automatically; this only keeps the
    // ready gauge current and tells operators when something matures.
    let scheduler = Arc::clone(kernel.scheduler());
    let metrics_ref = Arc::clone(&node_metrics);
    let watcher = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(MATURITY_SCAN_INTERVAL_MS));
        let mut last_ready = 0usize;
        loop {
            interval.tick().await;
            let ready = scheduler.ready_payments();
            metrics_ref.payments_ready.set(ready.len() as i64);
            if ready.len() != last_ready {
                tracing::info!(ready = ready.len(), ids = ?ready, "mature payments awaiting execution");
                last_ready = ready.len();
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    watcher.abort();
    tracing::info!("pfta-node stopped");
    Ok(())
}

/// Picks the administrator principal: the explicit `--admin` value, or the
/// principal derived from the key written by `init`.
fn resolve_admin(explicit: Option<&str>, data_dir: &Path) -> Result<Principal> {
    if let Some(admin) = explicit.map(str::trim).filter(|a| !a.is_empty()) {
        return Principal::parse(admin).context("invalid --admin principal");
    }
    let key_path = data_dir.join(ADMIN_KEY_FILE);
    if !key_path.exists() {
        bail!(
            "no administrator configured: pass --admin or run `pfta-node init` to create {}",
            key_path.display()
        );
    }
    Ok(load_key(&key_path)?.principal())
}

fn load_key(path: &Path) -> Result<OperatorKey> {
    let hex_key = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    OperatorKey::from_hex(&hex_key).with_context(|| format!("invalid operator key in {}", path.display()))
}

/// Initializes a data directory and generates the administrator key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("pfta_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(ADMIN_KEY_FILE);
    if key_path.exists() {
        bail!("{} already exists; refusing to overwrite it", key_path.display());
    }

    let key = OperatorKey::generate();
    std::fs::write(&key_path, key.to_hex())
        .with_context(|| format!("failed to write administrator key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let admin = key.principal();
    tracing::info!(%admin, key_path = %key_path.display(), "administrator key generated");

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Admin key      : {}", key_path.display());
    println!("  Public key     : {}", key.public_key_hex());
    println!("  Admin principal: {}", admin);

    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()
        .context("node returned an error status")?
        .json()
        .await
        .context("invalid status response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Signs one request with an operator key, sends it, and prints the reply.
async fn call_node(args: cli::CallArgs) -> Result<()> {
    if !args.path.starts_with('/') {
        bail!("path must start with '/', got {:?}", args.path);
    }
    let key = load_key(&args.key)?;
    let method = reqwest::Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method {:?}", args.method))?;
    let body = args.body.unwrap_or_default().into_bytes();
    let creds = key.sign_request(
        method.as_str(),
        &args.path,
        chrono::Utc::now().timestamp_millis(),
        &body,
    );

    let url = format!("{}{}", args.rpc_url.trim_end_matches('/'), args.path);
    let response = reqwest::Client::new()
        .request(method, &url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(PUBLIC_KEY_HEADER, creds.public_key)
        .header(SIGNATURE_HEADER, creds.signature)
        .header(TIMESTAMP_HEADER, creds.timestamp_ms.to_string())
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    let status = response.status();
    let text = response.text().await.context("failed to read response body")?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{}", text),
        Err(_) => {}
    }
    if !status.is_success() {
        bail!("node answered {}", status);
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("pfta-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
    println!("rustc     {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed, that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_admin_wins() {
        let dir = tempfile::tempdir().unwrap();
        let admin = resolve_admin(Some(" treasurer "), dir.path()).unwrap();
        assert_eq!(admin, Principal::new("treasurer"));
    }

    #[test]
    fn admin_from_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = OperatorKey::generate();
        std::fs::write(dir.path().join(ADMIN_KEY_FILE), format!("{}\n", key.to_hex())).unwrap();

        let admin = resolve_admin(None, dir.path()).unwrap();
        assert_eq!(admin, key.principal());
    }

    #[test]
    fn unusable_explicit_admin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_admin(Some("admin\u{0}"), dir.path()).is_err());
    }

    #[test]
    fn missing_admin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_admin(None, dir.path()).is_err());
    }
}
