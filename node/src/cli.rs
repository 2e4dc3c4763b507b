//! # CLI Interface
//!
//! Defines the command-line argument structure for `pfta-node` using
//! `clap` derive. Supports five subcommands: `run`, `init`, `status`,
//! `call` and `version`.

use clap::{Parser, Subcommand};
use pfta_protocol::config::{DEFAULT_MAX_PAYMENT_AMOUNT, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};
use std::path::PathBuf;

/// PFTA treasury kernel node.
///
/// Hosts a policy engine, a treasury vault and a payment scheduler over a
/// persistent store, and serves them over HTTP with a WebSocket event
/// stream and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "pfta-node",
    about = "PFTA treasury kernel node",
    version,
    propagate_version = true
)]
pub struct PftaNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node, deploying the kernel on first run.
    Run(RunArgs),
    /// Create the data directory and generate the administrator key.
    Init(InitArgs),
    /// Query the status of a running node via its HTTP endpoint.
    Status(StatusArgs),
    /// Send a request signed with an operator key to a running node.
    Call(CallArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory (database and administrator key).
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "PFTA_DATA_DIR", default_value = "pfta-data")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "PFTA_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "PFTA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Administrator principal for a fresh deployment.
    ///
    /// Requests are authenticated by key, so this must be the principal of
    /// an operator key (as printed by `init`) for anyone to act as admin.
    /// When omitted, the principal is derived from `admin.key` in the data
    /// directory. Ignored if a kernel is already deployed there.
    #[arg(long, env = "PFTA_ADMIN")]
    pub admin: Option<String>,

    /// Initial per-payment limit for a fresh deployment.
    #[arg(long, env = "PFTA_MAX_PAYMENT", default_value_t = DEFAULT_MAX_PAYMENT_AMOUNT)]
    pub max_payment: u64,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "PFTA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "PFTA_DATA_DIR", default_value = "pfta-data")]
    pub data_dir: PathBuf,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// File holding the hex-encoded operator secret key to sign with.
    #[arg(long, short = 'k', env = "PFTA_KEY_FILE", default_value = "pfta-data/admin.key")]
    pub key: PathBuf,

    /// HTTP method, e.g. `POST`.
    pub method: String,

    /// Request path including any query, e.g. `/payments/0/execute`.
    pub path: String,

    /// JSON request body.
    #[arg(long)]
    pub body: Option<String>,

    /// Base URL of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        PftaNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = PftaNodeCli::try_parse_from(["pfta-node", "run", "--admin", "treasurer"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(args.max_payment, DEFAULT_MAX_PAYMENT_AMOUNT);
        assert_eq!(args.admin.as_deref(), Some("treasurer"));
    }

    #[test]
    fn call_takes_method_path_and_body() {
        let cli = PftaNodeCli::try_parse_from([
            "pfta-node",
            "call",
            "--key",
            "ops.key",
            "POST",
            "/vault/deposit",
            "--body",
            r#"{"asset":"mUSD","amount":5}"#,
        ])
        .unwrap();
        let Commands::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.key, PathBuf::from("ops.key"));
        assert_eq!(args.method, "POST");
        assert_eq!(args.path, "/vault/deposit");
        assert!(args.body.unwrap().contains("mUSD"));
    }
}
