use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::logging;

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[clap(
    author = "Unspendable Labs",
    version = "0.1.0",
    about = "Renter",
    long_about = r#"Renter keeps erasure-coded files alive across paid storage hosts"#
)]
pub struct Config {
    #[clap(
        long,
        env = "LOG_FORMAT",
        help = "Log format (plain, json)",
        default_value = "plain"
    )]
    pub log_format: logging::Format,

    #[clap(
        long,
        env = "API_PORT",
        help = "Port number for the API server (e.g., 8080)",
        default_value = "9980"
    )]
    pub api_port: u16,

    #[clap(
        long,
        env = "API_TIMEOUT_SECS",
        help = "Timeout for an API request, uploads and downloads included",
        default_value = "300"
    )]
    pub api_timeout_secs: u64,

    #[clap(
        long,
        env = "DATA_DIR",
        help = "Directory path for renter settings, certs, database, etc"
    )]
    pub data_dir: PathBuf,

    #[clap(
        long,
        env = "HOSTS_FILE",
        help = "JSON file listing known hosts to seed the host directory with"
    )]
    pub hosts_file: Option<PathBuf>,

    #[clap(
        long,
        env = "HOST_WINDOW_SIZE",
        help = "Blocks a host has to submit its storage proof after a contract ends",
        default_value = "144"
    )]
    pub host_window_size: u64,

    #[clap(
        long,
        env = "MATURITY_DELAY",
        help = "Blocks before funds of an ended contract are released",
        default_value = "144"
    )]
    pub maturity_delay: u64,

    #[clap(
        long,
        env = "RENEW_FAILURE_THRESHOLD",
        help = "Consecutive failed renewals before a contract is retired and replaced",
        default_value = "3"
    )]
    pub renew_failure_threshold: u32,

    #[clap(
        long,
        env = "SPENDING_RENEW_THRESHOLD",
        help = "Fraction of remaining renter funds below which a contract is renewed early",
        default_value = "0.03"
    )]
    pub spending_renew_threshold: f64,

    #[clap(
        long,
        env = "REMOTE_REPAIR_DOWNLOAD_THRESHOLD",
        help = "Missing piece fraction of a chunk that triggers a repair from remote pieces",
        default_value = "0.25"
    )]
    pub remote_repair_download_threshold: f64,

    #[clap(
        long,
        env = "FUNDING_DIVISOR",
        help = "A contract is funded with allowance funds / hosts / divisor",
        default_value = "3"
    )]
    pub funding_divisor: u64,

    #[clap(
        long,
        env = "PIECE_SIZE",
        help = "Size in bytes of one erasure-coded piece",
        default_value = "4194304"
    )]
    pub piece_size: u64,

    #[clap(
        long,
        env = "SESSION_TIMEOUT_SECS",
        help = "Timeout for a single host request",
        default_value = "30"
    )]
    pub session_timeout_secs: u64,

    #[clap(
        long,
        env = "WALLET_BALANCE",
        help = "Starting balance of the local development wallet",
        default_value = "0"
    )]
    pub wallet_balance: u128,

    #[clap(
        long,
        env = "WALLET_TX_FEE",
        help = "Transaction fee charged by the local development wallet per contract",
        default_value = "0"
    )]
    pub wallet_tx_fee: u128,
}

/// Tunable constants of contract maintenance and repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub host_window_size: u64,
    pub maturity_delay: u64,
    pub renew_failure_threshold: u32,
    pub spending_renew_threshold: f64,
    pub remote_repair_download_threshold: f64,
    pub funding_divisor: u64,
    pub piece_size: u64,
    pub session_timeout_secs: u64,
    pub retry_min_delay_ms: u64,
    pub retry_max_times: usize,
    pub probe_concurrency: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            host_window_size: 144,
            maturity_delay: 144,
            renew_failure_threshold: 3,
            spending_renew_threshold: 0.03,
            remote_repair_download_threshold: 0.25,
            funding_divisor: 3,
            piece_size: 1 << 22,
            session_timeout_secs: 30,
            retry_min_delay_ms: 500,
            retry_max_times: 3,
            probe_concurrency: 10,
        }
    }
}

impl Config {
    pub fn new_na() -> Self {
        let policy = Policy::default();
        Self {
            log_format: logging::Format::Plain,
            api_port: 0,
            api_timeout_secs: 30,
            data_dir: "will be set".into(),
            hosts_file: None,
            host_window_size: policy.host_window_size,
            maturity_delay: policy.maturity_delay,
            renew_failure_threshold: policy.renew_failure_threshold,
            spending_renew_threshold: policy.spending_renew_threshold,
            remote_repair_download_threshold: policy.remote_repair_download_threshold,
            funding_divisor: policy.funding_divisor,
            piece_size: policy.piece_size,
            session_timeout_secs: policy.session_timeout_secs,
            wallet_balance: 0,
            wallet_tx_fee: 0,
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            host_window_size: self.host_window_size,
            maturity_delay: self.maturity_delay,
            renew_failure_threshold: self.renew_failure_threshold,
            spending_renew_threshold: self.spending_renew_threshold,
            remote_repair_download_threshold: self.remote_repair_download_threshold,
            funding_divisor: self.funding_divisor.max(1),
            piece_size: self.piece_size.max(1),
            session_timeout_secs: self.session_timeout_secs,
            ..Policy::default()
        }
    }

    pub fn should_use_tls(&self) -> bool {
        let cert_path = self.data_dir.join("cert.pem");
        let key_path = self.data_dir.join("key.pem");
        cert_path.exists() && key_path.exists()
    }
}
