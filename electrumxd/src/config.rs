//! Configuration loading: environment variables and an optional TOML file,
//! merged the way `zebrad::config::ZebradConfig` is (`serde` + `toml`), but
//! over the option table spec.md §6 names instead of zebrad's network/state
//! sections.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ControllerError;

fn default_host() -> String {
    "0.0.0.0:50001".to_string()
}

fn default_reorg_limit() -> u32 {
    200
}

fn default_max_sessions() -> usize {
    1000
}

fn default_session_timeout() -> u64 {
    600
}

fn default_cost_soft_limit() -> f64 {
    1_000.0
}

fn default_cost_hard_limit() -> f64 {
    10_000.0
}

fn default_bw_unit_cost() -> f64 {
    1_000_000.0 / 5_000.0
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ipv4_prefix() -> u8 {
    24
}

fn default_ipv6_prefix() -> u8 {
    48
}

/// The configuration struct spec.md §6 calls for: every option consumed by
/// the controller, the session fabric's cost limits, and the local RPC
/// socket, loadable from a TOML file with environment-variable overrides
/// (`ELECTRUMX_<FIELD>`, uppercased).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The external daemon's JSON-RPC-over-HTTP URL.
    pub daemon_url: String,
    /// Address the JSON-RPC line-protocol listener binds.
    #[serde(default = "default_host")]
    pub rpc_bind: String,
    /// Path to the local RPC socket the CLI's `rpc`/`compact` entry points
    /// dial (spec.md §6's `add_peer, daemon_url, disconnect, getinfo,
    /// groups, log, peers, query, reorg, sessions, stop` surface).
    pub local_rpc_socket: PathBuf,
    /// Where the history/UTXO databases live.
    pub db_dir: PathBuf,
    /// TLS certificate/key paths; `None` disables TLS.
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,

    #[serde(default = "default_reorg_limit")]
    pub reorg_limit: u32,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
    #[serde(default = "default_cost_soft_limit")]
    pub cost_soft_limit: f64,
    #[serde(default = "default_cost_hard_limit")]
    pub cost_hard_limit: f64,
    #[serde(default = "default_bw_unit_cost")]
    pub bw_unit_cost: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_ipv4_prefix")]
    pub session_group_by_subnet_ipv4: u8,
    #[serde(default = "default_ipv6_prefix")]
    pub session_group_by_subnet_ipv6: u8,
    /// Regex matched against a client's `server.version` name; a match
    /// refuses the handshake.
    pub drop_client: Option<String>,
    /// Redact peer addresses in logs.
    pub anon_logs: bool,

    pub banner: Option<String>,
    pub donation_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            daemon_url: "http://localhost:8332".to_string(),
            rpc_bind: default_host(),
            local_rpc_socket: PathBuf::from("electrumxd.sock"),
            db_dir: PathBuf::from("./db"),
            ssl_cert: None,
            ssl_key: None,
            reorg_limit: default_reorg_limit(),
            max_sessions: default_max_sessions(),
            session_timeout: default_session_timeout(),
            cost_soft_limit: default_cost_soft_limit(),
            cost_hard_limit: default_cost_hard_limit(),
            bw_unit_cost: default_bw_unit_cost(),
            request_timeout: default_request_timeout(),
            session_group_by_subnet_ipv4: default_ipv4_prefix(),
            session_group_by_subnet_ipv6: default_ipv6_prefix(),
            drop_client: None,
            anon_logs: false,
            banner: None,
            donation_address: String::new(),
        }
    }
}

impl Config {
    /// Reads `path` as TOML, then applies `ELECTRUMX_*` environment
    /// overrides on top (env wins, matching the upstream's `.env`-then-CLI
    /// precedence).
    pub fn load(path: Option<&Path>) -> Result<Self, ControllerError> {
        let mut config: Config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)
                    .map_err(|e| ControllerError::Config(format!("{}: {}", p.display(), e)))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ELECTRUMX_DAEMON_URL") {
            self.daemon_url = v;
        }
        if let Ok(v) = std::env::var("ELECTRUMX_RPC_BIND") {
            self.rpc_bind = v;
        }
        if let Ok(v) = std::env::var("ELECTRUMX_DB_DIR") {
            self.db_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ELECTRUMX_REORG_LIMIT") {
            if let Ok(n) = v.parse() {
                self.reorg_limit = n;
            }
        }
        if let Ok(v) = std::env::var("ELECTRUMX_MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("ELECTRUMX_DROP_CLIENT") {
            self.drop_client = Some(v);
        }
        if let Ok(v) = std::env::var("ELECTRUMX_BANNER") {
            self.banner = Some(v);
        }
        if let Ok(v) = std::env::var("ELECTRUMX_DONATION_ADDRESS") {
            self.donation_address = v;
        }
    }

    pub fn rpc_bind_addr(&self) -> Result<SocketAddr, ControllerError> {
        self.rpc_bind
            .parse()
            .map_err(|e| ControllerError::Config(format!("invalid rpc_bind {}: {}", self.rpc_bind, e)))
    }

    /// A dedicated config directory under the OS config home, matching
    /// `dirs::config_dir()`'s use in `electrs`'s CLI for a default
    /// `--conf` search path.
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("electrumxd"))
    }
}
