//! Server settings read once from `REPAIRDESK_*` environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::fixtures::Fixtures;

pub const DEFAULT_PORT: u16 = 5433;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PASSWORD: &str = "repairdesk";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// PEM certificate chain and private key for the SQL listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub password: String,
    pub max_connections: usize,
    /// `None` when no fixture directory was configured or found.
    pub data_dir: Option<PathBuf>,
    /// `None` keeps every change in memory only.
    pub wal_path: Option<PathBuf>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
    /// `None` seeds the simulation RNG from entropy.
    pub seed: Option<u64>,
    pub mcp_stdio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    PartialTls,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::PartialTls => write!(
                f,
                "both REPAIRDESK_TLS_CERT and REPAIRDESK_TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Option<T> {
    let raw = vars.get(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {name}={raw:?}");
            None
        }
    }
}

fn flag(vars: &HashMap<String, String>, name: &str) -> bool {
    vars.get(name)
        .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build from an explicit variable map. Unparseable numbers fall back to
    /// their defaults.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let path = |name: &str| vars.get(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        let tls = match (path("REPAIRDESK_TLS_CERT"), path("REPAIRDESK_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialTls),
        };

        Ok(Self {
            port: parsed(&vars, "REPAIRDESK_PORT").unwrap_or(DEFAULT_PORT),
            bind: vars
                .get("REPAIRDESK_BIND")
                .cloned()
                .unwrap_or_else(|| DEFAULT_BIND.into()),
            password: vars
                .get("REPAIRDESK_PASSWORD")
                .cloned()
                .unwrap_or_else(|| DEFAULT_PASSWORD.into()),
            max_connections: parsed(&vars, "REPAIRDESK_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            data_dir: Fixtures::discover(path("REPAIRDESK_DATA_DIR").as_deref()),
            wal_path: path("REPAIRDESK_WAL_PATH"),
            compact_threshold: parsed(&vars, "REPAIRDESK_COMPACT_THRESHOLD")
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            metrics_port: parsed(&vars, "REPAIRDESK_METRICS_PORT"),
            tls,
            seed: parsed(&vars, "REPAIRDESK_SEED"),
            mcp_stdio: flag(&vars, "REPAIRDESK_MCP_STDIO"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
