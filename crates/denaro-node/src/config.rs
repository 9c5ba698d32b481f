//! Environment configuration.
//!
//! All recognised keys come from the process environment; anything unset
//! falls back to a default fit for a private single-node deployment.

use denaro_storage::PostgresConfig;
use std::fmt;
use std::path::PathBuf;

/// Where the node finds its first peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Start alone; peers find us.
    SelfOnly,
    /// Ask a known node.
    Url(String),
    /// Probe previously persisted peers only.
    Discover,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    pub date_format: Option<String>,
    pub console_highlighting: bool,
    pub include_request_content: bool,
    pub include_response_content: bool,
    pub include_block_sync_messages: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub self_url: Option<String>,
    pub bootstrap: BootstrapMode,
    pub database: PostgresConfig,
    pub log: LogConfig,
    pub data_dir: PathBuf,
}

#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error in {}: {}", self.key, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn env(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &'static str, default: bool) -> bool {
    match env(key).as_deref() {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") => false,
        _ => default,
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<NodeConfig, ConfigError> {
        let host = env("DENARO_NODE_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match env("DENARO_NODE_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError {
                key: "DENARO_NODE_PORT",
                message: format!("not a port number: {raw}"),
            })?,
            None => 3006,
        };
        let self_url = env("DENARO_SELF_URL").map(|u| u.trim_end_matches('/').to_string());
        let bootstrap = match env("DENARO_BOOTSTRAP_NODE").as_deref() {
            None | Some("self") => BootstrapMode::SelfOnly,
            Some("discover") => BootstrapMode::Discover,
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                BootstrapMode::Url(url.trim_end_matches('/').to_string())
            }
            Some(other) => {
                return Err(ConfigError {
                    key: "DENARO_BOOTSTRAP_NODE",
                    message: format!("expected a URL, `self` or `discover`, got {other}"),
                })
            }
        };
        let database = PostgresConfig {
            host: env("DENARO_DATABASE_HOST").unwrap_or_else(|| "localhost".to_string()),
            database: env("DENARO_DATABASE_NAME").unwrap_or_else(|| "denaro".to_string()),
            user: env("POSTGRES_USER").unwrap_or_else(|| "denaro".to_string()),
            password: env("POSTGRES_PASSWORD").unwrap_or_else(|| "denaro".to_string()),
        };
        let log = LogConfig {
            level: env("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: env("LOG_FORMAT").unwrap_or_else(|| "plain".to_string()),
            date_format: env("LOG_DATE_FORMAT"),
            console_highlighting: env_bool("LOG_CONSOLE_HIGHLIGHTING", true),
            include_request_content: env_bool("LOG_INCLUDE_REQUEST_CONTENT", false),
            include_response_content: env_bool("LOG_INCLUDE_RESPONSE_CONTENT", false),
            include_block_sync_messages: env_bool("LOG_INCLUDE_BLOCK_SYNC_MESSAGES", true),
        };
        Ok(NodeConfig {
            host,
            port,
            self_url,
            bootstrap,
            database,
            log,
            data_dir: PathBuf::from("data"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("node_key.hex")
    }

    pub fn peers_path(&self) -> PathBuf {
        self.data_dir.join("peers.json")
    }

    /// The URL peers should be given for the bootstrap handshake.
    pub fn bootstrap_url(&self) -> Option<String> {
        match &self.bootstrap {
            BootstrapMode::Url(url) => Some(url.clone()),
            BootstrapMode::SelfOnly | BootstrapMode::Discover => None,
        }
    }

    pub fn api_docs_url(&self) -> Option<String> {
        self.self_url.as_ref().map(|base| format!("{base}/docs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to defaults-only so
    // they stay order-independent.
    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_env().unwrap();
        assert_eq!(config.port, 3006);
        assert_eq!(config.bootstrap, BootstrapMode::SelfOnly);
        assert_eq!(config.database.database, "denaro");
        assert_eq!(config.log.level, "info");
        assert!(config.identity_path().ends_with("node_key.hex"));
    }
}
