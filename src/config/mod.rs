//! # Server configuration
//!
//! A [`ServerConfig`] is what a [`crate::server::TcpServer`] is built from.
//! It can be read from the environment (a `.env` file is honoured, like the
//! rest of the crate does) or from a JSON document.

mod registry;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use thiserror::Error;

pub use registry::{ConfigRegistry, Subscription};

/// Worker role running accept loops and endpoint cleanup.
pub const ACCEPT_WORKER: &str = "accept";
/// Worker role running per-connection handlers.
pub const CONNECTION_WORKER: &str = "worker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server config has no listen addresses")]
    NoAddresses,
    #[error("couldn't parse server config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addresses: Vec<String>,
    pub keepalive: bool,
    /// Receive timeout applied to every accepted connection, in milliseconds.
    /// `0` disables it.
    pub timeout_ms: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: String,
    /// Maps a worker role (`"accept"`, `"worker"`) to a scheduler pool name.
    pub workers: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            keepalive: false,
            timeout_ms: 2 * 60 * 1000,
            name: "courier".to_owned(),
            server_type: "ws".to_owned(),
            workers: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        Ok(())
    }

    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(doc)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `COURIER_*` variables, falling back to [`Default`] values.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = ServerConfig::default();

        if let Ok(addresses) = env::var("COURIER_ADDRESSES") {
            config.addresses = addresses
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Ok(keepalive) = env::var("COURIER_KEEPALIVE") {
            config.keepalive = parse_env("COURIER_KEEPALIVE", &keepalive)?;
        }
        if let Ok(timeout) = env::var("COURIER_TIMEOUT_MS") {
            config.timeout_ms = parse_env("COURIER_TIMEOUT_MS", &timeout)?;
        }
        if let Ok(name) = env::var("COURIER_NAME") {
            config.name = name;
        }
        if let Ok(server_type) = env::var("COURIER_TYPE") {
            config.server_type = server_type;
        }
        for role in [ACCEPT_WORKER, CONNECTION_WORKER] {
            let key = format!("COURIER_WORKER_{}", role.to_uppercase());
            if let Ok(pool) = env::var(&key) {
                config.workers.insert(role.to_owned(), pool);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Pool name for a worker role; the role name itself when unassigned.
    pub fn worker<'a>(&'a self, role: &'a str) -> &'a str {
        self.workers.get(role).map(String::as_str).unwrap_or(role)
    }

    /// Registry key under which this server's timeout can be live-reloaded.
    pub fn timeout_key(&self) -> String {
        format!("{}.timeout_ms", self.name)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}
