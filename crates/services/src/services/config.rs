//! Runtime configuration read from the environment.

use std::{net::SocketAddr, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid {expected}: {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub collections_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Root directory for per-record folders created after saves.
    pub folder_root: PathBuf,
    /// Overrides `RUST_LOG` when set.
    pub log_filter: Option<String>,
}

impl Config {
    pub const DEFAULT_DATABASE_URL: &'static str = "sqlite://agency.db";
    pub const DEFAULT_COLLECTIONS_PATH: &'static str = "config/collections.json";
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 3001;
    pub const DEFAULT_FOLDER_ROOT: &'static str = "records";

    /// Read `DATABASE_URL`, `COLLECTIONS_PATH`, `HOST`, `PORT`, `FOLDER_ROOT` and
    /// `LOG_FILTER`, falling back to defaults for unset or empty values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                expected: "port number",
                value: raw,
            })?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| Self::DEFAULT_DATABASE_URL.to_string()),
            collections_path: get("COLLECTIONS_PATH")
                .unwrap_or_else(|| Self::DEFAULT_COLLECTIONS_PATH.to_string())
                .into(),
            host: get("HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port,
            folder_root: get("FOLDER_ROOT")
                .unwrap_or_else(|| Self::DEFAULT_FOLDER_ROOT.to_string())
                .into(),
            log_filter: get("LOG_FILTER"),
        })
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let address = format!("{}:{}", self.host, self.port);
        address.parse().map_err(|_| ConfigError::Invalid {
            name: "HOST",
            expected: "socket address",
            value: address,
        })
    }
}
