//! Server configuration, read once from the environment at start-up.

use std::net::SocketAddr;

use gatekeeper_infra::factory::DEFAULT_SQL_MAX_CONNECTIONS;
use gatekeeper_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: '{value}' is not a valid socket address")]
    BindAddr { var: &'static str, value: String },

    #[error("{var}: '{value}' is not a positive integer")]
    MaxConnections { var: &'static str, value: String },

    #[error("{var}: {source}")]
    LogFormat {
        var: &'static str,
        source: gatekeeper_observability::UnknownLogFormat,
    },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// When set, every RPC route requires `Authorization: Bearer <token>`.
    pub api_token: Option<String>,
    pub sql_max_connections: u32,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_token: None,
            sql_max_connections: DEFAULT_SQL_MAX_CONNECTIONS,
            log_format: LogFormat::Json,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source (unset and empty mean default).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let bind_addr = match get("GATEKEEPER_BIND_ADDR") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::BindAddr {
                var: "GATEKEEPER_BIND_ADDR",
                value,
            })?,
            None => defaults.bind_addr,
        };

        let sql_max_connections = match get("GATEKEEPER_SQL_MAX_CONNECTIONS") {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::MaxConnections {
                        var: "GATEKEEPER_SQL_MAX_CONNECTIONS",
                        value,
                    });
                }
            },
            None => defaults.sql_max_connections,
        };

        let log_format = match get("GATEKEEPER_LOG_FORMAT") {
            Some(value) => value.parse().map_err(|source| ConfigError::LogFormat {
                var: "GATEKEEPER_LOG_FORMAT",
                source,
            })?,
            None => defaults.log_format,
        };

        Ok(Self {
            bind_addr,
            api_token: get("GATEKEEPER_API_TOKEN"),
            sql_max_connections,
            log_format,
        })
    }
}
