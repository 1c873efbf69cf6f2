//! Server configuration from environment variables

use std::env;
use thiserror::Error;
use tracing::Level;

use crate::core::DEFAULT_MAX_CHAIN_DEPTH;
use crate::workflow::issuer::{DEFAULT_KEY_LENGTH, MIN_KEY_LENGTH};

pub const ENV_PORT: &str = "PARTNER_TRUST_PORT";
pub const ENV_LOG_LEVEL: &str = "PARTNER_TRUST_LOG_LEVEL";
pub const ENV_NAME: &str = "PARTNER_TRUST_NAME";
pub const ENV_MAX_CHAIN_DEPTH: &str = "PARTNER_TRUST_MAX_CHAIN_DEPTH";
pub const ENV_APIKEY_LENGTH: &str = "PARTNER_TRUST_APIKEY_LENGTH";

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{var}={value:?} is invalid: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Trust plane configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneConfig {
    pub port: u16,
    pub log_level: Level,
    /// Human-readable name of this instance
    pub name: Option<String>,
    pub max_chain_depth: usize,
    /// Random bytes per generated API key
    pub apikey_length: usize,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: Level::INFO,
            name: None,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            apikey_length: DEFAULT_KEY_LENGTH,
        }
    }
}

impl PlaneConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup(ENV_PORT) {
            Some(value) => value.parse().map_err(|_| ConfigError {
                var: ENV_PORT,
                value: value.clone(),
                reason: "must be a valid port number".into(),
            })?,
            None => defaults.port,
        };

        let log_level = match lookup(ENV_LOG_LEVEL) {
            Some(value) => value.parse().map_err(|_| ConfigError {
                var: ENV_LOG_LEVEL,
                value: value.clone(),
                reason: "must be one of trace, debug, info, warn, error".into(),
            })?,
            None => defaults.log_level,
        };

        let max_chain_depth = match lookup(ENV_MAX_CHAIN_DEPTH) {
            Some(value) => parse_at_least(ENV_MAX_CHAIN_DEPTH, &value, 1)?,
            None => defaults.max_chain_depth,
        };

        let apikey_length = match lookup(ENV_APIKEY_LENGTH) {
            Some(value) => parse_at_least(ENV_APIKEY_LENGTH, &value, MIN_KEY_LENGTH)?,
            None => defaults.apikey_length,
        };

        Ok(Self {
            port,
            log_level,
            name: lookup(ENV_NAME).filter(|name| !name.is_empty()),
            max_chain_depth,
            apikey_length,
        })
    }
}

fn parse_at_least(var: &'static str, value: &str, min: usize) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError {
        var,
        value: value.to_string(),
        reason,
    };
    let parsed: usize = value
        .parse()
        .map_err(|_| invalid("must be a positive integer".into()))?;
    if parsed < min {
        return Err(invalid(format!("must be at least {}", min)));
    }
    Ok(parsed)
}
