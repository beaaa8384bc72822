//! Process configuration, read from the environment once at startup.
//! A `.env` file in the working directory is loaded first; variables that
//! are already set take precedence over it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;

/// Fixed listen port.
pub const LISTEN_PORT: u16 = 8080;
/// Upper bound on file upload bodies.
pub const MAX_FILE_SIZE: usize = 50 << 20;

const DEFAULT_MAX_CACHEABLE_BYTES: usize = 8 << 20;
const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 512;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub deepl_api_key: Option<String>,
    pub deepl_base_url: Option<String>,
    pub redis_url: Option<String>,
    pub max_cacheable_bytes: usize,
    pub memory_cache_capacity: NonZeroUsize,
    pub request_timeout: Duration,
    pub cache_timeout: Duration,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// Build from an explicit variable map. Empty values count as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_cacheable_bytes = parse_or(
            get("CACHE_MAX_ENTRY_BYTES"),
            "CACHE_MAX_ENTRY_BYTES",
            DEFAULT_MAX_CACHEABLE_BYTES,
        )?;
        let capacity = parse_or(
            get("MEMORY_CACHE_CAPACITY"),
            "MEMORY_CACHE_CAPACITY",
            DEFAULT_MEMORY_CACHE_CAPACITY,
        )?;
        let memory_cache_capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| ConfigError::Invalid {
                name: "MEMORY_CACHE_CAPACITY",
                value: capacity.to_string(),
                reason: "must be > 0".into(),
            })?;
        let timeout_secs = parse_or(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "REQUEST_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be > 0".into(),
            });
        }

        let cache_timeout_ms =
            parse_or(get("CACHE_TIMEOUT_MS"), "CACHE_TIMEOUT_MS", DEFAULT_CACHE_TIMEOUT_MS)?;
        if cache_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "CACHE_TIMEOUT_MS",
                value: "0".into(),
                reason: "must be > 0".into(),
            });
        }

        Ok(Self {
            deepl_api_key: get("DEEPL_API"),
            deepl_base_url: get("DEEPL_BASE_URL"),
            redis_url: get("REDIS_URL"),
            max_cacheable_bytes,
            memory_cache_capacity,
            request_timeout: Duration::from_secs(timeout_secs),
            cache_timeout: Duration::from_millis(cache_timeout_ms),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT))
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
