//! Environment configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8001` |
//! | `GATE_TOKEN_SECRET` | development secret (logged as a warning) |
//! | `TOKEN_TTL_SECS` | `28800` |
//! | `VERIFIER_TIMEOUT_MS` | `500` |
//! | `VERIFIER_CACHE_SIZE` | `10000` (`0` disables the tag cache) |
//! | `POLICY_RULES_PATH` | built-in rule set |
//! | `USERS_PATH` | none |
//! | `LEGACY_PREFIX` | `/legacy` (empty disables the legacy tree) |
//! | `LOG_FORMAT` | `json` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::issuance::DEFAULT_TOKEN_TTL_SECS;
use crate::registry::DEFAULT_LEGACY_PREFIX;
use crate::verifier::{CacheConfig, VerifierConfig, DEFAULT_LOOKUP_TIMEOUT};

/// Secret used when `GATE_TOKEN_SECRET` is unset. Never use in production.
pub const DEVELOPMENT_SECRET: &[u8] = b"development_only_secret_not_for_production";

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable output for local development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("expected json or pretty, got {}", other)),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// HMAC secret for token tags.
    pub token_secret: Vec<u8>,
    /// Whether `token_secret` is the development fallback.
    pub using_development_secret: bool,
    /// Lifetime of issued tokens.
    pub token_ttl: chrono::Duration,
    /// Bound on verifier store lookups.
    pub verifier_timeout: Duration,
    /// Tag cache capacity; `0` disables the cache.
    pub verifier_cache_size: usize,
    /// Rules file; `None` uses the built-in rule set.
    pub rules_path: Option<PathBuf>,
    /// Users seed file (JSON array of users).
    pub users_path: Option<PathBuf>,
    /// Legacy tree mount point; `None` disables the legacy tree.
    pub legacy_prefix: Option<String>,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            token_secret: DEVELOPMENT_SECRET.to_vec(),
            using_development_secret: true,
            token_ttl: chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            verifier_timeout: DEFAULT_LOOKUP_TIMEOUT,
            verifier_cache_size: CacheConfig::default().max_entries,
            rules_path: None,
            users_path: None,
            legacy_prefix: Some(DEFAULT_LEGACY_PREFIX.to_string()),
            log_format: LogFormat::Json,
        }
    }
}

fn parse<T>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value: raw,
    })
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup` (a variable name to value map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", port)?;
        }
        if let Some(secret) = lookup("GATE_TOKEN_SECRET").filter(|s| !s.is_empty()) {
            config.token_secret = secret.into_bytes();
            config.using_development_secret = false;
        }
        if let Some(ttl) = lookup("TOKEN_TTL_SECS") {
            let secs: i64 = parse("TOKEN_TTL_SECS", ttl.clone())?;
            if secs <= 0 {
                return Err(ConfigError::Invalid {
                    var: "TOKEN_TTL_SECS",
                    value: ttl,
                    reason: "must be positive".to_string(),
                });
            }
            config.token_ttl = chrono::Duration::try_seconds(secs)
                .filter(|lifetime| chrono::Utc::now().checked_add_signed(*lifetime).is_some())
                .ok_or_else(|| ConfigError::Invalid {
                    var: "TOKEN_TTL_SECS",
                    value: ttl,
                    reason: "token expiry would be out of range".to_string(),
                })?;
        }
        if let Some(timeout) = lookup("VERIFIER_TIMEOUT_MS") {
            config.verifier_timeout = Duration::from_millis(parse("VERIFIER_TIMEOUT_MS", timeout)?);
        }
        if let Some(size) = lookup("VERIFIER_CACHE_SIZE") {
            config.verifier_cache_size = parse("VERIFIER_CACHE_SIZE", size)?;
        }
        config.rules_path = lookup("POLICY_RULES_PATH").filter(|s| !s.is_empty()).map(PathBuf::from);
        config.users_path = lookup("USERS_PATH").filter(|s| !s.is_empty()).map(PathBuf::from);
        if let Some(prefix) = lookup("LEGACY_PREFIX") {
            let prefix = prefix.trim().trim_end_matches('/').to_string();
            config.legacy_prefix = (!prefix.is_empty()).then_some(prefix);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = parse("LOG_FORMAT", format)?;
        }

        Ok(config)
    }

    /// Verifier settings derived from this config.
    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            lookup_timeout: self.verifier_timeout,
            cache: CacheConfig {
                max_entries: self.verifier_cache_size.max(1),
                enabled: self.verifier_cache_size > 0,
            },
        }
    }

    /// `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
