//! Configuration types.
//!
//! Everything is read once from the environment at process start. Tests build
//! configs directly instead of mutating the environment.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::routing::OperatorMode;
use crate::security::api_key::SCANNER_API_KEY_ENV;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Real mail server endpoint (`None` means mail always routes to the mock).
    pub mailserver_url: Option<String>,
    /// Real AI scanner endpoint (`None` means scans always route to the mock).
    pub scanner_url: Option<String>,
    /// API key sent to the real scanner as `X-API-KEY`.
    pub scanner_api_key: Option<SecretString>,
    /// Key callers must present on the scanner ingress (`None` rejects all).
    pub ingress_api_key: Option<SecretString>,
    /// Operator override for routing.
    pub mode: OperatorMode,
    pub health: HealthConfig,
    pub rate_limit: RateLimitConfig,
    /// Maximum `first`/`limit` a caller may request.
    pub query_limit: usize,
    /// Timeout for real-path adapter calls.
    pub adapter_timeout: Duration,
    /// Static bearer tokens, `token:username:role` entries.
    pub tokens: Vec<TokenEntry>,
}

/// Health probe tuning.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Probe results are trusted for this long.
    pub check_interval: Duration,
    /// Timeout for each of the HEAD and GET liveness calls.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// One configured bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    pub username: String,
    pub role: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            mailserver_url: None,
            scanner_url: None,
            scanner_api_key: None,
            ingress_api_key: None,
            mode: OperatorMode::Auto,
            health: HealthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            query_limit: 50,
            adapter_timeout: Duration::from_secs(3),
            tokens: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mode = match std::env::var("USE_REAL_SERVICES") {
            Ok(raw) => raw.parse::<OperatorMode>().map_err(|message| {
                ConfigError::InvalidValue {
                    key: "USE_REAL_SERVICES".into(),
                    message,
                }
            })?,
            Err(_) => OperatorMode::Auto,
        };

        let ingress_api_key = std::env::var(SCANNER_API_KEY_ENV).ok().map(SecretString::from);
        let scanner_api_key = std::env::var("REAL_AISCANNER_API_KEY")
            .ok()
            .map(SecretString::from)
            .or_else(|| ingress_api_key.clone());

        let tokens = match std::env::var("GATEWAY_TOKENS") {
            Ok(raw) => parse_tokens(&raw)?,
            Err(_) => Vec::new(),
        };

        let config = Self {
            port: env_parse("GATEWAY_PORT", defaults.port)?,
            mailserver_url: env_url("REAL_MAILSERVER_URL"),
            scanner_url: env_url("REAL_AISCANNER_URL"),
            scanner_api_key,
            ingress_api_key,
            mode,
            health: HealthConfig {
                check_interval: Duration::from_secs(env_parse(
                    "GATEWAY_HEALTH_INTERVAL_SECS",
                    defaults.health.check_interval.as_secs(),
                )?),
                ..defaults.health
            },
            rate_limit: RateLimitConfig {
                max_requests: env_parse("GATEWAY_RATE_LIMIT_MAX", defaults.rate_limit.max_requests)?,
                window: Duration::from_secs(env_parse(
                    "GATEWAY_RATE_LIMIT_WINDOW_SECS",
                    defaults.rate_limit.window.as_secs(),
                )?),
            },
            query_limit: env_parse("GATEWAY_QUERY_LIMIT", defaults.query_limit)?,
            adapter_timeout: defaults.adapter_timeout,
            tokens,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would disable a limit or stall a timer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |key: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        };
        if self.rate_limit.window.is_zero() {
            return Err(zero("GATEWAY_RATE_LIMIT_WINDOW_SECS"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(zero("GATEWAY_RATE_LIMIT_MAX"));
        }
        if self.health.check_interval.is_zero() {
            return Err(zero("GATEWAY_HEALTH_INTERVAL_SECS"));
        }
        if self.query_limit == 0 {
            return Err(zero("GATEWAY_QUERY_LIMIT"));
        }
        Ok(())
    }
}

fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse `token:username:role` entries separated by commas.
pub fn parse_tokens(raw: &str) -> Result<Vec<TokenEntry>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(token), Some(username), Some(role))
                    if !token.is_empty() && !username.is_empty() =>
                {
                    Ok(TokenEntry {
                        token: token.to_string(),
                        username: username.to_string(),
                        role: role.to_string(),
                    })
                }
                _ => Err(ConfigError::InvalidValue {
                    key: "GATEWAY_TOKENS".into(),
                    message: "expected token:username:role".into(),
                }),
            }
        })
        .collect()
}
