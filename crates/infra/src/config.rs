//! Configuration loading and representation.
//!
//! Everything comes from environment variables prefixed `SESSIONGUARD_`,
//! plus the conventional `DATABASE_URL`.

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use sessionguard_auth::codec::MIN_SECRET_LEN;
use sessionguard_auth::{AuthSettings, OrphanedIdentityPolicy};

/// Insecure signing key used when `SESSIONGUARD_JWT_SECRET` is unset.
pub const DEV_JWT_SECRET: &str = "sessionguard-insecure-dev-secret-change-me";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub store_timeout: StdDuration,
    pub orphan_policy: OrphanedIdentityPolicy,
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    /// `None` disables the background idle-session sweep.
    pub purge_interval: Option<StdDuration>,
    /// `(login, password)` pairs registered at startup.
    pub seed_users: Vec<(String, String)>,
}

// Hand-written so secrets never end up in logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("store_timeout", &self.store_timeout)
            .field("orphan_policy", &self.orphan_policy)
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("purge_interval", &self.purge_interval)
            .field("seed_users", &self.seed_users.len())
            .finish_non_exhaustive()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let auth = AuthSettings::default();
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            audience: "sessionguard".to_string(),
            access_ttl: auth.access_ttl,
            refresh_ttl: auth.refresh_ttl,
            store_timeout: StdDuration::from_millis(2000),
            orphan_policy: auth.orphan_policy,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            purge_interval: Some(StdDuration::from_secs(300)),
            seed_users: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset and empty are the same.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        match get("SESSIONGUARD_JWT_SECRET") {
            Some(secret) => {
                if secret.len() < MIN_SECRET_LEN {
                    return Err(ConfigError::invalid(
                        "SESSIONGUARD_JWT_SECRET",
                        "<redacted>",
                        format!("must be at least {MIN_SECRET_LEN} bytes"),
                    ));
                }
                config.jwt_secret = secret;
            }
            None => warn!("SESSIONGUARD_JWT_SECRET not set; using insecure dev default"),
        }

        if let Some(audience) = get("SESSIONGUARD_AUDIENCE") {
            config.audience = audience;
        }
        if let Some(v) = get("SESSIONGUARD_ACCESS_TTL_SECS") {
            config.access_ttl = lifetime("SESSIONGUARD_ACCESS_TTL_SECS", &v)?;
        }
        if let Some(v) = get("SESSIONGUARD_REFRESH_TTL_SECS") {
            config.refresh_ttl = lifetime("SESSIONGUARD_REFRESH_TTL_SECS", &v)?;
        }
        if config.refresh_ttl <= config.access_ttl {
            return Err(ConfigError::invalid(
                "SESSIONGUARD_REFRESH_TTL_SECS",
                &config.refresh_ttl.num_seconds().to_string(),
                "must be longer than the access lifetime",
            ));
        }
        if let Some(v) = get("SESSIONGUARD_STORE_TIMEOUT_MS") {
            config.store_timeout = StdDuration::from_millis(positive("SESSIONGUARD_STORE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("SESSIONGUARD_ORPHANED_IDENTITY") {
            config.orphan_policy = match v.trim().to_ascii_lowercase().as_str() {
                "rotate" => OrphanedIdentityPolicy::Rotate,
                "reject" => OrphanedIdentityPolicy::Reject,
                _ => {
                    return Err(ConfigError::invalid(
                        "SESSIONGUARD_ORPHANED_IDENTITY",
                        &v,
                        "expected `rotate` or `reject`",
                    ));
                }
            };
        }
        if let Some(v) = get("SESSIONGUARD_BIND_ADDR") {
            config.bind_addr = v
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::invalid("SESSIONGUARD_BIND_ADDR", &v, e.to_string()))?;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(v) = get("SESSIONGUARD_PURGE_INTERVAL_SECS") {
            let secs: u64 = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("SESSIONGUARD_PURGE_INTERVAL_SECS", &v, "expected an integer"))?;
            config.purge_interval = (secs > 0).then(|| StdDuration::from_secs(secs));
        }
        if let Some(v) = get("SESSIONGUARD_SEED_USERS") {
            config.seed_users = parse_seed_users(&v)?;
        }

        Ok(config)
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            access_ttl: self.access_ttl,
            refresh_ttl: self.refresh_ttl,
            orphan_policy: self.orphan_policy,
        }
    }
}

fn positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(var, value, "expected a positive integer")),
    }
}

/// Token lifetimes above this are refused; ten years.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn lifetime(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs = positive(var, value)?;
    if secs > MAX_TTL_SECS {
        return Err(ConfigError::invalid(
            var,
            value,
            format!("must be at most {MAX_TTL_SECS} seconds"),
        ));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::invalid(var, value, "out of range"))
}

/// `login:password,login:password`. Passwords may contain `:`.
fn parse_seed_users(value: &str) -> Result<Vec<(String, String)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((login, password)) if !login.is_empty() && !password.is_empty() => {
                Ok((login.to_string(), password.to_string()))
            }
            _ => Err(ConfigError::invalid(
                "SESSIONGUARD_SEED_USERS",
                "<redacted>",
                "expected comma-separated `login:password` entries",
            )),
        })
        .collect()
}
