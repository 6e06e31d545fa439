use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Which key-value backend holds the sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// A Redis server, reached directly or through Sentinel.
    Redis,
    /// The in-process backend; sessions are lost on restart.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown SESSION_BACKEND '{}' (expected redis or memory)", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The backend holding sessions.
    pub backend: BackendKind,
    /// The URL of the Redis server, used when no Sentinel is configured.
    pub redis_url: String,
    /// Sentinel coordinator URLs; when non-empty they take precedence.
    pub sentinels: Vec<String>,
    /// The service name monitored by Sentinel.
    pub sentinel_service: String,
    /// How long startup waits for Sentinel to report a master.
    pub sentinel_wait: Duration,
    /// The sliding lifetime of sessions and user indices.
    pub session_ttl: Duration,
    /// The bound applied to every backend call.
    pub backend_timeout: Duration,
    /// Cadence of the stale-index sweep; `None` disables it.
    pub reconcile_interval: Option<Duration>,
    /// The address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// Whether cookies are marked `Secure`.
    pub production: bool,
    /// Bearer token guarding the session management routes; `None` closes them.
    pub admin_token: Option<String>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let session_ttl_secs: u64 = var("SESSION_TTL_SECONDS", "3600")
            .parse()
            .context("Invalid SESSION_TTL_SECONDS")?;
        if session_ttl_secs == 0 {
            anyhow::bail!("SESSION_TTL_SECONDS must be greater than zero");
        }

        let backend_timeout_ms: u64 = var("BACKEND_TIMEOUT_MS", "500")
            .parse()
            .context("Invalid BACKEND_TIMEOUT_MS")?;
        if backend_timeout_ms == 0 {
            anyhow::bail!("BACKEND_TIMEOUT_MS must be greater than zero");
        }

        let reconcile_secs: u64 = var("RECONCILE_INTERVAL_SECONDS", "3600")
            .parse()
            .context("Invalid RECONCILE_INTERVAL_SECONDS")?;

        let sentinel_wait_secs: u64 = var("SENTINEL_WAIT_SECONDS", "30")
            .parse()
            .context("Invalid SENTINEL_WAIT_SECONDS")?;

        let sentinels = lookup("REDIS_SENTINELS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            backend: var("SESSION_BACKEND", "redis").parse()?,
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            sentinels,
            sentinel_service: var("REDIS_SENTINEL_SERVICE", "mymaster"),
            sentinel_wait: Duration::from_secs(sentinel_wait_secs),
            session_ttl: Duration::from_secs(session_ttl_secs),
            backend_timeout: Duration::from_millis(backend_timeout_ms),
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
            bind_addr: var("BIND_ADDR", "127.0.0.1:3000")
                .parse()
                .context("Invalid BIND_ADDR")?,
            production: var("APP_ENV", "development") == "production",
            admin_token: lookup("ADMIN_TOKEN")
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert!(config.sentinels.is_empty());
        assert_eq!(config.sentinel_service, "mymaster");
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.backend_timeout, Duration::from_millis(500));
        assert_eq!(config.reconcile_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert!(!config.production);
        assert_eq!(config.admin_token, None);
    }

    #[test]
    fn blank_admin_token_counts_as_unset() {
        let config = config_from(&[("ADMIN_TOKEN", "   ")]).unwrap();
        assert_eq!(config.admin_token, None);
        let config = config_from(&[("ADMIN_TOKEN", "s3cret")]).unwrap();
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn sentinel_list_is_split_and_trimmed() {
        let config = config_from(&[(
            "REDIS_SENTINELS",
            "redis://s1:26379, redis://s2:26379,,redis://s3:26379",
        )])
        .unwrap();
        assert_eq!(
            config.sentinels,
            vec!["redis://s1:26379", "redis://s2:26379", "redis://s3:26379"]
        );
    }

    #[test]
    fn zero_reconcile_interval_disables_sweep() {
        let config = config_from(&[("RECONCILE_INTERVAL_SECONDS", "0")]).unwrap();
        assert_eq!(config.reconcile_interval, None);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(config_from(&[("SESSION_TTL_SECONDS", "0")]).is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(config_from(&[("SESSION_BACKEND", "memcached")]).is_err());
        let config = config_from(&[("SESSION_BACKEND", "Memory")]).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
    }
}
