use std::sync::Arc;

use crate::backend::kv::KvBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::redis_backend::RedisBackend;
use crate::backend::sentinel::SentinelDiscovery;
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::services::sessions::SessionStore;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The session store.
    pub sessions: SessionStore,
    /// The application's configuration.
    pub config: Config,
}

impl AppState {
    /// Creates a new `AppState`, connecting to the configured backend.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let backend: Arc<dyn KvBackend> = match config.backend {
            BackendKind::Memory => {
                tracing::warn!("⚠️ Using in-memory session backend, sessions are lost on restart");
                Arc::new(MemoryBackend::new())
            }
            BackendKind::Redis => {
                let client = if config.sentinels.is_empty() {
                    redis::Client::open(config.redis_url.as_str())?
                } else {
                    tracing::info!(
                        "🔎 Resolving master '{}' through {} sentinels",
                        config.sentinel_service,
                        config.sentinels.len()
                    );
                    let mut discovery = SentinelDiscovery::new(
                        &config.sentinels,
                        &config.sentinel_service,
                        config.backend_timeout,
                    )?;
                    discovery.wait_for_master(config.sentinel_wait).await?
                };
                Arc::new(RedisBackend::connect(client, config.backend_timeout).await?)
            }
        };

        Ok(Self::with_backend(config, backend))
    }

    /// Creates a new `AppState` over an existing backend.
    pub fn with_backend(config: &Config, backend: Arc<dyn KvBackend>) -> Self {
        let sessions = SessionStore::new(backend, config.session_ttl);
        tracing::info!("✅ Session store ready (ttl {:?})", config.session_ttl);

        Self {
            sessions,
            config: config.clone(),
        }
    }
}
