use std::time::Duration;

use redis::sentinel::Sentinel;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Delay between two master lookups while waiting for a failover to settle.
const MASTER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves the current writable endpoint of a Sentinel-monitored service.
///
/// Failover itself is handled by Sentinel; this only asks the coordinators
/// which node is master right now.
pub struct SentinelDiscovery {
    sentinel: Sentinel,
    service_name: String,
    lookup_timeout: Duration,
}

impl SentinelDiscovery {
    /// Creates a new `SentinelDiscovery`.
    ///
    /// # Arguments
    ///
    /// * `endpoints` - The Sentinel coordinator URLs (`redis://host:26379`).
    /// * `service_name` - The monitored service, e.g. `mymaster`.
    /// * `lookup_timeout` - The bound applied to every master lookup.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `SentinelDiscovery`.
    pub fn new(endpoints: &[String], service_name: &str, lookup_timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(AppError::Validation(
                "At least one Sentinel endpoint is required".to_string(),
            ));
        }

        let sentinel = Sentinel::build(endpoints.to_vec())?;
        Ok(Self {
            sentinel,
            service_name: service_name.to_string(),
            lookup_timeout,
        })
    }

    /// Returns a client for the node that currently accepts writes.
    pub async fn writable_endpoint(&mut self) -> Result<redis::Client> {
        let limit = self.lookup_timeout;
        self.lookup(limit).await
    }

    async fn lookup(&mut self, limit: Duration) -> Result<redis::Client> {
        let lookup = self.sentinel.async_master_for(&self.service_name, None);
        match tokio::time::timeout(limit, lookup).await {
            Ok(client) => Ok(client?),
            Err(_) => Err(AppError::BackendUnavailable(format!(
                "Sentinel lookup for '{}' timed out after {:?}",
                self.service_name, limit
            ))),
        }
    }

    /// Polls the coordinators until a master is reported or `timeout` elapses.
    pub async fn wait_for_master(&mut self, timeout: Duration) -> Result<redis::Client> {
        let deadline = Instant::now() + timeout;

        loop {
            // A silent coordinator must not stretch the wait past the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lookup(self.lookup_timeout.min(remaining)).await {
                Ok(client) => {
                    tracing::info!("✅ Master available for service '{}'", self.service_name);
                    return Ok(client);
                }
                Err(e) if Instant::now() + MASTER_POLL_INTERVAL < deadline => {
                    tracing::warn!("⏳ Master discovery failed, retrying: {}", e);
                    tokio::time::sleep(MASTER_POLL_INTERVAL).await;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Master not available within {:?} for service '{}'",
                        timeout,
                        self.service_name
                    );
                    return Err(AppError::BackendUnavailable(format!(
                        "No master for service '{}': {}",
                        self.service_name, e
                    )));
                }
            }
        }
    }
}
