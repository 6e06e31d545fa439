use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{RedisResult, Script, aio::ConnectionManager};

use super::kv::{KvBackend, KvOp};
use crate::error::{AppError, Result};

/// Number of keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Sets fields and refreshes the TTL of a hash, but only if it still exists.
///
/// KEYS[1] = hash key, ARGV[1] = ttl seconds, ARGV[2..] = field/value pairs.
const HSET_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
for i = 2, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return 1
"#;

/// A `KvBackend` over a pooled Redis connection.
///
/// Every command is bounded by `timeout`; an elapsed timeout is reported as
/// `AppError::BackendUnavailable`.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    timeout: Duration,
    hset_if_exists: Script,
}

impl RedisBackend {
    /// Opens a connection manager for `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - The Redis client pointing at the writable endpoint.
    /// * `timeout` - The bound applied to connecting and to every command.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `RedisBackend`.
    pub async fn connect(client: redis::Client, timeout: Duration) -> Result<Self> {
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                AppError::BackendUnavailable(format!(
                    "Timed out connecting to Redis after {:?}",
                    timeout
                ))
            })??;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        Ok(Self::from_connection(conn, timeout))
    }

    /// Wraps an already established connection manager.
    pub fn from_connection(conn: ConnectionManager, timeout: Duration) -> Self {
        Self {
            conn,
            timeout,
            hset_if_exists: Script::new(HSET_IF_EXISTS),
        }
    }

    async fn run<T, F>(&self, command: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        bounded(command, self.timeout, fut).await
    }
}

/// Awaits one Redis round trip for at most `timeout`.
async fn bounded<T, F>(command: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("❌ Redis {} failed: {}", command, e);
            Err(AppError::from(e))
        }
        Err(_) => {
            tracing::error!("❌ Redis {} timed out after {:?}", command, timeout);
            Err(AppError::BackendUnavailable(format!(
                "{} timed out after {:?}",
                command, timeout
            )))
        }
    }
}

fn hset_command(key: &str, fields: &[(String, String)]) -> redis::Cmd {
    let mut cmd = redis::cmd("HSET");
    cmd.arg(key);
    for (field, value) in fields {
        cmd.arg(field).arg(value);
    }
    cmd
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let cmd = hset_command(key, fields);
        let mut conn = self.conn.clone();
        let _: () = self
            .run("HSET", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = self
            .run("HGET", async move {
                redis::cmd("HGET").arg(key).arg(field).query_async(&mut conn).await
            })
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = self
            .run("HGETALL", async move {
                redis::cmd("HGETALL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(fields)
    }

    async fn hash_set_if_exists(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<bool> {
        let mut invocation = self.hset_if_exists.key(key);
        invocation.arg(ttl.as_secs());
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let mut conn = self.conn.clone();
        let written: i64 = self
            .run("EVALSHA", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .run("SADD", async move {
                redis::cmd("SADD").arg(key).arg(member).query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .run("SREM", async move {
                redis::cmd("SREM").arg(key).arg(member).query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = self
            .run("SMEMBERS", async move {
                redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(members)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .run("DEL", async move { redis::cmd("DEL").arg(key).query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .run("EXPIRE", async move {
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let seconds: i64 = self
            .run("TTL", async move { redis::cmd("TTL").arg(key).query_async(&mut conn).await })
            .await?;
        // -2: no such key, -1: no expiry
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .run("EXISTS", async move {
                redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut conn = self.conn.clone();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                KvOp::HashSet { key, fields } => {
                    if fields.is_empty() {
                        continue;
                    }
                    pipe.add_command(hset_command(key, fields)).ignore();
                }
                KvOp::SetAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                KvOp::SetRemove { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
                KvOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                KvOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = self
            .run("MULTI/EXEC", async move { pipe.query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}
