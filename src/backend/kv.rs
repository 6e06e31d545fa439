use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Sets the given fields of a hash, creating it if needed.
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Adds a member to a set.
    SetAdd { key: String, member: String },
    /// Removes a member from a set.
    SetRemove { key: String, member: String },
    /// Deletes a key of any type.
    Delete { key: String },
    /// Sets the remaining lifetime of a key. No-op when the key is absent.
    Expire { key: String, ttl: Duration },
}

impl KvOp {
    /// The key this op writes to.
    pub fn key(&self) -> &str {
        match self {
            KvOp::HashSet { key, .. }
            | KvOp::SetAdd { key, .. }
            | KvOp::SetRemove { key, .. }
            | KvOp::Delete { key }
            | KvOp::Expire { key, .. } => key,
        }
    }
}

/// The key-value primitives the session store is built on.
///
/// Every call is independent and bounded; implementations never retry.
/// Single-key operations are serialized by the backend, and `atomic`
/// runs a batch as one isolated transaction.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Sets fields of the hash at `key`.
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Reads one field of the hash at `key`.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Reads every field of the hash at `key`. An absent key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Sets fields and resets the TTL of the hash at `key` only if the key
    /// exists. Returns whether the write happened.
    async fn hash_set_if_exists(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<bool>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Sets the remaining lifetime of `key`. No-op when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining lifetime of `key`; `None` if the key is absent or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Lists every key matching a glob-style `pattern`.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Applies all `ops` as one isolated transaction: no other client sees
    /// the batch half-applied.
    ///
    /// A command that fails at runtime (e.g. WRONGTYPE) is not rolled back
    /// on Redis, where the rest of the `MULTI/EXEC` block still runs. The
    /// store only batches keys whose type it owns.
    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()>;
}
