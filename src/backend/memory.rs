use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::kv::{KvBackend, KvOp};
use crate::error::{AppError, Result};

#[derive(Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Entry>;

/// An in-process backend mirroring the Redis semantics the store relies on.
///
/// Expiry is evaluated lazily against the tokio clock, so tests can drive
/// TTLs with `tokio::time::pause` and `advance`. As in Redis, a key is only
/// checked when a command touches it; `scan` drops what it walks past.
/// A failed `atomic` batch is undone here, which Redis does not do.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<Keyspace>,
}

impl MemoryBackend {
    /// Creates an empty `MemoryBackend`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the keyspace with `key` already purged if it has expired.
    async fn touch(&self, key: &str) -> MutexGuard<'_, Keyspace> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, Instant::now());
        entries
    }
}

fn purge_expired(entries: &mut Keyspace, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

fn hash_mut<'a>(entries: &'a mut Keyspace, key: &str) -> Result<&'a mut HashMap<String, String>> {
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Hash(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(map) => Ok(map),
        Value::Set(_) => Err(wrong_type(key)),
    }
}

fn set_mut<'a>(entries: &'a mut Keyspace, key: &str) -> Result<&'a mut HashSet<String>> {
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Set(HashSet::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Set(set) => Ok(set),
        Value::Hash(_) => Err(wrong_type(key)),
    }
}

fn apply(entries: &mut Keyspace, op: &KvOp) -> Result<()> {
    match op {
        KvOp::HashSet { key, fields } => {
            if fields.is_empty() {
                return Ok(());
            }
            let map = hash_mut(entries, key)?;
            for (field, value) in fields {
                map.insert(field.clone(), value.clone());
            }
        }
        KvOp::SetAdd { key, member } => {
            set_mut(entries, key)?.insert(member.clone());
        }
        KvOp::SetRemove { key, member } => {
            let now_empty = match entries.get_mut(key.as_str()) {
                Some(Entry { value: Value::Set(set), .. }) => {
                    set.remove(member);
                    set.is_empty()
                }
                Some(_) => return Err(wrong_type(key)),
                None => false,
            };
            // Redis drops a set once its last member is removed.
            if now_empty {
                entries.remove(key.as_str());
            }
        }
        KvOp::Delete { key } => {
            entries.remove(key.as_str());
        }
        KvOp::Expire { key, ttl } => {
            if let Some(entry) = entries.get_mut(key.as_str()) {
                entry.expires_at = Some(Instant::now() + *ttl);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut entries = self.touch(key).await;
        apply(
            &mut entries,
            &KvOp::HashSet {
                key: key.to_string(),
                fields: fields.to_vec(),
            },
        )
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let entries = self.touch(key).await;
        match entries.get(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.touch(key).await;
        match entries.get(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_set_if_exists(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.touch(key).await;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        apply(
            &mut entries,
            &KvOp::HashSet {
                key: key.to_string(),
                fields: fields.to_vec(),
            },
        )?;
        apply(
            &mut entries,
            &KvOp::Expire {
                key: key.to_string(),
                ttl,
            },
        )?;
        Ok(true)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.touch(key).await;
        apply(
            &mut entries,
            &KvOp::SetAdd {
                key: key.to_string(),
                member: member.to_string(),
            },
        )
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.touch(key).await;
        apply(
            &mut entries,
            &KvOp::SetRemove {
                key: key.to_string(),
                member: member.to_string(),
            },
        )
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let entries = self.touch(key).await;
        match entries.get(key) {
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.touch(key).await;
        apply(
            &mut entries,
            &KvOp::Expire {
                key: key.to_string(),
                ttl,
            },
        )
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.touch(key).await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.touch(key).await.contains_key(key))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| AppError::Backend(format!("Invalid scan pattern '{}': {}", pattern, e)))?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries
            .keys()
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect())
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        // Prior state of every key the batch touches, restored on failure.
        let mut undo: HashMap<&str, Option<Entry>> = HashMap::new();
        for op in &ops {
            let key = op.key();
            purge_expired(&mut entries, key, now);
            undo.entry(key).or_insert_with(|| entries.get(key).cloned());
        }

        for op in &ops {
            if let Err(e) = apply(&mut entries, op) {
                for (key, previous) in undo {
                    match previous {
                        Some(entry) => {
                            entries.insert(key.to_string(), entry);
                        }
                        None => {
                            entries.remove(key);
                        }
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn keys_disappear_once_ttl_elapses() {
        let backend = MemoryBackend::new();
        backend.hash_set("session:a", &fields(&[("user_id", "1")])).await.unwrap();
        backend.expire("session:a", Duration::from_secs(10)).await.unwrap();

        assert_eq!(backend.ttl("session:a").await.unwrap(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(backend.exists("session:a").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!backend.exists("session:a").await.unwrap());
        assert!(backend.hash_get_all("session:a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hash_writes_keep_existing_ttl() {
        let backend = MemoryBackend::new();
        backend.hash_set("h", &fields(&[("a", "1")])).await.unwrap();
        backend.expire("h", Duration::from_secs(30)).await.unwrap();
        backend.hash_set("h", &fields(&[("b", "2")])).await.unwrap();

        assert!(backend.ttl("h").await.unwrap().is_some());
        assert_eq!(backend.hash_get("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.hash_get("h", "b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn conditional_hash_write_skips_absent_keys() {
        let backend = MemoryBackend::new();
        let written = backend
            .hash_set_if_exists("missing", &fields(&[("data", "{}")]), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!written);
        assert!(!backend.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn removing_last_member_drops_the_set() {
        let backend = MemoryBackend::new();
        backend.set_add("s", "x").await.unwrap();
        backend.set_add("s", "x").await.unwrap();
        assert_eq!(backend.set_members("s").await.unwrap(), vec!["x".to_string()]);

        backend.set_remove("s", "x").await.unwrap();
        assert!(!backend.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_type_access_is_rejected() {
        let backend = MemoryBackend::new();
        backend.set_add("s", "x").await.unwrap();

        let err = backend.hash_get_all("s").await.unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[tokio::test]
    async fn failed_batch_leaves_keyspace_untouched() {
        let backend = MemoryBackend::new();
        backend.set_add("index", "x").await.unwrap();

        let result = backend
            .atomic(vec![
                KvOp::HashSet {
                    key: "record".to_string(),
                    fields: fields(&[("user_id", "1")]),
                },
                KvOp::HashSet {
                    key: "index".to_string(),
                    fields: fields(&[("oops", "1")]),
                },
            ])
            .await;

        assert!(result.is_err());
        assert!(!backend.exists("record").await.unwrap());
    }

    #[tokio::test]
    async fn failed_batch_restores_touched_keys() {
        let backend = MemoryBackend::new();
        backend.set_add("index", "a").await.unwrap();
        backend.expire("index", Duration::from_secs(60)).await.unwrap();
        backend.set_add("other", "x").await.unwrap();

        let result = backend
            .atomic(vec![
                KvOp::SetRemove {
                    key: "index".to_string(),
                    member: "a".to_string(),
                },
                KvOp::Delete {
                    key: "untouched-by-failure".to_string(),
                },
                KvOp::HashSet {
                    key: "other".to_string(),
                    fields: fields(&[("oops", "1")]),
                },
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(backend.set_members("index").await.unwrap(), vec!["a".to_string()]);
        assert!(backend.ttl("index").await.unwrap().is_some());
        assert_eq!(backend.set_members("other").await.unwrap(), vec!["x".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_are_reclaimed_when_touched() {
        let backend = MemoryBackend::new();
        backend.set_add("index", "stale").await.unwrap();
        backend.expire("index", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        // A new batch on the expired key starts from an empty set.
        backend
            .atomic(vec![KvOp::SetAdd {
                key: "index".to_string(),
                member: "fresh".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(backend.set_members("index").await.unwrap(), vec!["fresh".to_string()]);
        assert_eq!(backend.ttl("index").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_skips_expired_keys() {
        let backend = MemoryBackend::new();
        backend.hash_set("session:old", &fields(&[("a", "1")])).await.unwrap();
        backend.expire("session:old", Duration::from_secs(1)).await.unwrap();
        backend.hash_set("session:new", &fields(&[("a", "1")])).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(backend.scan("session:*").await.unwrap(), vec!["session:new".to_string()]);
    }

    #[tokio::test]
    async fn scan_matches_glob_patterns() {
        let backend = MemoryBackend::new();
        backend.hash_set("session:1", &fields(&[("a", "1")])).await.unwrap();
        backend.hash_set("session:2", &fields(&[("a", "1")])).await.unwrap();
        backend.set_add("user_sessions:9", "1").await.unwrap();

        let mut keys = backend.scan("session:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1".to_string(), "session:2".to_string()]);
    }
}
