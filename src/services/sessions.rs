use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sonic_rs::Value;
use uuid::Uuid;

use crate::backend::kv::{KvBackend, KvOp};
use crate::error::Result;
use crate::models::session::{
    FIELD_DATA, FIELD_LAST_ACCESSED, FIELD_USER_ID, SESSION_KEY_PREFIX, Session,
    USER_SESSIONS_KEY_PREFIX, encode_payload, format_timestamp, session_key, user_sessions_key,
};

/// Owns session records and the per-user index of live session ids.
///
/// A record lives at `session:<id>` and its id is a member of
/// `user_sessions:<user_id>`. Both keys share the same sliding TTL: create
/// sets it, and every successful read or update resets it on both. The index
/// may briefly hold ids whose record is gone; `reconcile` prunes them.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
}

impl SessionStore {
    /// Creates a new `SessionStore`.
    ///
    /// # Arguments
    ///
    /// * `backend` - The key-value backend holding records and indices.
    /// * `ttl` - The sliding lifetime applied to records and indices.
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// The sliding lifetime applied on every create, read and update.
    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    /// Creates a session for `user_id` and registers it in the user's index.
    ///
    /// The record, its expiry, the index entry and the index expiry are
    /// written in one atomic batch.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new session id.
    pub async fn create_session(&self, user_id: &str, payload: Option<Value>) -> Result<Uuid> {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: now,
            last_accessed: now,
            payload: payload.unwrap_or_else(|| sonic_rs::json!({})),
        };

        let record_key = session_key(&session.session_id);
        let index_key = user_sessions_key(user_id);

        self.backend
            .atomic(vec![
                KvOp::HashSet {
                    key: record_key.clone(),
                    fields: session.to_fields()?,
                },
                KvOp::Expire {
                    key: record_key,
                    ttl: self.ttl,
                },
                KvOp::SetAdd {
                    key: index_key.clone(),
                    member: session.session_id.to_string(),
                },
                KvOp::Expire {
                    key: index_key,
                    ttl: self.ttl,
                },
            ])
            .await?;

        tracing::info!("✅ Session created: {} (user {})", session.session_id, user_id);
        Ok(session.session_id)
    }

    /// Looks up a session and slides its expiry window.
    ///
    /// Absence is a normal outcome: a session that never existed, expired or
    /// was destroyed all yield `Ok(None)`. The returned record carries the
    /// `last_accessed` value from before this read.
    pub async fn get_session(&self, session_id: &Uuid) -> Result<Option<Session>> {
        let key = session_key(session_id);
        let fields = self.backend.hash_get_all(&key).await?;
        if fields.is_empty() {
            tracing::debug!("🔍 Session not found: {}", session_id);
            return Ok(None);
        }

        let session = Session::from_fields(*session_id, &fields)?;

        let touch = [(
            FIELD_LAST_ACCESSED.to_string(),
            format_timestamp(&Utc::now()),
        )];
        if !self.backend.hash_set_if_exists(&key, &touch, self.ttl).await? {
            tracing::debug!("🔍 Session vanished during refresh: {}", session_id);
            return Ok(None);
        }
        self.backend
            .expire(&user_sessions_key(&session.user_id), self.ttl)
            .await?;

        tracing::debug!("🔄 Session refreshed: {}", session_id);
        Ok(Some(session))
    }

    /// Replaces the payload of a live session and slides its expiry window.
    ///
    /// Never creates a record: returns `Ok(false)` when the session is absent.
    pub async fn update_session(&self, session_id: &Uuid, payload: &Value) -> Result<bool> {
        let key = session_key(session_id);
        let data = [(FIELD_DATA.to_string(), encode_payload(payload)?)];

        if !self.backend.hash_set_if_exists(&key, &data, self.ttl).await? {
            tracing::debug!("🔍 Update skipped, session not found: {}", session_id);
            return Ok(false);
        }

        // Keep the index alive at least as long as the record it points to.
        if let Some(user_id) = self.backend.hash_get(&key, FIELD_USER_ID).await? {
            self.backend
                .expire(&user_sessions_key(&user_id), self.ttl)
                .await?;
        }

        tracing::debug!("✏️ Session updated: {}", session_id);
        Ok(true)
    }

    /// Removes a session and its index entry. Idempotent.
    pub async fn destroy_session(&self, session_id: &Uuid) -> Result<()> {
        let key = session_key(session_id);

        match self.backend.hash_get(&key, FIELD_USER_ID).await? {
            Some(user_id) => {
                self.backend
                    .atomic(vec![
                        KvOp::SetRemove {
                            key: user_sessions_key(&user_id),
                            member: session_id.to_string(),
                        },
                        KvOp::Delete { key },
                    ])
                    .await?;
                tracing::info!("✅ Session destroyed: {} (user {})", session_id, user_id);
            }
            None => {
                // Also clears a partial record that lost its owner field.
                self.backend.delete(&key).await?;
                tracing::debug!("🔍 Session already gone: {}", session_id);
            }
        }

        Ok(())
    }

    /// Counts live session records with a full keyspace scan.
    ///
    /// O(n) in the number of sessions; meant for monitoring.
    pub async fn count_active_sessions(&self) -> Result<usize> {
        let keys = self
            .backend
            .scan(&format!("{}*", SESSION_KEY_PREFIX))
            .await?;
        Ok(keys.len())
    }

    /// Lists the ids in a user's index, which may include stale references.
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Uuid>> {
        let members = self
            .backend
            .set_members(&user_sessions_key(user_id))
            .await?;

        let mut ids: Vec<Uuid> = members
            .iter()
            .filter_map(|member| Uuid::parse_str(member).ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Destroys every session listed in a user's index and drops the index.
    ///
    /// # Returns
    ///
    /// A `Result` containing the number of live records removed.
    pub async fn destroy_user_sessions(&self, user_id: &str) -> Result<usize> {
        let index_key = user_sessions_key(user_id);
        let members = self.backend.set_members(&index_key).await?;

        let mut ops = Vec::with_capacity(members.len() + 1);
        let mut destroyed = 0;
        for member in &members {
            let Ok(session_id) = Uuid::parse_str(member) else {
                continue;
            };
            let key = session_key(&session_id);
            if self.backend.exists(&key).await? {
                destroyed += 1;
            }
            ops.push(KvOp::Delete { key });
        }
        ops.push(KvOp::Delete { key: index_key });

        self.backend.atomic(ops).await?;

        tracing::info!("✅ Destroyed {} sessions for user {}", destroyed, user_id);
        Ok(destroyed)
    }

    /// Removes index entries whose session record no longer exists.
    ///
    /// # Returns
    ///
    /// A `Result` containing the number of stale references pruned.
    pub async fn reconcile(&self) -> Result<usize> {
        let index_keys = self
            .backend
            .scan(&format!("{}*", USER_SESSIONS_KEY_PREFIX))
            .await?;

        let mut pruned = 0;
        for index_key in &index_keys {
            for member in self.backend.set_members(index_key).await? {
                let live = match Uuid::parse_str(&member) {
                    Ok(session_id) => self.backend.exists(&session_key(&session_id)).await?,
                    Err(_) => false,
                };
                if !live {
                    self.backend.set_remove(index_key, &member).await?;
                    pruned += 1;
                }
            }
        }

        tracing::info!(
            "🧹 Reconciled {} session indices, pruned {} stale references",
            index_keys.len(),
            pruned
        );
        Ok(pruned)
    }

    /// Remaining lifetime of a session record, if it is live.
    pub async fn session_ttl(&self, session_id: &Uuid) -> Result<Option<Duration>> {
        self.backend.ttl(&session_key(session_id)).await
    }
}
