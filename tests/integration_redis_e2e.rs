use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use sonic_rs::json;

use sessiond::backend::kv::KvBackend;
use sessiond::backend::redis_backend::RedisBackend;
use sessiond::models::session::{session_key, user_sessions_key};
use sessiond::services::sessions::SessionStore;

// Shared Redis client for the end-to-end suite
static REDIS_CLIENT: Lazy<redis::Client> =
    Lazy::new(|| redis::Client::open("redis://127.0.0.1:6380/").unwrap());

const TTL: Duration = Duration::from_secs(3600);

async fn backend() -> RedisBackend {
    let conn = REDIS_CLIENT.get_connection_manager().await.unwrap();
    RedisBackend::from_connection(conn, Duration::from_millis(500))
}

fn unique_user(tag: &str) -> String {
    format!("e2e-{}-{}", tag, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6380"]
    async fn test_session_lifecycle_against_redis() {
        let backend = backend().await;
        let store = SessionStore::new(Arc::new(backend.clone()), TTL);
        let user = unique_user("lifecycle");

        let id = store
            .create_session(&user, Some(json!({"theme": "dark"})))
            .await
            .unwrap();

        let index_ttl = backend.ttl(&user_sessions_key(&user)).await.unwrap().unwrap();
        assert!(index_ttl <= TTL && index_ttl > TTL - Duration::from_secs(5));

        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.user_id, user);
        assert_eq!(session.payload, json!({"theme": "dark"}));
        assert_eq!(session.created_at, session.last_accessed);

        assert!(store.update_session(&id, &json!({"theme": "light"})).await.unwrap());
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.payload, json!({"theme": "light"}));

        assert!(store.count_active_sessions().await.unwrap() >= 1);
        assert_eq!(store.list_user_sessions(&user).await.unwrap(), vec![id]);

        store.destroy_session(&id).await.unwrap();
        store.destroy_session(&id).await.unwrap();
        assert!(store.get_session(&id).await.unwrap().is_none());
        assert!(store.list_user_sessions(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6380"]
    async fn test_update_never_creates_partial_records() {
        let backend = backend().await;
        let store = SessionStore::new(Arc::new(backend.clone()), TTL);
        let missing = uuid::Uuid::new_v4();

        assert!(!store.update_session(&missing, &json!({"x": 1})).await.unwrap());
        assert!(!backend.exists(&session_key(&missing)).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6380"]
    async fn test_reconcile_prunes_stale_index_entries() {
        let backend = backend().await;
        let store = SessionStore::new(Arc::new(backend.clone()), TTL);
        let user = unique_user("reconcile");

        let live = store.create_session(&user, None).await.unwrap();
        let stale = uuid::Uuid::new_v4().to_string();
        backend.set_add(&user_sessions_key(&user), &stale).await.unwrap();

        assert!(store.reconcile().await.unwrap() >= 1);
        assert_eq!(store.list_user_sessions(&user).await.unwrap(), vec![live]);

        store.destroy_user_sessions(&user).await.unwrap();
    }
}
