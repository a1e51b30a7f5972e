//! Revocation table: one session entry per account, written at login with a
//! TTL equal to the token lifetime.
//!
//! A token is only honored while its account's entry exists. Dropping the
//! entry (logout, operator eviction, cache flush) revokes every outstanding
//! token for that account at once.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::models::SessionSnapshot;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), anyhow::Error>;
    async fn get(&self, account_id: i64) -> Result<Option<SessionSnapshot>, anyhow::Error>;
    async fn evict(&self, account_id: i64) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn session_key(account_id: i64) -> String {
    format!("session:account:{}", account_id)
}

#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own after a dropped connection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(snapshot)?;

        redis::cmd("SET")
            .arg(session_key(snapshot.account_id))
            .arg(payload)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write session: {}", e))
    }

    async fn get(&self, account_id: i64) -> Result<Option<SessionSnapshot>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(session_key(account_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read session: {}", e))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn evict(&self, account_id: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(session_key(account_id))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to evict session: {}", e))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory revocation table honoring TTLs.
#[derive(Default)]
pub struct MockSessionStore {
    entries: Mutex<HashMap<i64, (SessionSnapshot, Instant)>>,
    /// When set, every call fails as if the cache were unreachable.
    pub unavailable: std::sync::atomic::AtomicBool,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_available(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection refused"));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, (SessionSnapshot, Instant)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), anyhow::Error> {
        self.check_available()?;
        self.lock()
            .insert(snapshot.account_id, (snapshot.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, account_id: i64) -> Result<Option<SessionSnapshot>, anyhow::Error> {
        self.check_available()?;
        let mut entries = self.lock();
        match entries.get(&account_id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(&account_id);
                Ok(None)
            }
            Some((snapshot, _)) => Ok(Some(snapshot.clone())),
            None => Ok(None),
        }
    }

    async fn evict(&self, account_id: i64) -> Result<(), anyhow::Error> {
        self.check_available()?;
        self.lock().remove(&account_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::identity::Role;

    fn snapshot(id: i64) -> SessionSnapshot {
        SessionSnapshot {
            account_id: id,
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            role: Role::Operation,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MockSessionStore::new();
        store
            .put(&snapshot(1), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.get(1).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_removes_entry() {
        let store = MockSessionStore::new();
        store.put(&snapshot(1), Duration::from_secs(60)).await.unwrap();
        store.evict(1).await.unwrap();
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[test]
    fn test_session_key_format() {
        assert_eq!(session_key(42), "session:account:42");
    }
}
