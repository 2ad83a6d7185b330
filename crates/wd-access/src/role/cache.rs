//! Role Cache
//!
//! Key/value memo of `role uuid -> role key` for default roles. Written in
//! bulk by the cache populator after role listing, read by role update to
//! keep a role's machine key stable across renames.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::role::entity::RoleKey;
use crate::shared::error::{AccessError, Result};

#[async_trait]
pub trait RoleCache: Send + Sync {
    async fn get(&self, role_uuid: &str) -> Result<Option<RoleKey>>;

    async fn set_bulk(&self, entries: HashMap<String, RoleKey>) -> Result<()>;
}

/// Redis-backed role cache.
///
/// Entries live under `{prefix}{role_uuid}` and expire after `ttl`; a zero
/// `ttl` keeps them until the next bulk write.
#[derive(Clone)]
pub struct RedisRoleCache {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl RedisRoleCache {
    pub async fn connect(redis_url: &str, prefix: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AccessError::server("role_cache.connect", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AccessError::server("role_cache.connect", e))?;

        Ok(Self::with_connection(conn, prefix, ttl))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str, ttl: Duration) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
            ttl,
        }
    }

    fn key(&self, role_uuid: &str) -> String {
        format!("{}{}", self.prefix, role_uuid)
    }
}

#[async_trait]
impl RoleCache for RedisRoleCache {
    async fn get(&self, role_uuid: &str) -> Result<Option<RoleKey>> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(role_uuid);

        let value: Option<String> = redis::cmd("GET")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AccessError::server("role_cache.get", e))?;

        match value {
            Some(raw) => match raw.parse::<RoleKey>() {
                Ok(key) => Ok(Some(key)),
                Err(e) => {
                    // Treat an unreadable entry as a miss; the next bulk write replaces it
                    warn!(key = %redis_key, error = %e, "Ignoring unreadable role cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_bulk(&self, entries: HashMap<String, RoleKey>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let ttl_secs = self.ttl.as_secs();
        let mut pipe = redis::pipe();
        for (role_uuid, key) in &entries {
            let cmd = pipe.cmd("SET").arg(self.key(role_uuid)).arg(key.as_str());
            if ttl_secs > 0 {
                cmd.arg("EX").arg(ttl_secs);
            }
            cmd.ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| AccessError::server("role_cache.set_bulk", e))?;

        debug!(count = entries.len(), "Role cache entries written");
        Ok(())
    }
}

/// In-process role cache for tests and single-node runs.
#[derive(Debug, Default)]
pub struct MemoryRoleCache {
    entries: DashMap<String, RoleKey>,
}

impl MemoryRoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&self, role_uuid: impl Into<String>, key: RoleKey) {
        self.entries.insert(role_uuid.into(), key);
    }
}

#[async_trait]
impl RoleCache for MemoryRoleCache {
    async fn get(&self, role_uuid: &str) -> Result<Option<RoleKey>> {
        Ok(self.entries.get(role_uuid).map(|entry| *entry.value()))
    }

    async fn set_bulk(&self, entries: HashMap<String, RoleKey>) -> Result<()> {
        for (role_uuid, key) in entries {
            self.entries.insert(role_uuid, key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_set_bulk_overwrites() {
        let cache = MemoryRoleCache::new();
        cache.insert("a", RoleKey::Staff);

        let mut entries = HashMap::new();
        entries.insert("a".to_string(), RoleKey::User);
        entries.insert("b".to_string(), RoleKey::Sales);
        cache.set_bulk(entries).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").await.unwrap(), Some(RoleKey::User));
        assert_eq!(cache.get("b").await.unwrap(), Some(RoleKey::Sales));
        assert_eq!(cache.get("c").await.unwrap(), None);
    }
}
