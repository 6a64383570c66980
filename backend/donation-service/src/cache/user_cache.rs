//! Durable store of previously observed user data.
//!
//! The Postgres implementation relies on the database's native upsert for
//! per-key atomicity; the in-memory implementation guards the whole map
//! with a read/write lock and exists for tests and offline development.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::CachedUser;

#[async_trait]
pub trait UserCacheStore: Send + Sync {
    /// Look up the cached record for one user. `None` means never observed.
    async fn get(&self, user_id: i64) -> Result<Option<CachedUser>>;

    /// Idempotent upsert keyed by `user_id`.
    async fn set(&self, record: &CachedUser) -> Result<()>;

    /// Explicit eviction; the only way a record ever disappears.
    async fn delete(&self, user_id: i64) -> Result<()>;

    /// Fetch any subset of the requested ids. Missing ids are simply
    /// absent from the result, never an error.
    async fn get_batch(&self, user_ids: &[i64]) -> Result<Vec<CachedUser>>;
}

pub struct PgUserCacheStore {
    pool: PgPool,
}

impl PgUserCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserCacheStore for PgUserCacheStore {
    async fn get(&self, user_id: i64) -> Result<Option<CachedUser>> {
        let record = sqlx::query_as::<_, CachedUser>(
            r#"
            SELECT user_id, username, full_name, is_streamer, profile_pic,
                   is_active, last_sync_at, expires_at
            FROM user_cache
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn set(&self, record: &CachedUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_cache
                (user_id, username, full_name, is_streamer, profile_pic,
                 is_active, last_sync_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                full_name = EXCLUDED.full_name,
                is_streamer = EXCLUDED.is_streamer,
                profile_pic = EXCLUDED.profile_pic,
                is_active = EXCLUDED.is_active,
                last_sync_at = EXCLUDED.last_sync_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(record.user_id)
        .bind(&record.username)
        .bind(&record.full_name)
        .bind(record.is_streamer)
        .bind(&record.profile_pic)
        .bind(record.is_active)
        .bind(record.last_sync_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_cache WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_batch(&self, user_ids: &[i64]) -> Result<Vec<CachedUser>> {
        let records = sqlx::query_as::<_, CachedUser>(
            r#"
            SELECT user_id, username, full_name, is_streamer, profile_pic,
                   is_active, last_sync_at, expires_at
            FROM user_cache
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// Map-backed store; the read/write lock makes `get`/`set`/`delete`
/// atomic with respect to each other.
#[derive(Default)]
pub struct MemoryUserCacheStore {
    records: RwLock<HashMap<i64, CachedUser>>,
}

impl MemoryUserCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserCacheStore for MemoryUserCacheStore {
    async fn get(&self, user_id: i64) -> Result<Option<CachedUser>> {
        Ok(self.records.read().await.get(&user_id).cloned())
    }

    async fn set(&self, record: &CachedUser) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.user_id, record.clone());
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> Result<()> {
        self.records.write().await.remove(&user_id);
        Ok(())
    }

    async fn get_batch(&self, user_ids: &[i64]) -> Result<Vec<CachedUser>> {
        let records = self.records.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use chrono::{Duration, Utc};

    fn record(user_id: i64) -> CachedUser {
        let user = User {
            id: user_id,
            username: format!("user{}", user_id),
            full_name: String::new(),
            is_streamer: false,
            profile_pic: String::new(),
            is_active: true,
        };
        CachedUser::from_user(&user, Utc::now(), Duration::hours(24))
    }

    #[tokio::test]
    async fn set_is_an_upsert_keyed_by_user_id() {
        let store = MemoryUserCacheStore::new();
        let mut rec = record(1);
        store.set(&rec).await.unwrap();

        rec.username = "renamed".into();
        store.set(&rec).await.unwrap();

        let stored = store.get(1).await.unwrap().unwrap();
        assert_eq!(stored.username, "renamed");
        assert_eq!(store.get_batch(&[1]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_batch_silently_skips_missing_ids() {
        let store = MemoryUserCacheStore::new();
        store.set(&record(1)).await.unwrap();
        store.set(&record(3)).await.unwrap();

        let batch = store.get_batch(&[1, 2, 3]).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn delete_evicts_the_record() {
        let store = MemoryUserCacheStore::new();
        store.set(&record(1)).await.unwrap();
        store.delete(1).await.unwrap();
        assert!(store.get(1).await.unwrap().is_none());
    }
}
