//! Cross-service user resolution: cache first, remote on miss, stale
//! cache as a last resort.
//!
//! The stale-on-failure rule trades freshness for availability: donation
//! creation must keep working through a brief user-service outage as long
//! as the identity has been observed before.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::UserCacheStore;
use crate::clients::UserServiceClient;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{CachedUser, User};

/// How long a synced record stays fresh.
pub const DEFAULT_USER_CACHE_TTL_HOURS: i64 = 24;

pub struct UserAggregator {
    cache: Arc<dyn UserCacheStore>,
    client: Arc<dyn UserServiceClient>,
    ttl: Duration,
    /// One slot per user id currently being resolved remotely; concurrent
    /// cache misses for the same key share a single outstanding fetch.
    in_flight: DashMap<i64, Arc<Mutex<()>>>,
}

impl UserAggregator {
    pub fn new(
        cache: Arc<dyn UserCacheStore>,
        client: Arc<dyn UserServiceClient>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            client,
            ttl,
            in_flight: DashMap::new(),
        }
    }

    /// Resolve one user.
    ///
    /// A fresh cache hit is served without any remote call. On miss or
    /// expiry the remote service is consulted and the cache refreshed; if
    /// the remote call fails and any cached record exists (however stale),
    /// that record is returned instead of an error. Only an identity with
    /// no cache and no reachable remote fails, with
    /// [`AppError::UserUnavailable`].
    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        if let Some(record) = self.lookup_cache(user_id).await {
            if !record.is_expired(Utc::now()) {
                debug!(user_id, "user cache hit");
                metrics::record_user_cache_lookup("hit");
                return Ok(record.into_user());
            }
        }
        metrics::record_user_cache_lookup("miss");

        let slot = self
            .in_flight
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let resolved = {
            let _guard = slot.lock().await;

            // Re-check under the key lock: if another caller held the slot
            // first, its refresh already landed in the cache.
            let latest = self.lookup_cache(user_id).await;
            match latest {
                Some(record) if !record.is_expired(Utc::now()) => Ok(record.into_user()),
                latest => self.resolve_remote(user_id, latest).await,
            }
        };

        // Drop the slot once no other caller is queued on it (one ref in
        // the map plus our clone).
        self.in_flight
            .remove_if(&user_id, |_, slot| Arc::strong_count(slot) <= 2);

        resolved
    }

    /// Resolve a user and enforce role requirements.
    pub async fn validate_user(&self, user_id: i64, must_be_streamer: bool) -> Result<User> {
        let user = self.get_user(user_id).await?;
        if must_be_streamer && !user.is_streamer {
            return Err(AppError::RoleMismatch(user_id));
        }
        Ok(user)
    }

    /// Batch resolution preserving the input order.
    ///
    /// Ids with a fresh cache hit are served locally; the rest are
    /// remote-resolved best-effort and upserted. An id that fails both
    /// cache and remote is omitted from the result, so callers must not
    /// assume `result.len() == user_ids.len()`. This silent-omission
    /// contract is deliberate, surprising as it looks; expired records do
    /// not fall back to stale data on this path.
    pub async fn get_users(&self, user_ids: &[i64]) -> Result<Vec<User>> {
        let now = Utc::now();
        let cached = match self.cache.get_batch(user_ids).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "user cache batch lookup failed, treating all ids as misses");
                Vec::new()
            }
        };

        let mut resolved: std::collections::HashMap<i64, User> = std::collections::HashMap::new();
        let mut missing: Vec<i64> = Vec::new();

        for record in cached {
            if record.is_expired(now) {
                missing.push(record.user_id);
            } else {
                resolved.insert(record.user_id, record.into_user());
            }
        }
        for user_id in user_ids {
            if !resolved.contains_key(user_id) && !missing.contains(user_id) {
                missing.push(*user_id);
            }
        }

        if !missing.is_empty() {
            for user in self.client.get_users(&missing).await {
                self.sync_user(&user).await;
                resolved.insert(user.id, user);
            }
        }

        Ok(user_ids
            .iter()
            .filter_map(|user_id| resolved.get(user_id).cloned())
            .collect())
    }

    /// Force a remote fetch and cache refresh, bypassing freshness checks.
    pub async fn refresh_user(&self, user_id: i64) -> Result<User> {
        match self.client.get_user(user_id).await {
            Ok(user) => {
                self.sync_user(&user).await;
                Ok(user)
            }
            Err(err) => {
                warn!(user_id, error = %err, "forced user refresh failed");
                Err(AppError::UserUnavailable(user_id))
            }
        }
    }

    /// Explicitly evict a cached record.
    pub async fn evict(&self, user_id: i64) -> Result<()> {
        self.cache.delete(user_id).await
    }

    async fn resolve_remote(&self, user_id: i64, stale: Option<CachedUser>) -> Result<User> {
        match self.client.get_user(user_id).await {
            Ok(user) => {
                self.sync_user(&user).await;
                Ok(user)
            }
            Err(err) => match stale {
                Some(record) => {
                    warn!(
                        user_id,
                        error = %err,
                        "user service unreachable, serving stale cache record"
                    );
                    metrics::record_user_cache_lookup("stale_fallback");
                    Ok(record.into_user())
                }
                None => {
                    warn!(user_id, error = %err, "user unresolvable: no cache and no remote");
                    Err(AppError::UserUnavailable(user_id))
                }
            },
        }
    }

    /// Upsert a freshly fetched user. A cache-write failure is logged but
    /// never surfaced: the caller already holds the fresh data.
    async fn sync_user(&self, user: &User) {
        let record = CachedUser::from_user(user, Utc::now(), self.ttl);
        if let Err(err) = self.cache.set(&record).await {
            warn!(user_id = user.id, error = %err, "failed to update user cache");
        }
    }

    async fn lookup_cache(&self, user_id: i64) -> Option<CachedUser> {
        match self.cache.get(user_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(user_id, error = %err, "user cache lookup failed, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryUserCacheStore;
    use crate::clients::UserClientError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct MockUserClient {
        users: HashMap<i64, User>,
        available: AtomicBool,
        calls: AtomicUsize,
        delay: Option<StdDuration>,
    }

    impl MockUserClient {
        fn new(users: Vec<User>) -> Self {
            Self {
                users: users.into_iter().map(|u| (u.id, u)).collect(),
                available: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: StdDuration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserServiceClient for MockUserClient {
        async fn get_user(&self, user_id: i64) -> std::result::Result<User, UserClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if !self.available.load(Ordering::SeqCst) {
                return Err(UserClientError::Unavailable("connection refused".into()));
            }
            self.users
                .get(&user_id)
                .cloned()
                .ok_or(UserClientError::NotFound(user_id))
        }

        async fn get_users(&self, user_ids: &[i64]) -> Vec<User> {
            let mut found = Vec::new();
            for user_id in user_ids {
                if let Ok(user) = self.get_user(*user_id).await {
                    found.push(user);
                }
            }
            found
        }
    }

    fn user(id: i64, username: &str, is_streamer: bool) -> User {
        User {
            id,
            username: username.into(),
            full_name: String::new(),
            is_streamer,
            profile_pic: String::new(),
            is_active: true,
        }
    }

    fn aggregator(
        client: MockUserClient,
    ) -> (Arc<UserAggregator>, Arc<MemoryUserCacheStore>, Arc<MockUserClient>) {
        let cache = Arc::new(MemoryUserCacheStore::new());
        let client = Arc::new(client);
        let aggregator = Arc::new(UserAggregator::new(
            cache.clone(),
            client.clone(),
            Duration::hours(24),
        ));
        (aggregator, cache, client)
    }

    /// Seed the cache with a record whose freshness window is offset from
    /// now, without touching the aggregator.
    async fn seed(
        cache: &MemoryUserCacheStore,
        user: &User,
        synced_minutes_ago: i64,
        expires_in_minutes: i64,
    ) {
        let now = Utc::now();
        let record = CachedUser {
            last_sync_at: now - Duration::minutes(synced_minutes_ago),
            expires_at: now + Duration::minutes(expires_in_minutes),
            ..CachedUser::from_user(user, now, Duration::zero())
        };
        cache.set(&record).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_cache_hit_never_calls_remote() {
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![]));
        seed(&cache, &user(42, "alice", true), 30, 30).await;

        let resolved = aggregator.get_user(42).await.unwrap();
        assert_eq!(resolved.username, "alice");
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_from_remote() {
        let remote = user(42, "alice_v2", true);
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![remote]));
        seed(&cache, &user(42, "alice_v1", true), 90, -30).await;

        let resolved = aggregator.get_user(42).await.unwrap();
        assert_eq!(resolved.username, "alice_v2");
        assert_eq!(client.call_count(), 1);

        // The refreshed record carries a new freshness window.
        let record = cache.get(42).await.unwrap().unwrap();
        assert_eq!(record.username, "alice_v2");
        assert!(!record.is_expired(Utc::now()));
        assert_eq!(record.expires_at, record.last_sync_at + Duration::hours(24));
    }

    #[tokio::test]
    async fn expired_record_with_unreachable_remote_serves_stale() {
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![]));
        client.set_available(false);
        seed(&cache, &user(42, "alice", true), 90, -30).await;

        let resolved = aggregator.get_user(42).await.unwrap();
        assert_eq!(resolved.username, "alice");
    }

    #[tokio::test]
    async fn unknown_user_with_unreachable_remote_is_unavailable() {
        let (aggregator, _cache, client) = aggregator(MockUserClient::new(vec![]));
        client.set_available(false);

        let err = aggregator.get_user(42).await.unwrap_err();
        assert!(matches!(err, AppError::UserUnavailable(42)));
    }

    #[tokio::test]
    async fn remote_not_found_without_cache_is_unavailable() {
        let (aggregator, _cache, _client) = aggregator(MockUserClient::new(vec![]));

        let err = aggregator.get_user(7).await.unwrap_err();
        assert!(matches!(err, AppError::UserUnavailable(7)));
    }

    #[tokio::test]
    async fn validate_user_rejects_role_mismatch() {
        let (aggregator, _cache, _client) =
            aggregator(MockUserClient::new(vec![user(1, "viewer", false)]));

        let err = aggregator.validate_user(1, true).await.unwrap_err();
        assert!(matches!(err, AppError::RoleMismatch(1)));

        // Without the role requirement the same user passes.
        assert!(aggregator.validate_user(1, false).await.is_ok());
    }

    #[tokio::test]
    async fn validate_user_accepts_streamer() {
        let (aggregator, _cache, _client) =
            aggregator(MockUserClient::new(vec![user(1, "streamer", true)]));
        assert!(aggregator.validate_user(1, true).await.is_ok());
    }

    #[tokio::test]
    async fn batch_omits_unresolvable_ids_preserving_order() {
        // `a` has a fresh cache record, `c` resolves remotely, `b` exists
        // nowhere: the result is [a, c], not [a, nil, c].
        let (aggregator, cache, _client) =
            aggregator(MockUserClient::new(vec![user(3, "c", false)]));
        seed(&cache, &user(1, "a", false), 0, 60).await;

        let users = aggregator.get_users(&[1, 2, 3]).await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn batch_refreshes_expired_entries() {
        let (aggregator, cache, _client) =
            aggregator(MockUserClient::new(vec![user(1, "fresh", false)]));
        seed(&cache, &user(1, "stale", false), 90, -30).await;

        let users = aggregator.get_users(&[1]).await.unwrap();
        assert_eq!(users[0].username, "fresh");
        let record = cache.get(1).await.unwrap().unwrap();
        assert_eq!(record.username, "fresh");
        assert!(!record.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn batch_does_not_serve_stale_records() {
        // Unlike single resolution, the batch path drops ids whose record
        // is expired when the remote cannot serve them.
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![]));
        client.set_available(false);
        seed(&cache, &user(1, "stale", false), 90, -30).await;

        let users = aggregator.get_users(&[1]).await.unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn stale_window_walkthrough() {
        // TTL scenario: a fresh record is served locally; once expired it
        // is refreshed remotely; when the remote then goes down, the
        // just-refreshed (now stale again by forced expiry) value is still
        // served without error.
        let remote = user(42, "alice", true);
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![remote]));

        // t0 + 30m: halfway through the freshness window.
        seed(&cache, &user(42, "cached", true), 30, 30).await;
        assert_eq!(aggregator.get_user(42).await.unwrap().username, "cached");
        assert_eq!(client.call_count(), 0);

        // t0 + 90m: expired, remote reachable, cache refreshed to "alice".
        seed(&cache, &user(42, "cached", true), 90, -30).await;
        assert_eq!(aggregator.get_user(42).await.unwrap().username, "alice");
        assert_eq!(client.call_count(), 1);

        // t0 + 91m: remote down and the refreshed record forced stale; the
        // previous value still comes back, without error.
        let refreshed = cache.get(42).await.unwrap().unwrap();
        let expired = CachedUser {
            expires_at: Utc::now() - Duration::minutes(1),
            ..refreshed
        };
        cache.set(&expired).await.unwrap();
        client.set_available(false);
        assert_eq!(aggregator.get_user(42).await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn forced_refresh_overwrites_a_fresh_record() {
        let (aggregator, cache, client) =
            aggregator(MockUserClient::new(vec![user(42, "renamed", true)]));
        seed(&cache, &user(42, "original", true), 5, 55).await;

        // The record is still fresh, so only a forced refresh consults the
        // remote service.
        let refreshed = aggregator.refresh_user(42).await.unwrap();
        assert_eq!(refreshed.username, "renamed");
        assert_eq!(client.call_count(), 1);

        let record = cache.get(42).await.unwrap().unwrap();
        assert_eq!(record.username, "renamed");
        assert_eq!(record.expires_at, record.last_sync_at + Duration::hours(24));
    }

    #[tokio::test]
    async fn forced_refresh_fails_without_stale_fallback() {
        let (aggregator, cache, client) = aggregator(MockUserClient::new(vec![]));
        seed(&cache, &user(42, "cached", true), 5, 55).await;
        client.set_available(false);

        // Unlike get_user, a forced refresh reports the failure rather
        // than papering over it with the cached record.
        let err = aggregator.refresh_user(42).await.unwrap_err();
        assert!(matches!(err, AppError::UserUnavailable(42)));
        assert_eq!(cache.get(42).await.unwrap().unwrap().username, "cached");
    }

    #[tokio::test]
    async fn evicted_record_forces_the_next_lookup_remote() {
        let (aggregator, cache, client) =
            aggregator(MockUserClient::new(vec![user(42, "alice", true)]));
        seed(&cache, &user(42, "alice", true), 5, 55).await;

        assert_eq!(aggregator.get_user(42).await.unwrap().username, "alice");
        assert_eq!(client.call_count(), 0);

        aggregator.evict(42).await.unwrap();
        assert!(cache.get(42).await.unwrap().is_none());

        assert_eq!(aggregator.get_user(42).await.unwrap().username, "alice");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_remote_fetch() {
        let client = MockUserClient::new(vec![user(42, "alice", true)])
            .with_delay(StdDuration::from_millis(50));
        let (aggregator, _cache, client) = aggregator(client);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.get_user(42).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().username, "alice");
        }
        assert_eq!(client.call_count(), 1);
    }
}
