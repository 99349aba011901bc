//! Side cache of active reservations. Never authoritative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use shared::Reservation;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub fn reservation_cache_key(reservation_id: Uuid) -> String {
    format!("reservation:{reservation_id}")
}

#[async_trait]
pub trait ReservationCache: Send + Sync {
    async fn put(&self, reservation: &Reservation, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, reservation_id: Uuid) -> Result<Option<Reservation>, CacheError>;

    async fn delete(&self, reservation_id: Uuid) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisReservationCache {
    conn_manager: ConnectionManager,
}

impl RedisReservationCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl ReservationCache for RedisReservationCache {
    async fn put(&self, reservation: &Reservation, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let payload = serde_json::to_string(reservation)?;
        let ttl_seconds = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(reservation_cache_key(reservation.reservation_id), payload, ttl_seconds)
            .await?;
        Ok(())
    }

    async fn get(&self, reservation_id: Uuid) -> Result<Option<Reservation>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let payload: Option<String> = conn.get(reservation_cache_key(reservation_id)).await?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(reservation_cache_key(reservation_id)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Stands in when the service runs without a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCache;

#[async_trait]
impl ReservationCache for DisabledCache {
    async fn put(&self, _reservation: &Reservation, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, _reservation_id: Uuid) -> Result<Option<Reservation>, CacheError> {
        Ok(None)
    }

    async fn delete(&self, _reservation_id: Uuid) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// In-process cache for tests. TTLs are not enforced.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, reservation_id: Uuid) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(&reservation_cache_key(reservation_id)))
            .unwrap_or(false)
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache marked failing".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl ReservationCache for MemoryCache {
    async fn put(&self, reservation: &Reservation, _ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(reservation)?;
        self.entries()?
            .insert(reservation_cache_key(reservation.reservation_id), payload);
        Ok(())
    }

    async fn get(&self, reservation_id: Uuid) -> Result<Option<Reservation>, CacheError> {
        let payload = self.entries()?.get(&reservation_cache_key(reservation_id)).cloned();
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), CacheError> {
        self.entries()?.remove(&reservation_cache_key(reservation_id));
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.entries().map(|_| ())
    }
}

#[derive(Clone)]
pub struct AdvisoryCache {
    inner: Arc<dyn ReservationCache>,
    timeout: Duration,
}

impl AdvisoryCache {
    pub fn new(inner: Arc<dyn ReservationCache>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledCache), Duration::from_millis(500))
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    pub async fn remember(&self, reservation: &Reservation, ttl: Duration) {
        if let Err(e) = self.bounded(self.inner.put(reservation, ttl)).await {
            error!(
                reservation_id = %reservation.reservation_id,
                error = %e,
                "failed to cache reservation"
            );
        }
    }

    pub async fn lookup(&self, reservation_id: Uuid) -> Option<Reservation> {
        match self.bounded(self.inner.get(reservation_id)).await {
            Ok(Some(reservation)) => {
                debug!(reservation_id = %reservation_id, "reservation loaded from cache");
                Some(reservation)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(reservation_id = %reservation_id, error = %e, "failed to read reservation from cache");
                None
            }
        }
    }

    pub async fn forget(&self, reservation_id: Uuid) {
        if let Err(e) = self.bounded(self.inner.delete(reservation_id)).await {
            warn!(reservation_id = %reservation_id, error = %e, "failed to delete reservation cache");
        }
    }

    /// Unlike the other calls, health checks do see cache failures.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.bounded(self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::ReservationStatus;

    struct StalledCache;

    #[async_trait]
    impl ReservationCache for StalledCache {
        async fn put(&self, _reservation: &Reservation, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn get(&self, _reservation_id: Uuid) -> Result<Option<Reservation>, CacheError> {
            std::future::pending().await
        }

        async fn delete(&self, _reservation_id: Uuid) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    fn reservation() -> Reservation {
        let now = Utc::now();
        Reservation {
            reservation_id: Uuid::new_v4(),
            product_id: "sku".to_string(),
            order_id: "order".to_string(),
            quantity: 1,
            status: ReservationStatus::Reserved,
            expires_at: now,
            created_at: now,
        }
    }

    #[test]
    fn key_is_prefixed_with_reservation() {
        let id = Uuid::new_v4();
        assert_eq!(reservation_cache_key(id), format!("reservation:{id}"));
    }

    #[tokio::test]
    async fn remember_lookup_forget() {
        let memory = Arc::new(MemoryCache::new());
        let cache = AdvisoryCache::new(memory.clone(), Duration::from_millis(100));
        let reservation = reservation();

        cache.remember(&reservation, Duration::from_secs(60)).await;
        assert_eq!(cache.lookup(reservation.reservation_id).await, Some(reservation.clone()));

        cache.forget(reservation.reservation_id).await;
        assert!(!memory.contains(reservation.reservation_id));
        assert_eq!(cache.lookup(reservation.reservation_id).await, None);
    }

    #[tokio::test]
    async fn failures_are_swallowed_except_ping() {
        let memory = Arc::new(MemoryCache::new());
        memory.set_failing(true);
        let cache = AdvisoryCache::new(memory, Duration::from_millis(100));
        let reservation = reservation();

        cache.remember(&reservation, Duration::from_secs(60)).await;
        assert_eq!(cache.lookup(reservation.reservation_id).await, None);
        cache.forget(reservation.reservation_id).await;
        assert!(matches!(cache.ping().await, Err(CacheError::Unavailable(_))));
    }

    #[tokio::test]
    async fn stalled_calls_are_cut_off() {
        let cache = AdvisoryCache::new(Arc::new(StalledCache), Duration::from_millis(20));

        assert_eq!(cache.lookup(Uuid::new_v4()).await, None);
        assert!(matches!(cache.ping().await, Err(CacheError::Timeout(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn redis_put_get_delete() {
        let cache = RedisReservationCache::connect("redis://127.0.0.1:6379").await.unwrap();
        let reservation = reservation();

        cache.ping().await.unwrap();
        cache.put(&reservation, Duration::from_secs(30)).await.unwrap();
        assert_eq!(cache.get(reservation.reservation_id).await.unwrap(), Some(reservation.clone()));

        cache.delete(reservation.reservation_id).await.unwrap();
        assert_eq!(cache.get(reservation.reservation_id).await.unwrap(), None);
    }
}
