use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::DispatchResult;
use crate::model::{BookingId, GeoPoint};

/// Last known position per booking.
#[async_trait]
pub trait LocationCache: Send + Sync {
    async fn set(&self, booking: BookingId, point: GeoPoint) -> DispatchResult<()>;

    async fn get(&self, booking: BookingId) -> DispatchResult<Option<GeoPoint>>;

    async fn remove(&self, booking: BookingId) -> DispatchResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct CachedPoint {
    point: GeoPoint,
    stored_at: Instant,
}

/// Capacity-bounded LRU with a per-entry time to live.
///
/// Entries are dropped on read once older than the TTL, evicted least
/// recently used when the cache is full, and removed explicitly when a
/// booking ends.
pub struct InMemoryLocationCache {
    entries: Mutex<LruCache<BookingId, CachedPoint>>,
    ttl: Duration,
}

impl InMemoryLocationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl LocationCache for InMemoryLocationCache {
    async fn set(&self, booking: BookingId, point: GeoPoint) -> DispatchResult<()> {
        self.entries.lock().put(
            booking,
            CachedPoint {
                point,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, booking: BookingId) -> DispatchResult<Option<GeoPoint>> {
        let mut entries = self.entries.lock();
        match entries.get(&booking).copied() {
            Some(cached) if cached.stored_at.elapsed() <= self.ttl => Ok(Some(cached.point)),
            Some(_) => {
                entries.pop(&booking);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, booking: BookingId) -> DispatchResult<()> {
        self.entries.lock().pop(&booking);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_overwrites_previous_point() {
        let cache = InMemoryLocationCache::new(8, Duration::from_secs(60));
        let booking = BookingId::new();
        cache.set(booking, GeoPoint::new(1.0, 1.0)).await.unwrap();
        cache.set(booking, GeoPoint::new(2.0, 2.0)).await.unwrap();
        assert_eq!(
            cache.get(booking).await.unwrap(),
            Some(GeoPoint::new(2.0, 2.0))
        );
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryLocationCache::new(8, Duration::from_secs(60));
        let booking = BookingId::new();
        cache.set(booking, GeoPoint::new(1.0, 1.0)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(booking).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(booking).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = InMemoryLocationCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (BookingId::new(), BookingId::new(), BookingId::new());
        cache.set(a, GeoPoint::new(1.0, 1.0)).await.unwrap();
        cache.set(b, GeoPoint::new(2.0, 2.0)).await.unwrap();
        cache.get(a).await.unwrap();
        cache.set(c, GeoPoint::new(3.0, 3.0)).await.unwrap();

        assert!(cache.get(a).await.unwrap().is_some());
        assert!(cache.get(b).await.unwrap().is_none());
        assert!(cache.get(c).await.unwrap().is_some());
    }
}
