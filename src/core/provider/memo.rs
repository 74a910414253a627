// ─── Listing Cache ───
// Documents a provider fetched recently, so one resolution cycle does not
// download the same listing for every operation. Expiry is moka's
// `time_to_live`; a zero TTL disables the cache entirely.

use std::hash::Hash;
use std::time::Duration;

use moka::future::Cache as MokaCache;

/// Listings are small and keyed by (platform, branch); this bounds a
/// misconfigured provider rather than any realistic workload.
const MAX_ENTRIES: u64 = 256;

/// Longest TTL handed to moka, which rejects durations beyond ~1000 years.
pub const MAX_LISTING_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Minutes as configured in JSON; huge values saturate instead of wrapping.
pub fn from_minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}

pub struct ListingCache<K, V> {
    cache: Option<MokaCache<K, V>>,
}

impl<K, V> ListingCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            MokaCache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl.min(MAX_LISTING_TTL))
                .build()
        });
        Self { cache }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.as_ref()?.get(key).await
    }

    pub async fn insert(&self, key: K, value: V) {
        if let Some(cache) = &self.cache {
            cache.insert(key, value).await;
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_ttl_never_stores() {
        let cache = ListingCache::new(Duration::ZERO);
        cache.insert("k", 1).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn clear_forgets_entries() {
        let cache = ListingCache::new(Duration::from_secs(60));
        cache.insert("k", vec![1, 2]).await;
        assert_eq!(cache.get(&"k").await, Some(vec![1, 2]));
        cache.clear();
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ListingCache::new(Duration::from_millis(50));
        cache.insert("k", 7).await;
        assert_eq!(cache.get(&"k").await, Some(7));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[test]
    fn minutes_saturate() {
        assert_eq!(from_minutes(15), Duration::from_secs(900));
        assert_eq!(from_minutes(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn absurd_ttl_is_clamped() {
        let cache = ListingCache::new(Duration::from_secs(u64::MAX));
        cache.insert("k", 1).await;
        assert_eq!(cache.get(&"k").await, Some(1));
    }
}
