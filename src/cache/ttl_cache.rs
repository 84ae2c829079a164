use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Entrada con vencimiento propio
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Orden de inserción, para desalojar la más vieja
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache acotado con TTL por entrada.
///
/// Al pasar la capacidad se desaloja la entrada insertada hace más tiempo.
/// Las entradas vencidas se descartan al leerlas o con [`TtlCache::cleanup_expired`].
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    data: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    seq: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            data: DashMap::new(),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Inserta `value` por `ttl`. Un TTL de cero no guarda nada.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        if ttl.is_zero() {
            return None;
        }

        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let previous = self.data.insert(key, entry).map(|old| old.value);

        while self.data.len() > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        previous
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().seq)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => self.data.remove(&key).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = TtlCache::new(4);
        cache.insert_with_ttl("corta", 1, Duration::from_secs(10));
        cache.insert_with_ttl("larga", 2, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get(&"corta"), None);
        assert_eq!(cache.get(&"larga"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_only_expired() {
        let cache = TtlCache::new(4);
        cache.insert_with_ttl(1, "a", Duration::from_secs(5));
        cache.insert_with_ttl(2, "b", Duration::from_secs(5));
        cache.insert_with_ttl(3, "c", Duration::from_secs(50));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted_at_capacity() {
        let cache = TtlCache::new(2);
        cache.insert_with_ttl("a", 1, Duration::from_secs(60));
        cache.insert_with_ttl("b", 2, Duration::from_secs(60));
        cache.insert_with_ttl("c", 3, Duration::from_secs(60));

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache = TtlCache::new(2);
        cache.insert_with_ttl("a", 1, Duration::ZERO);
        assert!(cache.is_empty());
    }
}
