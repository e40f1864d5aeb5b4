//! Queue descriptor cache for the inbound relay.
//!
//! Bounded TTL cache owned by the relay instance. Entries expire after the
//! configured TTL; when full, expired entries are evicted first, then the
//! oldest live entry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::directory::QueueDescriptor;

struct CacheEntry {
    descriptor: QueueDescriptor,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// TTL + capacity bounded map of tenant id to inbound queue descriptor.
pub struct QueueCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl QueueCache {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, tenant_id: &str) -> Option<QueueDescriptor> {
        let entries = self.entries.lock();
        let entry = entries.get(tenant_id)?;
        if entry.is_expired(self.ttl) {
            return None;
        }
        Some(entry.descriptor.clone())
    }

    pub fn insert(&self, tenant_id: &str, descriptor: QueueDescriptor) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(tenant_id) && entries.len() >= self.capacity {
            Self::evict_one(&mut entries, self.ttl);
        }
        entries.insert(
            tenant_id.to_string(),
            CacheEntry {
                descriptor,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop a tenant's entry, forcing the next lookup through the directory.
    pub fn evict(&self, tenant_id: &str) {
        self.entries.lock().remove(tenant_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn evict_one(entries: &mut HashMap<String, CacheEntry>, ttl: Duration) {
        // Prefer an expired entry; otherwise the oldest live one goes.
        let victim = entries
            .iter()
            .find(|(_, e)| e.is_expired(ttl))
            .map(|(k, _)| k.clone())
            .or_else(|| {
                entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
            });
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::QueueDirection;

    fn descriptor(tenant: &str) -> QueueDescriptor {
        QueueDescriptor {
            tenant_id: tenant.to_string(),
            direction: QueueDirection::Inbound,
            arn: format!("arn:queue:{tenant}-inbound"),
            url: format!("queue://{tenant}-inbound"),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = QueueCache::new(300, 256);
        assert!(cache.get("t1").is_none());

        cache.insert("t1", descriptor("t1"));
        assert_eq!(cache.get("t1").unwrap().url, "queue://t1-inbound");
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = QueueCache::new(0, 256);
        cache.insert("t1", descriptor("t1"));
        // Zero TTL: entries are expired on arrival.
        assert!(cache.get("t1").is_none());
    }

    #[test]
    fn test_evict() {
        let cache = QueueCache::new(300, 256);
        cache.insert("t1", descriptor("t1"));
        cache.evict("t1");
        assert!(cache.get("t1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = QueueCache::new(300, 2);
        cache.insert("t1", descriptor("t1"));
        cache.insert("t2", descriptor("t2"));
        cache.insert("t3", descriptor("t3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("t1").is_none());
        assert!(cache.get("t3").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let cache = QueueCache::new(300, 2);
        cache.insert("t1", descriptor("t1"));
        cache.insert("t2", descriptor("t2"));
        // Overwriting an existing key stays within capacity.
        cache.insert("t1", descriptor("t1"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("t2").is_some());
    }
}
