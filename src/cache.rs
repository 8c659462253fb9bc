// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caching decorator for replication log listings.
//!
//! Bucket listings are immutable once the bucket has aged past the
//! stability horizon, so repeated passes (and multiple replicators sharing
//! one log client) can serve them from memory instead of re-querying the
//! remote. Hot buckets may still receive events and are never cached.
//!
//! Each namespace gets its own LRU keyed by bucket id, bounded by a cost
//! budget counted in cached events rather than entry count, so one giant
//! bucket can't starve a namespace of its history. Entries also carry a
//! sliding TTL: a read refreshes the deadline, an untouched entry lapses.
//!
//! Only [`list_events`](crate::log::ReplicationLog::list_events) is
//! intercepted; state reads/writes and registrations pass straight through.

use crate::bucket::TimeBucket;
use crate::config::CacheConfig;
use crate::log::{BlobMutationEvent, BoxFuture, ReplicationLog, ReplicatorState};
use crate::metrics;
use chrono::{Duration as ChronoDuration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheSlot {
    events: Arc<Vec<BlobMutationEvent>>,
    cost: usize,
    expires_at: Instant,
}

struct NamespaceCache {
    slots: LruCache<String, CacheSlot>,
    total_cost: usize,
}

impl NamespaceCache {
    fn new() -> Self {
        Self {
            slots: LruCache::unbounded(),
            total_cost: 0,
        }
    }

    fn get(&mut self, bucket: &str, ttl: Duration) -> Option<Arc<Vec<BlobMutationEvent>>> {
        let now = Instant::now();
        let lapsed = match self.slots.get_mut(bucket) {
            Some(slot) if slot.expires_at > now => {
                slot.expires_at = now + ttl;
                return Some(Arc::clone(&slot.events));
            }
            Some(_) => true,
            None => false,
        };
        if lapsed {
            if let Some(slot) = self.slots.pop(bucket) {
                self.total_cost -= slot.cost;
            }
        }
        None
    }

    fn insert(
        &mut self,
        bucket: String,
        events: Arc<Vec<BlobMutationEvent>>,
        max_cost: usize,
        ttl: Duration,
    ) {
        // An empty listing still costs one unit so it occupies a slot and
        // can be evicted like any other entry.
        let cost = events.len().max(1);
        if cost > max_cost {
            return;
        }
        if let Some(old) = self.slots.pop(&bucket) {
            self.total_cost -= old.cost;
        }
        self.total_cost += cost;
        self.slots.put(
            bucket,
            CacheSlot {
                events,
                cost,
                expires_at: Instant::now() + ttl,
            },
        );
        while self.total_cost > max_cost {
            match self.slots.pop_lru() {
                Some((_, evicted)) => self.total_cost -= evicted.cost,
                None => break,
            }
        }
    }
}

/// Decorator that caches stable-bucket listings in front of another
/// [`ReplicationLog`].
pub struct CachedReplicationLog<L: ReplicationLog> {
    inner: L,
    namespaces: Mutex<HashMap<String, NamespaceCache>>,
    enabled: bool,
    max_cost_per_namespace: usize,
    ttl: Duration,
    stability_horizon: ChronoDuration,
}

impl<L: ReplicationLog> CachedReplicationLog<L> {
    pub fn new(inner: L, config: &CacheConfig, stability_horizon: Duration) -> Self {
        Self {
            inner,
            namespaces: Mutex::new(HashMap::new()),
            enabled: config.enabled,
            max_cost_per_namespace: config.max_events_per_namespace,
            ttl: config.ttl_duration(),
            stability_horizon: ChronoDuration::from_std(stability_horizon)
                .unwrap_or_else(|_| ChronoDuration::minutes(10)),
        }
    }

    /// Drop all cached listings.
    pub fn clear(&self) {
        self.namespaces.lock().clear();
    }

    /// Current cached cost for a namespace, in events.
    pub fn cached_cost(&self, namespace: &str) -> usize {
        self.namespaces
            .lock()
            .get(namespace)
            .map(|ns| ns.total_cost)
            .unwrap_or(0)
    }

    fn lookup(&self, namespace: &str, bucket: &str) -> Option<Arc<Vec<BlobMutationEvent>>> {
        let mut namespaces = self.namespaces.lock();
        namespaces.get_mut(namespace)?.get(bucket, self.ttl)
    }

    fn store(&self, namespace: &str, bucket: String, events: Arc<Vec<BlobMutationEvent>>) {
        let mut namespaces = self.namespaces.lock();
        namespaces
            .entry(namespace.to_string())
            .or_insert_with(NamespaceCache::new)
            .insert(bucket, events, self.max_cost_per_namespace, self.ttl);
    }
}

impl<L: ReplicationLog> ReplicationLog for CachedReplicationLog<L> {
    fn list_events<'a>(
        &'a self,
        namespace: &'a str,
        bucket: &'a TimeBucket,
    ) -> BoxFuture<'a, Vec<BlobMutationEvent>> {
        Box::pin(async move {
            if !self.enabled {
                return self.inner.list_events(namespace, bucket).await;
            }

            let key = bucket.to_string();
            if let Some(cached) = self.lookup(namespace, &key) {
                metrics::record_cache_hit(namespace);
                return Ok(cached.as_ref().clone());
            }
            metrics::record_cache_miss(namespace);

            let events = self.inner.list_events(namespace, bucket).await?;
            if bucket.is_stable(Utc::now(), self.stability_horizon) {
                self.store(namespace, key, Arc::new(events.clone()));
            }
            Ok(events)
        })
    }

    fn get_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
    ) -> BoxFuture<'a, Option<ReplicatorState>> {
        self.inner.get_state(namespace, replicator)
    }

    fn set_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
        state: &'a ReplicatorState,
    ) -> BoxFuture<'a, ()> {
        self.inner.set_state(namespace, replicator, state)
    }

    fn insert_add_event<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        bucket_hint: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        self.inner.insert_add_event(namespace, blob_id, bucket_hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{MemoryReplicationLog, MutationOp};

    fn stable_bucket() -> TimeBucket {
        // An hour old: comfortably past any reasonable horizon.
        TimeBucket::from_timestamp(Utc::now() - ChronoDuration::hours(1))
    }

    fn cached(
        log: Arc<MemoryReplicationLog>,
        max_events: usize,
    ) -> CachedReplicationLog<Arc<MemoryReplicationLog>> {
        let config = CacheConfig {
            enabled: true,
            max_events_per_namespace: max_events,
            ttl: "1h".to_string(),
        };
        CachedReplicationLog::new(log, &config, Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_stable_bucket_served_from_cache() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;

        let cache = cached(Arc::clone(&inner), 1024);
        let first = cache.list_events("ns", &bucket).await.unwrap();
        let second = cache.list_events("ns", &bucket).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_hot_bucket_not_cached() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = TimeBucket::current();
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;

        let cache = cached(Arc::clone(&inner), 1024);
        cache.list_events("ns", &bucket).await.unwrap();
        // A second listing must see any late arrivals.
        inner
            .push_event("ns", &bucket, "blob-2", MutationOp::Added)
            .await;
        let events = cache.list_events("ns", &bucket).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(inner.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .push_event("ns-a", &bucket, "blob-1", MutationOp::Added)
            .await;

        let cache = cached(Arc::clone(&inner), 1024);
        cache.list_events("ns-a", &bucket).await.unwrap();
        let other = cache.list_events("ns-b", &bucket).await.unwrap();

        assert!(other.is_empty());
        assert_eq!(inner.list_calls(), 2);
        assert_eq!(cache.cached_cost("ns-a"), 1);
        assert_eq!(cache.cached_cost("ns-b"), 1); // Empty listing costs 1
    }

    #[tokio::test]
    async fn test_cost_budget_evicts_lru() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let now = Utc::now();
        let b1 = TimeBucket::from_timestamp(now - ChronoDuration::hours(3));
        let b2 = TimeBucket::from_timestamp(now - ChronoDuration::hours(2));
        for i in 0..3 {
            inner
                .push_event("ns", &b1, &format!("b1-{}", i), MutationOp::Added)
                .await;
            inner
                .push_event("ns", &b2, &format!("b2-{}", i), MutationOp::Added)
                .await;
        }

        // Budget holds one bucket's worth of events, not two.
        let cache = cached(Arc::clone(&inner), 4);
        cache.list_events("ns", &b1).await.unwrap();
        cache.list_events("ns", &b2).await.unwrap();
        assert!(cache.cached_cost("ns") <= 4);

        // b1 was evicted to make room for b2, so it hits the inner log again.
        cache.list_events("ns", &b1).await.unwrap();
        assert_eq!(inner.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_oversized_listing_not_cached() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        for i in 0..10 {
            inner
                .push_event("ns", &bucket, &format!("blob-{}", i), MutationOp::Added)
                .await;
        }

        let cache = cached(Arc::clone(&inner), 5);
        cache.list_events("ns", &bucket).await.unwrap();
        cache.list_events("ns", &bucket).await.unwrap();

        assert_eq!(inner.list_calls(), 2);
        assert_eq!(cache.cached_cost("ns"), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;

        let config = CacheConfig {
            enabled: true,
            max_events_per_namespace: 1024,
            ttl: "0s".to_string(),
        };
        let cache =
            CachedReplicationLog::new(Arc::clone(&inner), &config, Duration::from_secs(600));

        cache.list_events("ns", &bucket).await.unwrap();
        // Entry expired immediately; second read goes to the inner log.
        cache.list_events("ns", &bucket).await.unwrap();
        assert_eq!(inner.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;

        let cache = cached(Arc::clone(&inner), 1024);
        cache.list_events("ns", &bucket).await.unwrap();
        cache.clear();
        cache.list_events("ns", &bucket).await.unwrap();

        assert_eq!(inner.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_state_and_registration_pass_through() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let cache = cached(Arc::clone(&inner), 1024);

        let state = ReplicatorState {
            last_bucket: Some(stable_bucket()),
            last_event: None,
        };
        cache.set_state("ns", "repl", &state).await.unwrap();
        assert_eq!(cache.get_state("ns", "repl").await.unwrap(), Some(state));

        cache.insert_add_event("ns", "blob-1", None).await.unwrap();
        assert_eq!(inner.added_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_delegates() {
        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;

        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache =
            CachedReplicationLog::new(Arc::clone(&inner), &config, Duration::from_secs(600));

        cache.list_events("ns", &bucket).await.unwrap();
        cache.list_events("ns", &bucket).await.unwrap();
        assert_eq!(inner.list_calls(), 2);
        assert_eq!(cache.cached_cost("ns"), 0);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        use crate::log::ScriptedFailure;

        let inner = Arc::new(MemoryReplicationLog::new());
        let bucket = stable_bucket();
        inner
            .fail_bucket("ns", &bucket, ScriptedFailure::Expired)
            .await;

        let cache = cached(Arc::clone(&inner), 1024);
        assert!(cache.list_events("ns", &bucket).await.is_err());

        // Once the inner log recovers, the cache must not replay the error.
        inner.clear_failure("ns", &bucket).await;
        inner
            .push_event("ns", &bucket, "blob-1", MutationOp::Added)
            .await;
        let events = cache.list_events("ns", &bucket).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
