// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication log data model and client trait.
//!
//! The replication log is an append-only record of blob mutations,
//! partitioned by namespace and 5-minute time bucket. [`ReplicationLog`]
//! is the seam between the replicator and a concrete log backend: the
//! HTTP client in [`crate::remote`] for production, or the in-memory
//! [`MemoryReplicationLog`] for tests.
//!
//! Per-replicator watermark state lives behind the same trait
//! ([`get_state`](ReplicationLog::get_state) /
//! [`set_state`](ReplicationLog::set_state)) so the pass logic never
//! cares where it is stored.

use crate::bucket::TimeBucket;
use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Boxed future type used by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What a mutation event did to its blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Added,
    Deleted,
}

impl MutationOp {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// One entry in the replication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMutationEvent {
    pub namespace: String,
    /// Content hash of the blob, as a hex string.
    pub blob_id: String,
    pub op: MutationOp,
    /// Opaque placement hint forwarded on registration; the log may use it
    /// to route the event without re-deriving the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_hint: Option<String>,
    pub time_bucket: TimeBucket,
    pub timestamp: DateTime<Utc>,
    /// Unique id assigned by the log, strictly increasing within a bucket.
    pub event_id: String,
}

/// Watermark for one named replicator: the last fully replicated bucket
/// and the last event processed inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatorState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bucket: Option<TimeBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
}

/// Pointer to a full-state snapshot advertised by the remote when
/// incremental history is insufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub blob_id: String,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
}

/// Client interface to a replication log backend.
///
/// Object-safe so the replicator can hold `Arc<dyn ReplicationLog>`.
/// Implementations must be safe to share across tasks.
pub trait ReplicationLog: Send + Sync {
    /// List the events recorded in one bucket of one namespace, in
    /// event-id order.
    ///
    /// Errors of note: [`ReplicationError::BucketExpired`] when the bucket
    /// has been garbage-collected, [`ReplicationError::NeedsSnapshot`] when
    /// the log says incremental catch-up is no longer possible.
    fn list_events<'a>(
        &'a self,
        namespace: &'a str,
        bucket: &'a TimeBucket,
    ) -> BoxFuture<'a, Vec<BlobMutationEvent>>;

    /// Read the watermark for a named replicator. `None` when the
    /// replicator has never persisted state.
    fn get_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
    ) -> BoxFuture<'a, Option<ReplicatorState>>;

    /// Persist the watermark for a named replicator, replacing any
    /// previous value.
    fn set_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
        state: &'a ReplicatorState,
    ) -> BoxFuture<'a, ()>;

    /// Register a blob addition in this log (the local side of a
    /// replicated transfer), so downstream regions can pick it up.
    fn insert_add_event<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        bucket_hint: Option<&'a str>,
    ) -> BoxFuture<'a, ()>;
}

impl<T: ReplicationLog + ?Sized> ReplicationLog for Arc<T> {
    fn list_events<'a>(
        &'a self,
        namespace: &'a str,
        bucket: &'a TimeBucket,
    ) -> BoxFuture<'a, Vec<BlobMutationEvent>> {
        (**self).list_events(namespace, bucket)
    }

    fn get_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
    ) -> BoxFuture<'a, Option<ReplicatorState>> {
        (**self).get_state(namespace, replicator)
    }

    fn set_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
        state: &'a ReplicatorState,
    ) -> BoxFuture<'a, ()> {
        (**self).set_state(namespace, replicator, state)
    }

    fn insert_add_event<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        bucket_hint: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        (**self).insert_add_event(namespace, blob_id, bucket_hint)
    }
}

/// Failure a [`MemoryReplicationLog`] can be scripted to return for a
/// specific bucket.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Expired,
    Snapshot(SnapshotInfo),
}

/// In-memory replication log for tests.
///
/// Events are stored per `(namespace, bucket)`, watermarks per
/// `(namespace, replicator)`. Buckets can be scripted to fail with
/// [`ScriptedFailure`] to exercise the expired/snapshot paths. Call
/// counters let tests assert how often the inner log was hit (the cache
/// tests rely on this).
#[derive(Default)]
pub struct MemoryReplicationLog {
    events: RwLock<HashMap<(String, String), Vec<BlobMutationEvent>>>,
    state: RwLock<HashMap<(String, String), ReplicatorState>>,
    failures: RwLock<HashMap<(String, String), ScriptedFailure>>,
    added: RwLock<Vec<(String, String, Option<String>)>>,
    list_calls: AtomicUsize,
    next_event_id: AtomicU64,
}

impl MemoryReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to a bucket, assigning the next event id.
    pub async fn push_event(
        &self,
        namespace: &str,
        bucket: &TimeBucket,
        blob_id: &str,
        op: MutationOp,
    ) -> BlobMutationEvent {
        let event = BlobMutationEvent {
            namespace: namespace.to_string(),
            blob_id: blob_id.to_string(),
            op,
            bucket_hint: None,
            time_bucket: bucket.clone(),
            timestamp: bucket.start_time(),
            event_id: format!("evt-{:08}", self.next_event_id.fetch_add(1, Ordering::SeqCst)),
        };
        let mut events = self.events.write().await;
        events
            .entry((namespace.to_string(), bucket.to_string()))
            .or_default()
            .push(event.clone());
        event
    }

    /// Script a failure for one bucket; it replaces any stored events.
    pub async fn fail_bucket(&self, namespace: &str, bucket: &TimeBucket, failure: ScriptedFailure) {
        let mut failures = self.failures.write().await;
        failures.insert((namespace.to_string(), bucket.to_string()), failure);
    }

    pub async fn clear_failure(&self, namespace: &str, bucket: &TimeBucket) {
        let mut failures = self.failures.write().await;
        failures.remove(&(namespace.to_string(), bucket.to_string()));
    }

    /// How many times `list_events` was called.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Registrations recorded through `insert_add_event`, in call order.
    pub async fn added_events(&self) -> Vec<(String, String, Option<String>)> {
        self.added.read().await.clone()
    }

    pub async fn stored_state(&self, namespace: &str, replicator: &str) -> Option<ReplicatorState> {
        self.state
            .read()
            .await
            .get(&(namespace.to_string(), replicator.to_string()))
            .cloned()
    }
}

impl ReplicationLog for MemoryReplicationLog {
    fn list_events<'a>(
        &'a self,
        namespace: &'a str,
        bucket: &'a TimeBucket,
    ) -> BoxFuture<'a, Vec<BlobMutationEvent>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let key = (namespace.to_string(), bucket.to_string());
            if let Some(failure) = self.failures.read().await.get(&key) {
                return match failure {
                    ScriptedFailure::Expired => Err(ReplicationError::BucketExpired {
                        bucket: bucket.to_string(),
                    }),
                    ScriptedFailure::Snapshot(info) => Err(ReplicationError::NeedsSnapshot {
                        snapshot: info.clone(),
                    }),
                };
            }
            Ok(self
                .events
                .read()
                .await
                .get(&key)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn get_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
    ) -> BoxFuture<'a, Option<ReplicatorState>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .get(&(namespace.to_string(), replicator.to_string()))
                .cloned())
        })
    }

    fn set_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
        state: &'a ReplicatorState,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut map = self.state.write().await;
            map.insert(
                (namespace.to_string(), replicator.to_string()),
                state.clone(),
            );
            Ok(())
        })
    }

    fn insert_add_event<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        bucket_hint: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let bucket = TimeBucket::current();
            self.push_event(namespace, &bucket, blob_id, MutationOp::Added)
                .await;
            let mut added = self.added.write().await;
            added.push((
                namespace.to_string(),
                blob_id.to_string(),
                bucket_hint.map(str::to_string),
            ));
            Ok(())
        })
    }
}
