// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local blob store seam.
//!
//! The replicator only needs two operations against local storage: an
//! existence probe (to skip blobs already present) and a write. The
//! trait keeps the pass logic independent of the actual storage backend;
//! [`MemoryBlobStore`] backs the tests.

use crate::log::BoxFuture;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Local content-addressable blob storage.
///
/// Implementations report failures as
/// [`ReplicationError::Store`](crate::error::ReplicationError::Store);
/// store errors are not retryable within a pass.
pub trait BlobStore: Send + Sync {
    /// Whether a blob is already present locally.
    fn exists<'a>(&'a self, namespace: &'a str, blob_id: &'a str) -> BoxFuture<'a, bool>;

    /// Write blob content under its id. Overwrites are harmless: content
    /// addressing means identical id implies identical bytes.
    fn put<'a>(&'a self, namespace: &'a str, blob_id: &'a str, content: Bytes)
        -> BoxFuture<'a, ()>;
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Bytes>>,
    put_count: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, namespace: &str, blob_id: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .await
            .get(&(namespace.to_string(), blob_id.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// How many times `put` was called (distinct from `len` when a blob is
    /// written twice).
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Seed a blob directly, bypassing the put counter.
    pub async fn seed(&self, namespace: &str, blob_id: &str, content: Bytes) {
        let mut blobs = self.blobs.write().await;
        blobs.insert((namespace.to_string(), blob_id.to_string()), content);
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists<'a>(&'a self, namespace: &'a str, blob_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .blobs
                .read()
                .await
                .contains_key(&(namespace.to_string(), blob_id.to_string())))
        })
    }

    fn put<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        content: Bytes,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.put_count.fetch_add(1, Ordering::SeqCst);
            let mut blobs = self.blobs.write().await;
            blobs.insert((namespace.to_string(), blob_id.to_string()), content);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_exists() {
        let store = MemoryBlobStore::new();
        assert!(!store.exists("ns", "blob-1").await.unwrap());

        store
            .put("ns", "blob-1", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert!(store.exists("ns", "blob-1").await.unwrap());
        assert_eq!(
            store.get("ns", "blob-1").await,
            Some(Bytes::from_static(b"payload"))
        );
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = MemoryBlobStore::new();
        store
            .put("ns-a", "blob-1", Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert!(!store.exists("ns-b", "blob-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_does_not_count_as_put() {
        let store = MemoryBlobStore::new();
        store.seed("ns", "blob-1", Bytes::from_static(b"x")).await;
        assert!(store.exists("ns", "blob-1").await.unwrap());
        assert_eq!(store.put_count(), 0);
    }
}
