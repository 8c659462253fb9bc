//! # Blob Replicator
//!
//! A cross-region replication engine for a content-addressable blob store.
//!
//! ## Architecture
//!
//! The replicator tails the remote region's append-only replication log,
//! fetches missing blob content, and records its progress as a watermark:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           blob-replicator                            │
//! │                                                                      │
//! │  ┌────────────────────┐   ┌─────────────────┐   ┌─────────────────┐  │
//! │  │ CachedReplication  │──►│ BlobReplicator  │──►│ BlobStore       │  │
//! │  │ Log (bucket LRU)   │   │ (bucket walk +  │   │ (local region)  │  │
//! │  └────────────────────┘   │  bounded fanout)│   └─────────────────┘  │
//! │            │              └─────────────────┘            │           │
//! │            ▼                       │                     ▼           │
//! │  ┌────────────────────┐            ▼           ┌─────────────────┐   │
//! │  │ HttpReplicationLog │   ┌─────────────────┐  │ local log       │   │
//! │  │ (remote region)    │   │ HttpBlobSource  │  │ (watermark +    │   │
//! │  └────────────────────┘   │ (blob GETs)     │  │  re-registration│   │
//! │                           └─────────────────┘  └─────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time Buckets
//!
//! The log is partitioned into 5-minute wall-clock buckets with sortable
//! string ids (`2026-08-23-14-30`). A pass walks the buckets after the
//! persisted watermark, replicates each one with bounded parallelism, and
//! advances the watermark only past buckets old enough to be immutable.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use blob_replicator::{
//!     BlobReplicator, CachedReplicationLog, HttpBlobSource, HttpReplicationLog,
//!     ReplicatorConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # use blob_replicator::{MemoryBlobStore, MemoryReplicationLog};
//! #[tokio::main]
//! async fn main() -> blob_replicator::Result<()> {
//!     let config = ReplicatorConfig {
//!         replicator_name: "eu-west-from-us-east".into(),
//!         namespace: "textures".into(),
//!         connection_string: "https://ddc.us-east.example.com".into(),
//!         ..ReplicatorConfig::for_testing("eu-west-from-us-east", "textures")
//!     };
//!
//!     let client = reqwest::Client::new();
//!     let remote_log = HttpReplicationLog::new(client.clone(), &config.connection_string);
//!     let remote_log = Arc::new(CachedReplicationLog::new(
//!         remote_log,
//!         &config.cache,
//!         config.stability_horizon_duration(),
//!     ));
//!     let source = Arc::new(HttpBlobSource::new(client, &config.connection_string));
//!     # let local_log = Arc::new(MemoryReplicationLog::new());
//!     # let store = Arc::new(MemoryBlobStore::new());
//!
//!     let replicator = BlobReplicator::new(config, remote_log, local_log, store, source)?;
//!     replicator.run(Duration::from_secs(30)).await;
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod log;
pub mod metrics;
pub mod remote;
pub mod replicator;
pub mod store;

// Re-exports for convenience
pub use bucket::{buckets_after, TimeBucket};
pub use cache::CachedReplicationLog;
pub use config::{CacheConfig, FetchRetryConfig, ReplicatorConfig};
pub use error::{ReplicationError, Result};
pub use log::{
    BlobMutationEvent, MemoryReplicationLog, MutationOp, ReplicationLog, ReplicatorState,
    SnapshotInfo,
};
pub use remote::{BlobSource, HttpBlobSource, HttpReplicationLog};
pub use replicator::{BlobReplicator, PassOutcome, ReplicatorStatus};
pub use store::{BlobStore, MemoryBlobStore};
