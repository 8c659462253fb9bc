//! Configuration for the blob replicator.
//!
//! Configuration is passed to [`BlobReplicator::new()`](crate::BlobReplicator::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use blob_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig {
//!     replicator_name: "eu-west-from-us-east".into(),
//!     namespace: "textures".into(),
//!     connection_string: "https://ddc.us-east.example.com".into(),
//!     ..ReplicatorConfig::for_testing("eu-west-from-us-east", "textures")
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── replicator_name: String       # Watermark identity (one per replica pair)
//! ├── namespace: String             # Namespace to replicate
//! ├── connection_string: String     # Base URL of the remote region
//! ├── max_parallel_replications     # Fan-out bound (0 = host cores)
//! ├── backfill_window: "7d"         # Watermark seed on first run
//! ├── stability_horizon: "10m"      # Hot-bucket cutoff
//! ├── cache: CacheConfig            # Bucket listing cache
//! └── fetch_retry: FetchRetryConfig # Per-blob retry budget
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! replicator_name: "eu-west-from-us-east"
//! namespace: "textures"
//! connection_string: "https://ddc.us-east.example.com"
//! max_parallel_replications: 64
//! backfill_window: "7d"
//!
//! cache:
//!   enabled: true
//!   max_events_per_namespace: 65536
//!   ttl: "1h"
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to BlobReplicator::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `BlobReplicator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Unique name for this replicator instance. The watermark is keyed by
    /// this name, so two replicators with the same name would fight over it.
    pub replicator_name: String,

    /// The namespace this replicator follows.
    pub namespace: String,

    /// Base URL of the remote region's API (scheme + host, no trailing path).
    pub connection_string: String,

    /// Maximum blob replications in flight at once.
    /// 0 means "use the host's available parallelism".
    #[serde(default)]
    pub max_parallel_replications: usize,

    /// How far back to seed the watermark when none exists, as a duration
    /// string (e.g. "7d").
    #[serde(default = "default_backfill_window")]
    pub backfill_window: String,

    /// Buckets younger than this are considered hot: processed but never
    /// persisted as the watermark and never cached.
    #[serde(default = "default_stability_horizon")]
    pub stability_horizon: String,

    /// Bucket listing cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-blob fetch retry settings.
    #[serde(default)]
    pub fetch_retry: FetchRetryConfig,
}

fn default_backfill_window() -> String {
    "7d".to_string()
}

fn default_stability_horizon() -> String {
    "10m".to_string()
}

impl ReplicatorConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(replicator_name: &str, namespace: &str) -> Self {
        Self {
            replicator_name: replicator_name.to_string(),
            namespace: namespace.to_string(),
            connection_string: "http://localhost:8080".to_string(),
            max_parallel_replications: 4,
            backfill_window: default_backfill_window(),
            stability_horizon: default_stability_horizon(),
            cache: CacheConfig::default(),
            fetch_retry: FetchRetryConfig::default(),
        }
    }

    /// Validate the config before starting a replicator.
    pub fn validate(&self) -> Result<()> {
        if self.replicator_name.is_empty() {
            return Err(ReplicationError::Config(
                "replicator_name must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(ReplicationError::Config(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.connection_string.is_empty() {
            return Err(ReplicationError::Config(
                "connection_string must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective fan-out bound: the configured value, or the host's
    /// available parallelism when set to 0.
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel_replications > 0 {
            self.max_parallel_replications
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Parse the backfill window string to a Duration.
    pub fn backfill_window_duration(&self) -> Duration {
        humantime::parse_duration(&self.backfill_window)
            .unwrap_or(Duration::from_secs(7 * 24 * 3600))
    }

    /// Parse the stability horizon string to a Duration.
    pub fn stability_horizon_duration(&self) -> Duration {
        humantime::parse_duration(&self.stability_horizon).unwrap_or(Duration::from_secs(600))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CacheConfig: bucket listing cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Bucket listing cache configuration.
///
/// The cache sits in front of the remote log and stores event listings for
/// stable buckets only; hot buckets may still receive events and are always
/// re-listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the listing cache is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cost budget per namespace, counted in cached events. Least recently
    /// used buckets are evicted when a namespace exceeds its budget.
    #[serde(default = "default_max_events_per_namespace")]
    pub max_events_per_namespace: usize,

    /// Sliding time-to-live per cached bucket (e.g. "1h"). Reads refresh it.
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

fn default_true() -> bool {
    true
}

fn default_max_events_per_namespace() -> usize {
    65_536
}

fn default_cache_ttl() -> String {
    "1h".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_events_per_namespace: 65_536,
            ttl: "1h".to_string(),
        }
    }
}

impl CacheConfig {
    /// Parse the ttl string to a Duration.
    pub fn ttl_duration(&self) -> Duration {
        humantime::parse_duration(&self.ttl).unwrap_or(Duration::from_secs(3600))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FetchRetryConfig: per-blob retry budget
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry budget for fetching one blob from the remote store.
///
/// A 404 on a blob named by the log usually means the remote store lags its
/// own log; each 404 waits `not_found_delay` before retrying. Exhausting the
/// budget skips the single event, never the bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRetryConfig {
    /// Maximum fetch attempts per blob.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts after a 404, as a duration string.
    #[serde(default = "default_not_found_delay")]
    pub not_found_delay: String,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_not_found_delay() -> String {
    "1s".to_string()
}

impl Default for FetchRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            not_found_delay: "1s".to_string(),
        }
    }
}

impl FetchRetryConfig {
    /// Parse the not_found_delay string to a Duration.
    pub fn not_found_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.not_found_delay).unwrap_or(Duration::from_secs(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
