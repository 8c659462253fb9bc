// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replication pass: bucket walk, event fan-out, watermark rules.
//!
//! A pass is a pure function of the persisted watermark and the current
//! time. It holds no state of its own, so a crashed or cancelled pass costs
//! nothing: the next one re-derives the same work (minus blobs that already
//! landed, which the existence probe skips).
//!
//! # Watermark Rules
//!
//! - Seeded to `now - backfill_window` when no state exists, and persisted
//!   immediately so a crash before the first bucket doesn't re-seed.
//! - Advanced only after every event in a bucket has been handled.
//! - Never advanced into the stability horizon: hot buckets are processed
//!   for freshness but re-walked by the next pass.
//! - Reset to the backfill horizon when a bucket expired upstream; blobs
//!   in the gap are an accepted loss, picked up by a later full scan.

use super::types::PassOutcome;
use super::BlobReplicator;
use crate::bucket::{buckets_after, TimeBucket};
use crate::config::FetchRetryConfig;
use crate::error::{ReplicationError, Result};
use crate::log::{BlobMutationEvent, ReplicationLog, ReplicatorState};
use crate::metrics::ReplicationMetrics;
use crate::remote::BlobSource;
use crate::store::BlobStore;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

enum EventOutcome {
    Replicated,
    Skipped,
}

impl BlobReplicator {
    pub(super) async fn run_pass(&self) -> Result<PassOutcome> {
        let name = &self.config.replicator_name;
        let namespace = &self.config.namespace;

        // Recorded even for no-op passes: a replicator that stops
        // attempting is the failure mode worth alerting on.
        self.metrics.pass_attempt(name);

        let horizon = ChronoDuration::from_std(self.config.stability_horizon_duration())
            .unwrap_or_else(|_| ChronoDuration::minutes(10));

        // Re-read the watermark every pass: another instance sharing this
        // replicator name may have advanced it.
        let state = self.local_log.get_state(namespace, name).await?;
        let watermark = match state.and_then(|s| s.last_bucket) {
            Some(bucket) => bucket,
            None => {
                let seed = self.backfill_seed();
                info!(replicator = %name, seed = %seed, "no watermark, seeding to backfill horizon");
                self.persist_watermark(&seed, None).await?;
                seed
            }
        };

        let mut buckets_processed = 0usize;
        let mut events_processed = 0usize;
        let mut blobs_replicated = 0usize;

        let now = Utc::now();
        for bucket in buckets_after(&watermark, now) {
            if self.cancelled() {
                debug!(replicator = %name, "cancelled between buckets");
                break;
            }

            let events = match self.remote_log.list_events(namespace, &bucket).await {
                Ok(events) => events,
                Err(ReplicationError::BucketExpired { .. }) => {
                    let reset_to = self.backfill_seed();
                    warn!(
                        replicator = %name,
                        expired = %bucket,
                        reset_to = %reset_to,
                        "bucket expired upstream, resetting watermark"
                    );
                    self.persist_watermark(&reset_to, None).await?;
                    self.metrics.watermark_reset(name);
                    return Ok(PassOutcome::WatermarkReset {
                        reset_to: reset_to.to_string(),
                    });
                }
                // NeedsSnapshot, NamespaceUnknown, exhausted transport:
                // the caller owns the recovery policy.
                Err(e) => return Err(e),
            };

            let (replicated, completed) = self.replicate_bucket_events(&bucket, &events).await?;
            events_processed += events.len();
            blobs_replicated += replicated;

            if !completed {
                // Cancelled mid-bucket. The watermark stays put so the
                // next pass re-walks this bucket from scratch.
                break;
            }

            buckets_processed += 1;
            self.metrics.bucket_throughput(name, events.len());
            let lag_seconds = (Utc::now() - bucket.end_time())
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            self.metrics.replication_lag(name, lag_seconds);

            if bucket.is_stable(Utc::now(), horizon) {
                let last_event = events.last().map(|e| e.event_id.clone());
                self.persist_watermark(&bucket, last_event).await?;
            } else {
                debug!(replicator = %name, bucket = %bucket, "hot bucket processed, watermark not advanced");
            }
        }

        Ok(PassOutcome::Completed {
            buckets_processed,
            events_processed,
            blobs_replicated,
        })
    }

    fn backfill_seed(&self) -> TimeBucket {
        let backfill = ChronoDuration::from_std(self.config.backfill_window_duration())
            .unwrap_or_else(|_| ChronoDuration::days(7));
        TimeBucket::from_timestamp(Utc::now() - backfill)
    }

    async fn persist_watermark(
        &self,
        bucket: &TimeBucket,
        last_event: Option<String>,
    ) -> Result<()> {
        let state = ReplicatorState {
            last_bucket: Some(bucket.clone()),
            last_event,
        };
        let result = self
            .local_log
            .set_state(&self.config.namespace, &self.config.replicator_name, &state)
            .await;
        self.metrics
            .watermark_persist(&self.config.replicator_name, result.is_ok());
        result
    }

    /// Replicate every event in one bucket with bounded fan-out.
    ///
    /// Returns `(blobs_replicated, completed)`. `completed` is false when
    /// cancellation interrupted the bucket; per-event failures do not make
    /// a bucket incomplete, they are logged and skipped.
    async fn replicate_bucket_events(
        &self,
        bucket: &TimeBucket,
        events: &[BlobMutationEvent],
    ) -> Result<(usize, bool)> {
        if events.is_empty() {
            return Ok((0, true));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.effective_parallelism()));
        let mut join_set: JoinSet<Result<EventOutcome>> = JoinSet::new();
        let mut completed = true;

        debug!(
            replicator = %self.config.replicator_name,
            bucket = %bucket,
            events = events.len(),
            "replicating bucket"
        );

        for event in events {
            if self.cancelled() {
                completed = false;
                break;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ReplicationError::Internal("semaphore closed".to_string()))?;

            let event = event.clone();
            let namespace = self.config.namespace.clone();
            let replicator = self.config.replicator_name.clone();
            let retry = self.config.fetch_retry.clone();
            let store = Arc::clone(&self.store);
            let source = Arc::clone(&self.source);
            let local_log = Arc::clone(&self.local_log);
            let metrics = Arc::clone(&self.metrics);
            let cancel = self.cancel_rx.clone();

            join_set.spawn(async move {
                let _permit = permit;
                replicate_event(
                    &namespace, &replicator, &event, &retry, store, source, local_log, metrics,
                    cancel,
                )
                .await
            });
        }

        let mut replicated = 0usize;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(EventOutcome::Replicated)) => replicated += 1,
                Ok(Ok(EventOutcome::Skipped)) => {}
                Ok(Err(ReplicationError::Shutdown)) => {
                    completed = false;
                }
                Ok(Err(e)) => {
                    // One bad event never blocks the bucket.
                    warn!(
                        replicator = %self.config.replicator_name,
                        bucket = %bucket,
                        error = %e,
                        "event failed, skipping"
                    );
                    self.metrics
                        .event_error(&self.config.replicator_name, error_kind(&e));
                }
                Err(e) => {
                    warn!(
                        replicator = %self.config.replicator_name,
                        bucket = %bucket,
                        error = %e,
                        "replication task aborted"
                    );
                    self.metrics
                        .event_error(&self.config.replicator_name, "task_aborted");
                }
            }
        }

        Ok((replicated, completed))
    }
}

fn error_kind(error: &ReplicationError) -> &'static str {
    match error {
        ReplicationError::Transport { .. } => "transport",
        ReplicationError::BlobMissing { .. } => "blob_missing",
        ReplicationError::Store(_) => "store",
        ReplicationError::BucketExpired { .. } => "bucket_expired",
        ReplicationError::NeedsSnapshot { .. } => "needs_snapshot",
        ReplicationError::NamespaceUnknown { .. } => "namespace_unknown",
        _ => "other",
    }
}

/// Replicate one mutation event.
#[allow(clippy::too_many_arguments)]
async fn replicate_event(
    namespace: &str,
    replicator: &str,
    event: &BlobMutationEvent,
    retry: &FetchRetryConfig,
    store: Arc<dyn BlobStore>,
    source: Arc<dyn BlobSource>,
    local_log: Arc<dyn ReplicationLog>,
    metrics: Arc<dyn ReplicationMetrics>,
    cancel: watch::Receiver<bool>,
) -> Result<EventOutcome> {
    // Deletes are not propagated: removal is a local GC policy decision,
    // and replaying an old delete could drop a blob a newer event re-added.
    if event.op.is_deleted() {
        metrics.blob_skipped(replicator, "deleted");
        return Ok(EventOutcome::Skipped);
    }

    if store.exists(namespace, &event.blob_id).await? {
        // Already here (seeded, or delivered through another event).
        // Not re-registered: the local log already knows about it or the
        // content never actually moved.
        metrics.blob_skipped(replicator, "already_present");
        return Ok(EventOutcome::Skipped);
    }

    let content =
        match fetch_with_retry(namespace, replicator, event, retry, &source, &metrics, cancel)
            .await
        {
            Ok(content) => content,
            Err(ReplicationError::BlobMissing { blob_id }) => {
                // Retry budget exhausted. Skip this event only; the blob is
                // likely gone upstream and will never materialize.
                warn!(replicator, blob_id = %blob_id, "blob never appeared on remote, skipping event");
                metrics.blob_skipped(replicator, "exhausted");
                return Ok(EventOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

    let bytes = content.len();
    store.put(namespace, &event.blob_id, content).await?;

    // Register locally so regions downstream of us see the addition.
    local_log
        .insert_add_event(namespace, &event.blob_id, event.bucket_hint.as_deref())
        .await?;

    metrics.blob_replicated(replicator, bytes);
    debug!(replicator, blob_id = %event.blob_id, bytes, "blob replicated");
    Ok(EventOutcome::Replicated)
}

/// Fetch blob content, absorbing remote read-after-write lag.
///
/// A 404 waits `not_found_delay` before the next attempt (the remote store
/// may trail its own replication log); transport faults retry immediately
/// within the same budget. Other errors abort the event.
async fn fetch_with_retry(
    namespace: &str,
    replicator: &str,
    event: &BlobMutationEvent,
    retry: &FetchRetryConfig,
    source: &Arc<dyn BlobSource>,
    metrics: &Arc<dyn ReplicationMetrics>,
    mut cancel: watch::Receiver<bool>,
) -> Result<Bytes> {
    let max_attempts = retry.max_attempts.max(1);
    let delay = retry.not_found_delay_duration();

    let mut attempt = 1;
    loop {
        match source.fetch(namespace, &event.blob_id).await {
            Ok(content) => return Ok(content),
            Err(e @ ReplicationError::BlobMissing { .. }) => {
                if attempt >= max_attempts {
                    return Err(e);
                }
                metrics.fetch_retry(replicator);
                debug!(replicator, blob_id = %event.blob_id, attempt, "blob not on remote yet, waiting");
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return Err(ReplicationError::Shutdown);
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                metrics.fetch_retry(replicator);
                debug!(replicator, blob_id = %event.blob_id, attempt, error = %e, "fetch fault, retrying");
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}
