// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Blob replicator lifecycle.
//!
//! The main orchestrator that ties together:
//! - The remote replication log via [`crate::log::ReplicationLog`]
//! - Blob content fetches via [`crate::remote::BlobSource`]
//! - The local store via [`crate::store::BlobStore`]
//! - Watermark state, kept in the local replication log
//!
//! # Architecture
//!
//! A replicator follows one namespace in one remote region. Each pass:
//! 1. Re-reads the watermark (another instance may have advanced it)
//! 2. Walks the time buckets after the watermark up to "now"
//! 3. Fan-outs missing-blob fetches per bucket, bounded by a semaphore
//! 4. Persists the watermark after each fully replicated stable bucket
//!
//! Passes are single-flight: a trigger while one is in flight returns
//! [`PassOutcome::Skipped`] instead of queueing. Missed work is picked up
//! by the next pass, which re-derives everything from the watermark.

mod pass;
mod types;

pub use types::{PassOutcome, ReplicatorStatus};

use crate::config::ReplicatorConfig;
use crate::error::{ReplicationError, Result};
use crate::log::ReplicationLog;
use crate::metrics::{MetricsRecorder, ReplicationMetrics};
use crate::remote::BlobSource;
use crate::store::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, info_span, Instrument};

/// Replicates one namespace from a remote region into the local store.
///
/// # Collaborators
///
/// - `remote_log`: where mutation events are listed from (usually wrapped
///   in a [`CachedReplicationLog`](crate::cache::CachedReplicationLog))
/// - `local_log`: where the watermark lives and where replicated blobs are
///   re-registered so downstream regions can pick them up
/// - `store`: the local blob store
/// - `source`: blob content fetches from the remote store
pub struct BlobReplicator {
    config: ReplicatorConfig,

    /// Event listings come from here.
    remote_log: Arc<dyn ReplicationLog>,

    /// Watermark state and re-registration go here.
    local_log: Arc<dyn ReplicationLog>,

    store: Arc<dyn BlobStore>,

    source: Arc<dyn BlobSource>,

    metrics: Arc<dyn ReplicationMetrics>,

    /// Status (broadcast to watchers).
    status_tx: watch::Sender<ReplicatorStatus>,
    status_rx: watch::Receiver<ReplicatorStatus>,

    /// Cancellation signal, observed between buckets and between events.
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,

    /// Held for the duration of a pass; `try_lock` failure means a pass is
    /// already in flight.
    pass_lock: Arc<Mutex<()>>,
}

impl BlobReplicator {
    /// Create a replicator with the default metrics sink.
    ///
    /// Fails fast on invalid configuration.
    pub fn new(
        config: ReplicatorConfig,
        remote_log: Arc<dyn ReplicationLog>,
        local_log: Arc<dyn ReplicationLog>,
        store: Arc<dyn BlobStore>,
        source: Arc<dyn BlobSource>,
    ) -> Result<Self> {
        Self::with_metrics(
            config,
            remote_log,
            local_log,
            store,
            source,
            Arc::new(MetricsRecorder),
        )
    }

    /// Create a replicator with an injected metrics sink.
    pub fn with_metrics(
        config: ReplicatorConfig,
        remote_log: Arc<dyn ReplicationLog>,
        local_log: Arc<dyn ReplicationLog>,
        store: Arc<dyn BlobStore>,
        source: Arc<dyn BlobSource>,
        metrics: Arc<dyn ReplicationMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let (status_tx, status_rx) = watch::channel(ReplicatorStatus::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        metrics.replicator_state(&config.replicator_name, "Idle");

        Ok(Self {
            config,
            remote_log,
            local_log,
            store,
            source,
            metrics,
            status_tx,
            status_rx,
            cancel_tx,
            cancel_rx,
            pass_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    /// Get current status.
    pub fn status(&self) -> ReplicatorStatus {
        *self.status_rx.borrow()
    }

    /// Get a receiver to watch status changes.
    pub fn status_receiver(&self) -> watch::Receiver<ReplicatorStatus> {
        self.status_rx.clone()
    }

    /// Check if a pass is in flight.
    pub fn is_running(&self) -> bool {
        matches!(self.status(), ReplicatorStatus::Running)
    }

    /// Run one replication pass.
    ///
    /// Single-flight: if a pass is already in flight, returns
    /// [`PassOutcome::Skipped`] immediately. On a stopped replicator this
    /// returns [`ReplicationError::InvalidState`].
    pub async fn trigger_pass(&self) -> Result<PassOutcome> {
        if self.status() == ReplicatorStatus::Stopped {
            return Err(ReplicationError::InvalidState {
                expected: "Idle".to_string(),
                actual: "Stopped".to_string(),
            });
        }

        let Ok(_guard) = self.pass_lock.try_lock() else {
            return Ok(PassOutcome::Skipped);
        };

        let name = self.config.replicator_name.clone();
        self.set_status(ReplicatorStatus::Running);

        let started = std::time::Instant::now();
        let result = self
            .run_pass()
            .instrument(info_span!(
                "replication_pass",
                replicator = %name,
                namespace = %self.config.namespace
            ))
            .await;
        self.metrics.pass_duration(&name, started.elapsed());

        // stop() may have raced us to the terminal state.
        if self.status() != ReplicatorStatus::Stopped {
            self.set_status(ReplicatorStatus::Idle);
        }

        result
    }

    /// Run passes on a fixed interval until stopped.
    ///
    /// The first pass runs immediately. Errors are logged and the loop
    /// keeps going; a wedged remote shows up as replication lag, not as a
    /// dead task.
    pub async fn run(&self, interval: Duration) {
        let mut cancel_rx = self.cancel_rx.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!(replicator = %self.config.replicator_name, "run loop stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.trigger_pass().await {
                        Ok(PassOutcome::Skipped) => {}
                        Ok(outcome) => {
                            info!(replicator = %self.config.replicator_name, ?outcome, "pass finished");
                        }
                        Err(ReplicationError::InvalidState { .. }) => break,
                        Err(e) => {
                            error!(replicator = %self.config.replicator_name, error = %e, "pass failed");
                        }
                    }
                }
            }
        }
    }

    /// Stop the replicator, waiting for any in-flight pass to drain.
    ///
    /// The in-flight pass observes the cancellation signal between buckets
    /// and between events; a partially replicated bucket does not advance
    /// the watermark and is re-walked by the replicator's successor.
    pub async fn stop(&self) {
        info!(replicator = %self.config.replicator_name, "stopping");
        // Ignore send errors: no receivers means nothing in flight.
        let _ = self.cancel_tx.send(true);

        // Wait for the in-flight pass (if any) to release the lock.
        let _guard = self.pass_lock.lock().await;
        self.set_status(ReplicatorStatus::Stopped);
        info!(replicator = %self.config.replicator_name, "stopped");
    }

    fn set_status(&self, status: ReplicatorStatus) {
        let _ = self.status_tx.send(status);
        self.metrics
            .replicator_state(&self.config.replicator_name, &status.to_string());
    }

    fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}
