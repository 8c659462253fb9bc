//! Replicator state types.
//!
//! # State Transitions
//!
//! ```text
//!            trigger_pass()
//! Idle ─────────────────────→ Running
//!   ↑                            │
//!   │        (pass finished)     │
//!   └────────────────────────────┘
//!
//!   stop() from either state ──→ Stopped (terminal)
//! ```
//!
//! - **Idle**: No pass in flight. `trigger_pass()` starts one.
//! - **Running**: A pass is walking buckets. Concurrent triggers are skipped.
//! - **Stopped**: `stop()` completed. The replicator cannot be restarted.

/// State of a blob replicator.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorStatus {
    /// No pass in flight.
    Idle,

    /// A replication pass is in progress.
    Running,

    /// Stopped. Terminal state; create a new replicator to resume.
    Stopped,
}

impl std::fmt::Display for ReplicatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicatorStatus::Idle => write!(f, "Idle"),
            ReplicatorStatus::Running => write!(f, "Running"),
            ReplicatorStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// How a replication pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already in flight; this trigger did nothing.
    Skipped,

    /// The pass walked its buckets to completion (possibly zero of them).
    Completed {
        buckets_processed: usize,
        events_processed: usize,
        blobs_replicated: usize,
    },

    /// A bucket had expired upstream; the watermark was reset to the
    /// backfill horizon. The next pass re-walks from there.
    WatermarkReset {
        /// Bucket id the watermark was reset to.
        reset_to: String,
    },
}

impl PassOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}
