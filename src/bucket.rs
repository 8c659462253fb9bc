// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Time bucket codec.
//!
//! The replication log is partitioned into fixed 5-minute windows of
//! wall-clock time, each identified by a canonical, zero-padded string
//! (`YYYY-MM-DD-HH-MM`, UTC). Zero padding makes lexicographic order equal
//! chronological order, so buckets sort like the timestamps they encode.
//!
//! # Bucket Walking
//!
//! [`buckets_after`] is the pacing mechanism for the whole replication loop:
//! it yields buckets strictly after the watermark, in ascending order, up to
//! and including the bucket containing "now". It never yields a bucket whose
//! window starts in the future, and it is a pure function of the current
//! time, so a crashed pass resumes from the same sequence.
//!
//! The bucket containing "now" is yielded so its events can be replicated
//! early, but it stays inside the stability horizon and therefore never
//! becomes the persisted watermark (see the replicator's hot-bucket rule).

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Width of one time bucket, in seconds.
pub const BUCKET_WINDOW_SECS: i64 = 300;

/// Canonical bucket id format: sortable, UTC, minute resolution.
const BUCKET_FORMAT: &str = "%Y-%m-%d-%H-%M";

fn bucket_window() -> Duration {
    Duration::seconds(BUCKET_WINDOW_SECS)
}

/// A 5-minute window of wall-clock time, identified by its start.
///
/// Ordering is chronological; the string form sorts the same way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket(DateTime<Utc>);

impl TimeBucket {
    /// Floor a timestamp to its containing 5-minute bucket.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(BUCKET_WINDOW_SECS);
        // In range for any representable DateTime<Utc>, so the fallback
        // never fires in practice.
        Self(DateTime::from_timestamp(floored, 0).unwrap_or(ts))
    }

    /// The bucket containing the current wall-clock time.
    pub fn current() -> Self {
        Self::from_timestamp(Utc::now())
    }

    /// Start of this bucket's window.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// End of this bucket's window (exclusive).
    pub fn end_time(&self) -> DateTime<Utc> {
        self.0 + bucket_window()
    }

    /// The bucket immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + bucket_window())
    }

    /// Whether this bucket has aged past the stability horizon.
    ///
    /// Stable buckets no longer receive late events: they are safe to cache
    /// and safe to persist as a watermark. Hot buckets are neither.
    pub fn is_stable(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        self.0 < now - horizon
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BUCKET_FORMAT))
    }
}

impl FromStr for TimeBucket {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        let naive = NaiveDateTime::parse_from_str(&format!("{}-00", s), "%Y-%m-%d-%H-%M-%S")
            .map_err(|e| {
                ReplicationError::Internal(format!("malformed time bucket {:?}: {}", s, e))
            })?;
        let ts = naive.and_utc();
        if ts.timestamp() % BUCKET_WINDOW_SECS != 0 {
            return Err(ReplicationError::Internal(format!(
                "time bucket {:?} is not on a 5-minute boundary",
                s
            )));
        }
        Ok(Self(ts))
    }
}

impl Serialize for TimeBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeBucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Iterate buckets strictly after `from`, ascending, stopping at "now".
///
/// The final yielded bucket is the one containing `now`; buckets whose
/// window starts in the future are never yielded. If `from` is already at
/// or past the current bucket, the iterator is empty.
pub fn buckets_after(from: &TimeBucket, now: DateTime<Utc>) -> BucketWalk {
    BucketWalk {
        next: from.next(),
        now,
    }
}

/// Finite, restartable bucket iterator. See [`buckets_after`].
#[derive(Debug, Clone)]
pub struct BucketWalk {
    next: TimeBucket,
    now: DateTime<Utc>,
}

impl Iterator for BucketWalk {
    type Item = TimeBucket;

    fn next(&mut self) -> Option<TimeBucket> {
        if self.next.start_time() > self.now {
            return None;
        }
        let bucket = self.next.clone();
        self.next = bucket.next();
        Some(bucket)
    }
}
