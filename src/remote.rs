// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP clients for the remote region.
//!
//! Two surfaces live here:
//! - [`HttpReplicationLog`]: the replication-log API (bucket listings,
//!   watermark state, blob registration).
//! - [`HttpBlobSource`]: raw blob content GETs against the remote store.
//!
//! Transient faults (connection errors, 5xx, 429) are retried in place with
//! a small capped backoff; semantic responses (expired bucket, snapshot
//! required, unknown namespace, missing blob) are mapped to typed errors
//! and surfaced to the caller, which owns the recovery policy.

use crate::bucket::TimeBucket;
use crate::error::{ReplicationError, Result};
use crate::log::{BlobMutationEvent, BoxFuture, ReplicationLog, ReplicatorState, SnapshotInfo};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Transient-fault retry budget for a single API call.
const TRANSIENT_RETRIES: u32 = 3;
/// Base backoff between transient retries; doubles per attempt.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(250);
/// Backoff ceiling.
const TRANSIENT_BACKOFF_MAX: Duration = Duration::from_secs(5);

fn backoff_for_attempt(attempt: u32) -> Duration {
    let backoff = TRANSIENT_BACKOFF.saturating_mul(2u32.saturating_pow(attempt));
    backoff.min(TRANSIENT_BACKOFF_MAX)
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Debug, Deserialize)]
struct ListEventsResponse {
    events: Vec<BlobMutationEvent>,
}

/// Problem body returned by the log API on 400 responses.
#[derive(Debug, Deserialize)]
struct ProblemBody {
    #[serde(rename = "type")]
    problem_type: String,
    #[serde(default)]
    snapshot: Option<SnapshotInfo>,
}

/// Replication log client over HTTP.
///
/// Routes (relative to the base URL):
/// - `GET  /api/v1/replication-log/blobs/{ns}/{bucket}`
/// - `GET  /api/v1/replication-log/state/{ns}/{replicator}`
/// - `PUT  /api/v1/replication-log/state/{ns}/{replicator}`
/// - `POST /api/v1/replication-log/blobs/{ns}/{blob_id}`
pub struct HttpReplicationLog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReplicationLog {
    /// `base_url` is scheme + host, no trailing slash.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_with_retries(&self, operation: &str, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let result = self.client.get(url).send().await;
            match result {
                Ok(response) if is_transient_status(response.status()) => {
                    if attempt >= TRANSIENT_RETRIES {
                        return Err(ReplicationError::transport_msg(
                            operation,
                            format!("{} after {} retries", response.status(), attempt),
                        ));
                    }
                    warn!(operation, status = %response.status(), attempt, "transient response, backing off");
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= TRANSIENT_RETRIES {
                        return Err(ReplicationError::transport(operation, e));
                    }
                    warn!(operation, error = %e, attempt, "transport fault, backing off");
                }
            }
            crate::metrics::record_list_retry(operation);
            tokio::time::sleep(backoff_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

impl ReplicationLog for HttpReplicationLog {
    fn list_events<'a>(
        &'a self,
        namespace: &'a str,
        bucket: &'a TimeBucket,
    ) -> BoxFuture<'a, Vec<BlobMutationEvent>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/v1/replication-log/blobs/{}/{}",
                self.base_url, namespace, bucket
            );
            let response = self.get_with_retries("list_events", &url).await?;

            match response.status() {
                StatusCode::OK => {
                    let body: ListEventsResponse = response
                        .json()
                        .await
                        .map_err(|e| ReplicationError::transport("list_events", e))?;
                    debug!(namespace, %bucket, count = body.events.len(), "listed bucket");
                    Ok(body.events)
                }
                StatusCode::BAD_REQUEST => {
                    let problem: ProblemBody = response
                        .json()
                        .await
                        .map_err(|e| ReplicationError::transport("list_events", e))?;
                    match (problem.problem_type.as_str(), problem.snapshot) {
                        ("UseSnapshot", Some(snapshot)) => {
                            Err(ReplicationError::NeedsSnapshot { snapshot })
                        }
                        ("NoDataFound", _) => Err(ReplicationError::BucketExpired {
                            bucket: bucket.to_string(),
                        }),
                        (other, _) => Err(ReplicationError::transport_msg(
                            "list_events",
                            format!("unrecognized problem type {:?}", other),
                        )),
                    }
                }
                StatusCode::NOT_FOUND => Err(ReplicationError::NamespaceUnknown {
                    namespace: namespace.to_string(),
                }),
                status => Err(ReplicationError::transport_msg(
                    "list_events",
                    format!("unexpected status {}", status),
                )),
            }
        })
    }

    fn get_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
    ) -> BoxFuture<'a, Option<ReplicatorState>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/v1/replication-log/state/{}/{}",
                self.base_url, namespace, replicator
            );
            let response = self.get_with_retries("get_state", &url).await?;

            match response.status() {
                StatusCode::OK => {
                    let state: ReplicatorState = response
                        .json()
                        .await
                        .map_err(|e| ReplicationError::transport("get_state", e))?;
                    Ok(Some(state))
                }
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(ReplicationError::transport_msg(
                    "get_state",
                    format!("unexpected status {}", status),
                )),
            }
        })
    }

    fn set_state<'a>(
        &'a self,
        namespace: &'a str,
        replicator: &'a str,
        state: &'a ReplicatorState,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let url = format!(
                "{}/api/v1/replication-log/state/{}/{}",
                self.base_url, namespace, replicator
            );
            let response = self
                .client
                .put(&url)
                .json(state)
                .send()
                .await
                .map_err(|e| ReplicationError::transport("set_state", e))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(ReplicationError::transport_msg(
                    "set_state",
                    format!("unexpected status {}", response.status()),
                ))
            }
        })
    }

    fn insert_add_event<'a>(
        &'a self,
        namespace: &'a str,
        blob_id: &'a str,
        bucket_hint: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let url = format!(
                "{}/api/v1/replication-log/blobs/{}/{}",
                self.base_url, namespace, blob_id
            );
            let mut request = self.client.post(&url);
            if let Some(hint) = bucket_hint {
                request = request.query(&[("bucket_hint", hint)]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ReplicationError::transport("insert_add_event", e))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(ReplicationError::transport_msg(
                    "insert_add_event",
                    format!("unexpected status {}", response.status()),
                ))
            }
        })
    }
}

/// Source of blob content, keyed by namespace and content hash.
pub trait BlobSource: Send + Sync {
    fn fetch<'a>(&'a self, namespace: &'a str, blob_id: &'a str) -> BoxFuture<'a, Bytes>;
}

impl<T: BlobSource + ?Sized> BlobSource for std::sync::Arc<T> {
    fn fetch<'a>(&'a self, namespace: &'a str, blob_id: &'a str) -> BoxFuture<'a, Bytes> {
        (**self).fetch(namespace, blob_id)
    }
}

/// Blob content GETs against the remote store.
///
/// `GET {base}/api/v1/blobs/{ns}/{blob_id}`. The response must carry a
/// Content-Length header and the body must match it; a short read is a
/// transport error, never silently stored.
pub struct HttpBlobSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl BlobSource for HttpBlobSource {
    fn fetch<'a>(&'a self, namespace: &'a str, blob_id: &'a str) -> BoxFuture<'a, Bytes> {
        Box::pin(async move {
            let url = format!("{}/api/v1/blobs/{}/{}", self.base_url, namespace, blob_id);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ReplicationError::transport("fetch_blob", e))?;

            match response.status() {
                StatusCode::OK => {
                    let expected = response.content_length().ok_or_else(|| {
                        ReplicationError::transport_msg(
                            "fetch_blob",
                            format!("missing content-length for blob {}", blob_id),
                        )
                    })?;
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| ReplicationError::transport("fetch_blob", e))?;
                    if body.len() as u64 != expected {
                        return Err(ReplicationError::transport_msg(
                            "fetch_blob",
                            format!(
                                "short read for blob {}: got {} bytes, expected {}",
                                blob_id,
                                body.len(),
                                expected
                            ),
                        ));
                    }
                    Ok(body)
                }
                StatusCode::NOT_FOUND => Err(ReplicationError::BlobMissing {
                    blob_id: blob_id.to_string(),
                }),
                status => Err(ReplicationError::transport_msg(
                    "fetch_blob",
                    format!("unexpected status {} for blob {}", status, blob_id),
                )),
            }
        })
    }
}
