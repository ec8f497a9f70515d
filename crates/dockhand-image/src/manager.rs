//! Image manager that orchestrates pull, presence, listing, and removal.
//!
//! The manager owns error classification but not retry: a single `pull`
//! reports the registry's verdict as-is, and [`ImageManager::pull_with_retry`]
//! layers a [`RetryPolicy`] on top for callers that want one.
//!
//! Concurrent pulls of one reference are coalesced. The first caller
//! becomes the leader and talks to the registry; later callers wait on a
//! watch channel and receive the leader's outcome. A leader that is dropped
//! mid-fetch publishes nothing, and a waiting caller takes over.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ImageError, Result};
use crate::gc::{self, GcPolicy, GcReport};
use crate::index::{ImageIndex, ImageRecord};
use crate::reference::ImageReference;
use crate::registry::RegistryClient;
use crate::retry::{PullReport, RetryPolicy};

type Outcome = Option<Result<ImageRecord>>;
type InFlight = Mutex<HashMap<String, watch::Receiver<Outcome>>>;

struct Shared {
    index: ImageIndex,
    registry: Arc<dyn RegistryClient>,
    in_flight: InFlight,
}

/// Node image manager. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ImageManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageManager")
            .field("index", &self.shared.index)
            .finish_non_exhaustive()
    }
}

enum Role {
    Leader(watch::Sender<Outcome>),
    Follower(watch::Receiver<Outcome>),
}

/// Removes a leader's in-flight entry however its pull ends.
struct LeaderGuard<'a> {
    in_flight: &'a InFlight,
    key: String,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ImageManager {
    /// Creates a manager over an index and a registry client.
    #[must_use]
    pub fn new(index: ImageIndex, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            shared: Arc::new(Shared {
                index,
                registry,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Pulls an image with a single registry attempt.
    ///
    /// On success the record is inserted, replacing any earlier record for
    /// the same reference.
    ///
    /// # Errors
    ///
    /// Returns the registry client's classified error unchanged, or
    /// `IndexAccessFailure` if the record cannot be stored.
    pub async fn pull(&self, reference: &ImageReference) -> Result<ImageRecord> {
        let key = reference.to_string();
        loop {
            match self.join_or_lead(&key) {
                Role::Follower(mut rx) => {
                    tracing::debug!(reference = %key, "waiting on in-flight pull");
                    if let Ok(outcome) = rx.wait_for(Option::is_some).await {
                        if let Some(outcome) = outcome.as_ref() {
                            return outcome.clone();
                        }
                    }
                    tracing::debug!(reference = %key, "in-flight pull abandoned, retrying");
                }
                Role::Leader(tx) => {
                    let _guard = LeaderGuard {
                        in_flight: &self.shared.in_flight,
                        key: key.clone(),
                    };
                    let outcome = self.fetch_and_record(reference).await;
                    let _ = tx.send_replace(Some(outcome.clone()));
                    return outcome;
                }
            }
        }
    }

    /// Pulls like [`pull`](Self::pull) but gives up at `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::Cancelled` if the deadline passes first; the
    /// index is then left untouched.
    pub async fn pull_until(
        &self,
        reference: &ImageReference,
        deadline: Instant,
    ) -> Result<ImageRecord> {
        let cancelled = || {
            tracing::warn!(reference = %reference, "pull cancelled at deadline");
            Err(ImageError::Cancelled {
                reference: reference.to_string(),
            })
        };
        // timeout_at polls the pull once before looking at the clock.
        if Instant::now() >= deadline {
            return cancelled();
        }
        tokio::time::timeout_at(deadline, self.pull(reference))
            .await
            .unwrap_or_else(|_| cancelled())
    }

    /// Pulls, retrying retryable failures per `policy`.
    ///
    /// Terminal failures are returned after the first attempt.
    ///
    /// # Errors
    ///
    /// Returns the first terminal error, or the last retryable error once
    /// the policy's timeout would be exceeded by another wait.
    pub async fn pull_with_retry(
        &self,
        reference: &ImageReference,
        policy: &RetryPolicy,
    ) -> Result<PullReport> {
        let started = Instant::now();
        let deadline = started.checked_add(policy.timeout);
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let outcome = match deadline {
                Some(deadline) => self.pull_until(reference, deadline).await,
                None => self.pull(reference).await,
            };
            let err = match outcome {
                Ok(record) => return Ok(PullReport { record, attempts }),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let next_attempt = Instant::now().checked_add(policy.interval);
            let out_of_time = match (next_attempt, deadline) {
                (Some(next), Some(deadline)) => next >= deadline,
                _ => true,
            };
            if out_of_time {
                tracing::warn!(reference = %reference, attempts, error = %err, "giving up on pull");
                return Err(err);
            }
            tracing::warn!(
                reference = %reference,
                attempt = attempts,
                error = %err,
                retry_in = ?policy.interval,
                "pull failed, retrying"
            );
            tokio::time::sleep(policy.interval).await;
        }
    }

    /// Whether the image is present locally.
    ///
    /// # Errors
    ///
    /// Returns `IndexAccessFailure` only; absence is `Ok(false)`.
    pub fn present(&self, reference: &ImageReference) -> Result<bool> {
        Ok(self.shared.index.lookup(reference)?.is_some())
    }

    /// References of every present image, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `IndexAccessFailure` if the index cannot be read.
    pub fn list(&self) -> Result<Vec<ImageReference>> {
        self.shared.index.snapshot()
    }

    /// Full records of every present image, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `IndexAccessFailure` if the index cannot be read.
    pub fn records(&self) -> Result<Vec<ImageRecord>> {
        self.shared.index.records()
    }

    /// Record of a present image, if any.
    ///
    /// # Errors
    ///
    /// Returns `IndexAccessFailure` if the index cannot be read.
    pub fn inspect(&self, reference: &ImageReference) -> Result<Option<ImageRecord>> {
        self.shared.index.lookup(reference)
    }

    /// Removes a present image and returns its record.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundLocally` if the image is absent, which includes
    /// removing the same image twice.
    pub fn remove(&self, reference: &ImageReference) -> Result<ImageRecord> {
        match self.shared.index.delete(reference)? {
            Some(record) => {
                tracing::info!(reference = %reference, digest = %record.digest, "image removed");
                Ok(record)
            }
            None => Err(ImageError::NotFoundLocally {
                reference: reference.to_string(),
            }),
        }
    }

    /// Evicts the oldest unpinned images once usage passes the policy's
    /// high threshold.
    ///
    /// Images removed concurrently by someone else are skipped.
    ///
    /// # Errors
    ///
    /// Returns `IndexAccessFailure` if the index cannot be read or written.
    pub fn collect_garbage(&self, policy: &GcPolicy) -> Result<GcReport> {
        let records = self.shared.index.records()?;
        let mut report = GcReport::default();
        for victim in gc::plan_eviction(&records, policy) {
            if let Some(removed) = self.shared.index.delete(&victim.reference)? {
                tracing::info!(
                    reference = %removed.reference,
                    size = removed.size_bytes,
                    "evicted image"
                );
                report.freed_bytes = report.freed_bytes.saturating_add(removed.size_bytes);
                report.removed.push(removed);
            }
        }
        report.remaining_bytes = gc::total_size(&self.shared.index.records()?);
        tracing::info!(
            removed = report.removed.len(),
            freed = report.freed_bytes,
            remaining = report.remaining_bytes,
            "garbage collection finished"
        );
        Ok(report)
    }

    fn join_or_lead(&self, key: &str) -> Role {
        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = in_flight.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        let _ = in_flight.insert(key.to_string(), rx);
        Role::Leader(tx)
    }

    async fn fetch_and_record(&self, reference: &ImageReference) -> Result<ImageRecord> {
        tracing::info!(reference = %reference, "pulling image");
        let fetched = self
            .shared
            .registry
            .fetch_image(reference)
            .await
            .inspect_err(|e| {
                tracing::warn!(reference = %reference, kind = %e.kind(), error = %e, "pull failed");
            })?;

        let record = ImageRecord {
            reference: reference.clone(),
            digest: fetched.digest,
            size_bytes: fetched.size_bytes,
            pulled_at: Utc::now(),
        };
        let previous = self.shared.index.insert(record.clone())?;
        match previous {
            Some(prev) if prev.digest == record.digest => {
                tracing::info!(reference = %reference, digest = %record.digest, "image up to date");
            }
            Some(prev) => tracing::info!(
                reference = %reference,
                old = %prev.digest,
                new = %record.digest,
                "image updated"
            ),
            None => tracing::info!(
                reference = %reference,
                digest = %record.digest,
                size = record.size_bytes,
                "image pulled"
            ),
        }
        Ok(record)
    }
}
