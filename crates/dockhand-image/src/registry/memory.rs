//! Deterministic in-process registry.
//!
//! Lets tests exercise the manager's classification and concurrency
//! handling without network access.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{FetchedImage, RegistryClient};
use crate::error::{ImageError, Result};
use crate::hash;
use crate::reference::{ImageReference, Target};

#[derive(Debug, Default)]
struct State {
    images: HashMap<String, FetchedImage>,
    unreachable_hosts: HashSet<String>,
    pending_failures: HashMap<String, u32>,
    fetches: HashMap<String, usize>,
    latency: Duration,
}

/// Registry whose contents are scripted by the caller.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `reference` fetchable with the given size.
    ///
    /// The digest is derived from the reference and size, so republishing
    /// with a different size changes it.
    pub fn publish(&self, reference: &ImageReference, size_bytes: u64) -> FetchedImage {
        let seed = format!("{reference}#{size_bytes}");
        let image = FetchedImage {
            digest: hash::digest_bytes(seed.as_bytes()),
            size_bytes,
        };
        let _ = self
            .lock()
            .images
            .insert(reference.to_string(), image.clone());
        image
    }

    /// Makes every fetch against `host` fail as unreachable.
    pub fn mark_unreachable(&self, host: &str) {
        let _ = self.lock().unreachable_hosts.insert(host.to_string());
    }

    /// Makes the next `count` fetches of `reference` fail transiently.
    pub fn fail_next(&self, reference: &ImageReference, count: u32) {
        let _ = self
            .lock()
            .pending_failures
            .insert(reference.to_string(), count);
    }

    /// Delays every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of fetches attempted for `reference`.
    pub fn fetch_count(&self, reference: &ImageReference) -> usize {
        self.lock()
            .fetches
            .get(&reference.to_string())
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, reference: &ImageReference) -> Result<FetchedImage> {
        let key = reference.to_string();
        let mut state = self.lock();

        if state.unreachable_hosts.contains(reference.registry()) {
            return Err(ImageError::RegistryUnreachable {
                host: reference.registry().to_string(),
                message: "no such host".into(),
            });
        }
        if let Some(remaining) = state.pending_failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ImageError::Registry {
                    reference: key,
                    message: "503 Service Unavailable".into(),
                    transient: true,
                });
            }
        }

        let found = match reference.target() {
            Target::Tag(_) => state.images.get(&key).cloned(),
            Target::Digest(digest) => state
                .images
                .iter()
                .find(|(published, image)| {
                    image.digest == *digest
                        && published.parse::<ImageReference>().is_ok_and(|p| {
                            p.registry() == reference.registry()
                                && p.repository() == reference.repository()
                        })
                })
                .map(|(_, image)| image.clone()),
        };
        found.ok_or(ImageError::ImageNotFound { reference: key })
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn fetch_image(&self, reference: &ImageReference) -> Result<FetchedImage> {
        let latency = {
            let mut state = self.lock();
            *state.fetches.entry(reference.to_string()).or_default() += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        tracing::debug!(reference = %reference, "in-memory registry fetch");
        self.resolve(reference)
    }
}
