//! Registry client boundary.
//!
//! The manager only needs to know an image's digest and size; how those are
//! obtained is up to the injected [`RegistryClient`].

mod http;
mod memory;

use async_trait::async_trait;
use dockhand_common::types::Digest;

pub use self::http::HttpRegistryClient;
pub use self::memory::InMemoryRegistry;
use crate::error::Result;
use crate::reference::ImageReference;

/// What a successful fetch reports about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// Manifest digest the reference resolved to.
    pub digest: Digest,
    /// Total size of config and layers in bytes.
    pub size_bytes: u64,
}

/// Capability to fetch images from a remote registry.
///
/// Implementations classify their failures into
/// [`ImageError`](crate::error::ImageError) variants; the manager passes
/// them through untouched.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches the image named by `reference`.
    ///
    /// # Errors
    ///
    /// `RegistryUnreachable` when the host cannot be contacted,
    /// `ImageNotFound` when the registry does not know the image,
    /// `AccessDenied` or `Registry` for other refusals.
    async fn fetch_image(&self, reference: &ImageReference) -> Result<FetchedImage>;
}
