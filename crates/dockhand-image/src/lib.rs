//! # dockhand-image
//!
//! Container image management for a single node.
//!
//! Handles:
//! - **References**: Parsing and normalizing `[registry/]repo[:tag|@digest]`.
//! - **Index**: The set of locally present images, mirrored to a JSON catalog.
//! - **Registry**: The client boundary, with an HTTP implementation and an
//!   in-memory one for tests.
//! - **Manager**: Pull, presence, listing, and removal with classified errors.
//! - **Retry**: Caller-side retry policy for flaky registries.
//! - **GC**: Size-threshold eviction of the oldest images.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod gc;
pub mod hash;
pub mod index;
pub mod manager;
pub mod reference;
pub mod registry;
pub mod retry;

pub use error::{ImageError, ImageErrorKind};
pub use index::{ImageIndex, ImageRecord};
pub use manager::ImageManager;
pub use reference::ImageReference;
