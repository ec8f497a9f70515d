//! Local image store index.
//!
//! Maps normalized references to the records of images present on this
//! node. The map lives behind a single reader/writer lock; when opened on a
//! data directory every mutation is also mirrored to a JSON catalog so the
//! index survives restarts.
//!
//! Mutations are serialized by a separate writer mutex. A catalog-backed
//! mutation is applied to a copy of the map, written to disk, and only then
//! swapped in, so readers never wait on disk I/O and never see a change the
//! catalog does not hold.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dockhand_common::constants::{CATALOG_FILE, IMAGES_DIR};
use dockhand_common::types::Digest;
use serde::{Deserialize, Serialize};

use crate::error::{ImageError, Result};
use crate::reference::ImageReference;

/// Metadata of an image present on this node.
///
/// Records are replaced wholesale on re-pull, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Reference the image was pulled by.
    pub reference: ImageReference,
    /// Manifest digest reported by the registry.
    pub digest: Digest,
    /// Total size of config and layers in bytes.
    pub size_bytes: u64,
    /// When the pull completed.
    pub pulled_at: DateTime<Utc>,
}

/// Image index, optionally backed by a catalog file.
#[derive(Debug, Default)]
pub struct ImageIndex {
    entries: RwLock<Entries>,
    writer: Mutex<()>,
    catalog_path: Option<PathBuf>,
}

type Entries = HashMap<String, ImageRecord>;

impl ImageIndex {
    /// Creates an empty index with no on-disk backing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the catalog under `data_dir`, creating its directory if needed.
    ///
    /// A missing catalog yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the directory cannot be
    /// created or an existing catalog cannot be read or parsed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(IMAGES_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ImageError::index_io(&dir, &e))?;
        let catalog_path = dir.join(CATALOG_FILE);

        let entries = if catalog_path.exists() {
            load_catalog(&catalog_path)?
        } else {
            HashMap::new()
        };
        tracing::info!(
            path = %catalog_path.display(),
            images = entries.len(),
            "opened image catalog"
        );

        Ok(Self {
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
            catalog_path: Some(catalog_path),
        })
    }

    /// Path of the backing catalog, if any.
    #[must_use]
    pub fn catalog_path(&self) -> Option<&Path> {
        self.catalog_path.as_deref()
    }

    /// Inserts a record, returning the one it replaced.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the catalog cannot be
    /// written; the in-memory map is left as it was.
    pub fn insert(&self, record: ImageRecord) -> Result<Option<ImageRecord>> {
        let key = record.reference.to_string();
        let previous = self
            .mutate(|entries| Some(entries.insert(key.clone(), record)))?
            .flatten();
        tracing::debug!(reference = %key, replaced = previous.is_some(), "index insert");
        Ok(previous)
    }

    /// Looks up the record for a reference.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the lock is poisoned.
    pub fn lookup(&self, reference: &ImageReference) -> Result<Option<ImageRecord>> {
        Ok(self.read()?.get(&reference.to_string()).cloned())
    }

    /// Deletes the record for a reference, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the catalog cannot be
    /// written; the record stays in place.
    pub fn delete(&self, reference: &ImageReference) -> Result<Option<ImageRecord>> {
        let key = reference.to_string();
        let removed = self.mutate(|entries| entries.remove(&key))?;
        if removed.is_some() {
            tracing::debug!(reference = %key, "index delete");
        }
        Ok(removed)
    }

    /// References of every present image, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<ImageReference>> {
        Ok(self
            .read()?
            .values()
            .map(|record| record.reference.clone())
            .collect())
    }

    /// Every present record, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the lock is poisoned.
    pub fn records(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.read()?.values().cloned().collect())
    }

    /// Number of present images.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Whether no image is present.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::IndexAccessFailure` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>> {
        self.entries.read().map_err(|_| ImageError::poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>> {
        self.entries.write().map_err(|_| ImageError::poisoned())
    }

    /// Applies `apply` under the writer mutex. `apply` returns `None` when
    /// it left the map untouched, in which case nothing is persisted.
    fn mutate<T>(&self, apply: impl FnOnce(&mut Entries) -> Option<T>) -> Result<Option<T>> {
        let _writer = self.writer.lock().map_err(|_| ImageError::poisoned())?;
        let Some(path) = &self.catalog_path else {
            return Ok(apply(&mut *self.write()?));
        };

        let mut next = self.read()?.clone();
        let Some(out) = apply(&mut next) else {
            return Ok(None);
        };
        persist(path, &next)?;
        *self.write()? = next;
        Ok(Some(out))
    }
}

/// Rewrites the catalog through a temporary file and rename.
fn persist(path: &Path, entries: &Entries) -> Result<()> {
    let mut records: Vec<&ImageRecord> = entries.values().collect();
    records.sort_by_key(|r| r.reference.to_string());

    let json = serde_json::to_string_pretty(&records).map_err(|e| {
        ImageError::IndexAccessFailure {
            message: format!("cannot serialize catalog: {e}"),
        }
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| ImageError::index_io(&tmp, &e))?;
    std::fs::rename(&tmp, path).map_err(|e| ImageError::index_io(path, &e))?;
    Ok(())
}

fn load_catalog(path: &Path) -> Result<Entries> {
    let content = std::fs::read_to_string(path).map_err(|e| ImageError::index_io(path, &e))?;
    let records: Vec<ImageRecord> =
        serde_json::from_str(&content).map_err(|e| ImageError::IndexAccessFailure {
            message: format!("corrupt catalog {}: {e}", path.display()),
        })?;
    Ok(records
        .into_iter()
        .map(|r| (r.reference.to_string(), r))
        .collect())
}
