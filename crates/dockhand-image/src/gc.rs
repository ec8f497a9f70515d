//! Size-based image garbage collection.
//!
//! Once the images on a node exceed the high threshold, the oldest pulls are
//! evicted until usage falls to the low threshold.

use crate::index::ImageRecord;
use crate::reference::ImageReference;

/// Thresholds that trigger and bound an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcPolicy {
    /// Total size above which collection starts.
    pub high_threshold_bytes: u64,
    /// Total size collection tries to reach.
    pub low_threshold_bytes: u64,
    /// Images never evicted.
    pub pinned: Vec<ImageReference>,
}

/// Result of a collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Records evicted, oldest first.
    pub removed: Vec<ImageRecord>,
    /// Bytes released by the evictions.
    pub freed_bytes: u64,
    /// Total size of the images left.
    pub remaining_bytes: u64,
}

/// Chooses which records to evict, oldest pull first.
///
/// Returns nothing while usage is at or below the high threshold. May stop
/// above the low threshold when only pinned images remain.
#[must_use]
pub fn plan_eviction(records: &[ImageRecord], policy: &GcPolicy) -> Vec<ImageRecord> {
    let mut total = total_size(records);
    if total <= policy.high_threshold_bytes {
        return Vec::new();
    }

    let mut candidates: Vec<&ImageRecord> = records
        .iter()
        .filter(|r| !policy.pinned.contains(&r.reference))
        .collect();
    candidates.sort_by_key(|r| r.pulled_at);

    let mut evict = Vec::new();
    for record in candidates {
        if total <= policy.low_threshold_bytes {
            break;
        }
        total = total.saturating_sub(record.size_bytes);
        evict.push(record.clone());
    }
    evict
}

/// Sum of record sizes, saturating at `u64::MAX`.
#[must_use]
pub fn total_size(records: &[ImageRecord]) -> u64 {
    records
        .iter()
        .fold(0, |total, r| total.saturating_add(r.size_bytes))
}
