// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Copy-on-write segment list (§4.4): an immutable, reference-counted,
//! ordered array of segment handles. Every mutation builds a new array and
//! publishes it with one atomic swap; a reader that grabbed a snapshot
//! keeps seeing it untouched regardless of later mutations.

use crate::item::SegmentId;
use crate::search::{Deadline, SearchResults};
use crate::segment::Segment;
use std::sync::{Arc, RwLock};

/// A snapshot of a [`SegmentList`] at one point in time: an ordered,
/// independently-owned array of segment handles.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

pub struct SegmentList<T> {
    inner: RwLock<Snapshot<T>>,
}

impl<T> Default for SegmentList<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: Segment> SegmentList<T> {
    #[must_use]
    pub fn new(segments: Vec<Arc<T>>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(segments)),
        }
    }

    /// Acquires a stable snapshot of the current list; independent of any
    /// later mutation.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<T> {
        #[allow(clippy::expect_used, reason = "poisoning means a prior panic corrupted state")]
        self.inner.read().expect("lock is poisoned").clone()
    }

    /// Appends `segment`, publishing a new snapshot. Used by the
    /// checkpoint worker and by `update` (§4.8).
    pub fn append(&self, segment: Arc<T>) {
        self.mutate(|segments| segments.push(segment));
    }

    /// Replaces the elements with indices `range` with a single segment,
    /// publishing a new snapshot. Used by merge (§4.5).
    pub fn replace_range(&self, range: std::ops::Range<usize>, segment: Arc<T>) {
        self.mutate(|segments| {
            segments.splice(range, std::iter::once(segment));
        });
    }

    /// Drops the first `count` elements, publishing a new snapshot. Used
    /// by checkpoint to retire the memory segment it just promoted.
    pub fn drop_head(&self, count: usize) {
        self.mutate(|segments| {
            segments.drain(0..count);
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<Arc<T>>)) {
        #[allow(clippy::expect_used, reason = "poisoning means a prior panic corrupted state")]
        let mut guard = self.inner.write().expect("lock is poisoned");
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Number of segments currently published.
    #[must_use]
    pub fn count(&self) -> usize {
        self.snapshot().len()
    }

    /// Ids of every currently published segment, head to tail.
    #[must_use]
    pub fn ids(&self) -> Vec<SegmentId> {
        self.snapshot().iter().map(|s| s.id()).collect()
    }

    /// Highest `max_commit_id` among published segments, or 0 if empty.
    #[must_use]
    pub fn max_commit_id(&self) -> u64 {
        self.snapshot().iter().map(|s| s.max_commit_id()).max().unwrap_or(0)
    }

    /// Searches every segment in list order, accumulating matches into
    /// `results`. Order matters to callers that search multiple lists:
    /// whichever list is searched last wins ties on version (§4.8 calls
    /// file list then memory list, since memory segments are always
    /// newer).
    pub fn search(
        &self,
        sorted_hashes: &[u32],
        results: &mut SearchResults,
        deadline: &Deadline,
    ) -> crate::Result<()> {
        for segment in self.snapshot().iter() {
            segment.search(sorted_hashes, results, deadline)?;
        }
        Ok(())
    }

    /// True if any segment with `version` strictly greater than `version`
    /// has `doc_id` in its `docs` map (live or tombstoned) — i.e. a later
    /// segment has touched this document at all, regardless of whether it
    /// produced a hash match.
    #[must_use]
    pub fn has_newer_version(&self, doc_id: u32, version: u64) -> bool {
        let snapshot = self.snapshot();
        for segment in snapshot.iter().rev() {
            if segment.id().version <= version {
                break;
            }
            if segment.docs().contains_key(&doc_id) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::memory_segment::MemorySegment;
    use test_log::test;

    fn segment(version: u64, changes: Vec<Change>) -> Arc<MemorySegment> {
        Arc::new(MemorySegment::build(
            SegmentId { version, included_merges: 0 },
            version,
            &changes,
        ))
    }

    #[test]
    fn append_is_visible_to_new_snapshots_only() {
        let list: SegmentList<MemorySegment> = SegmentList::default();
        let before = list.snapshot();
        list.append(segment(1, vec![Change::Insert { id: 1, hashes: vec![1] }]));
        assert_eq!(0, before.len());
        assert_eq!(1, list.snapshot().len());
    }

    #[test]
    fn has_newer_version_detects_overwrite() {
        let list: SegmentList<MemorySegment> = SegmentList::default();
        list.append(segment(1, vec![Change::Insert { id: 1, hashes: vec![1, 2, 3] }]));
        list.append(segment(2, vec![Change::Insert { id: 1, hashes: vec![100] }]));

        assert!(list.has_newer_version(1, 1));
        assert!(!list.has_newer_version(1, 2));
        assert!(!list.has_newer_version(2, 1));
    }

    #[test]
    fn drop_head_retires_oldest() {
        let list: SegmentList<MemorySegment> = SegmentList::default();
        list.append(segment(1, vec![]));
        list.append(segment(2, vec![]));
        list.drop_head(1);

        let remaining = list.ids();
        assert_eq!(vec![SegmentId { version: 2, included_merges: 0 }], remaining);
    }

    #[test]
    fn replace_range_collapses_into_one_segment() {
        let list: SegmentList<MemorySegment> = SegmentList::default();
        list.append(segment(1, vec![]));
        list.append(segment(2, vec![]));
        list.append(segment(3, vec![]));

        let merged = segment(1, vec![]);
        list.replace_range(0..2, merged);

        assert_eq!(2, list.count());
    }
}
