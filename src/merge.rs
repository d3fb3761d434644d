// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! N-way merger (§4.5): combines a contiguous run of segments into one,
//! honouring overwrite/delete shadowing both within and outside the merge
//! window. Used by both memory-merge and file-merge (§4.8).
//!
//! The merge loop itself is a k-way heap merge over each source's sorted
//! item stream using the `interval-heap` crate, merging `(hash, id)`
//! postings rather than versioned key-value records.

use crate::item::{Item, SegmentId};
use crate::segment::Segment;
use interval_heap::IntervalHeap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// The result of merging a contiguous run of segments: everything needed
/// to build either a new `MemorySegment` or a new `FileSegment` from it.
pub struct MergedSegment {
    /// Identity and merge lineage of the merged segment (§3).
    pub id: SegmentId,
    /// Highest oplog commit id folded into the merge.
    pub max_commit_id: u64,
    /// Document liveness map across every source, later-wins.
    pub docs: BTreeMap<u32, bool>,
    /// Attribute map across every source, later-wins.
    pub attributes: BTreeMap<String, u64>,
    /// Every surviving posting, sorted by `(hash, id)`.
    pub items: Vec<Item>,
}

#[derive(Eq, PartialEq)]
struct HeapItem(Item, usize);

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges a contiguous run of `sources` (ascending version order) into one
/// [`MergedSegment`].
///
/// `has_newer_version(doc_id, version)` must answer whether some segment
/// *outside* the merge window, with a version strictly greater than
/// `version`, has touched `doc_id` — callers resolve this against a
/// consistent snapshot of whichever segment list(s) sit above the window
/// (§4.8, §9 "shadowing lookups across lists").
///
/// # Errors
///
/// Propagates any I/O/decode error encountered while reading a source's
/// postings (relevant for file segments, which decode blocks lazily).
pub fn merge<S: Segment>(
    sources: &[Arc<S>],
    has_newer_version: impl Fn(u32, u64) -> bool,
) -> crate::Result<MergedSegment> {
    assert!(sources.len() >= 2, "a merge needs at least two sources");

    #[allow(clippy::expect_used, reason = "checked non-empty above")]
    let first_id = sources.first().expect("non-empty").id();
    #[allow(clippy::expect_used, reason = "checked non-empty above")]
    let last_id = sources.last().expect("non-empty").id();
    let id = SegmentId::merge(first_id, last_id);

    let max_commit_id = sources.iter().map(|s| s.max_commit_id()).max().unwrap_or(0);

    // Attributes: later source (by position, i.e. by version) wins.
    let mut attributes = BTreeMap::new();
    for source in sources {
        for (key, value) in source.attributes() {
            attributes.insert(key.clone(), *value);
        }
    }

    // `seen_from_later[i]` is the set of doc ids touched by any source
    // strictly after index `i` within the window: a later source in the
    // same window always supersedes an earlier one's postings for that
    // doc, regardless of insert/delete.
    let n = sources.len();
    let mut seen_from_later: Vec<HashSet<u32>> = vec![HashSet::new(); n];
    let mut running = HashSet::new();
    for i in (0..n).rev() {
        seen_from_later[i] = running.clone();
        running.extend(sources[i].docs().keys().copied());
    }

    // Merged docs map: fold oldest to newest (later overwrites earlier),
    // then drop any entry a segment *outside* the window still shadows —
    // that's the only way a tombstone or overwrite record can ever be
    // dropped (§9 "tombstone propagation during merges").
    let mut docs = BTreeMap::new();
    for source in sources {
        for (&doc_id, &live) in source.docs() {
            docs.insert(doc_id, live);
        }
    }
    docs.retain(|&doc_id, _| !has_newer_version(doc_id, id.max_version()));

    let item_lists: Vec<Vec<Item>> = sources
        .iter()
        .map(|s| s.all_items())
        .collect::<crate::Result<Vec<_>>>()?;
    let mut cursors = vec![0usize; n];

    let mut heap: IntervalHeap<HeapItem> = IntervalHeap::with_capacity(n);
    for (idx, list) in item_lists.iter().enumerate() {
        if let Some(&item) = list.first() {
            heap.push(HeapItem(item, idx));
            cursors[idx] = 1;
        }
    }

    let mut items = Vec::new();
    while let Some(HeapItem(item, idx)) = heap.pop_min() {
        if let Some(&next) = item_lists[idx].get(cursors[idx]) {
            heap.push(HeapItem(next, idx));
            cursors[idx] += 1;
        }

        let shadowed = seen_from_later[idx].contains(&item.id)
            || has_newer_version(item.id, sources[idx].id().version);

        if !shadowed {
            items.push(item);
        }
    }

    Ok(MergedSegment {
        id,
        max_commit_id,
        docs,
        attributes,
        items,
    })
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
    fn merges_disjoint_inserts() {
        let a = segment(1, vec![Change::Insert { id: 1, hashes: vec![1, 2] }]);
        let b = segment(2, vec![Change::Insert { id: 2, hashes: vec![3, 4] }]);

        let merged = merge(&[a, b], |_, _| false).unwrap();
        assert_eq!(4, merged.items.len());
        assert_eq!(SegmentId { version: 1, included_merges: 1 }, merged.id);
    }

    #[test]
    fn later_source_shadows_earlier_within_window() {
        let a = segment(1, vec![Change::Insert { id: 1, hashes: vec![1, 2, 3] }]);
        let b = segment(2, vec![Change::Insert { id: 1, hashes: vec![100] }]);

        let merged = merge(&[a, b], |_, _| false).unwrap();
        assert_eq!(vec![Item::new(100, 1)], merged.items);
        assert_eq!(Some(&true), merged.docs.get(&1));
    }

    #[test]
    fn tombstone_within_window_drops_items() {
        let a = segment(1, vec![Change::Insert { id: 1, hashes: vec![1] }]);
        let b = segment(2, vec![Change::Delete { id: 1 }]);

        let merged = merge(&[a, b], |_, _| false).unwrap();
        assert!(merged.items.is_empty());
        assert_eq!(Some(&false), merged.docs.get(&1));
    }

    #[test]
    fn shadowed_by_segment_outside_window_is_suppressed() {
        let a = segment(1, vec![Change::Insert { id: 1, hashes: vec![1, 2] }]);
        let b = segment(2, vec![Change::Insert { id: 2, hashes: vec![3] }]);

        // Pretend a segment with version > 1 (outside the window) still
        // touches doc 1 — its postings in `a` must be suppressed.
        let merged = merge(&[a, b], |doc_id, version| doc_id == 1 && version == 1).unwrap();
        assert!(!merged.items.iter().any(|i| i.id == 1));
        assert!(merged.items.iter().any(|i| i.id == 2));
        assert!(!merged.docs.contains_key(&1));
    }

    #[test]
    fn attributes_later_source_wins() {
        let a = segment(1, vec![Change::SetAttribute { name: "k".into(), value: 1 }]);
        let b = segment(2, vec![Change::SetAttribute { name: "k".into(), value: 2 }]);

        let merged = merge(&[a, b], |_, _| false).unwrap();
        assert_eq!(Some(&2), merged.attributes.get("k"));
    }
}
