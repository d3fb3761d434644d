// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shared behaviour of [`crate::memory_segment::MemorySegment`] and
//! [`crate::file_segment::FileSegment`], abstracted so [`crate::segment_list`]
//! and the merger (§4.5) can treat either tier uniformly.

use crate::item::{Item, SegmentId};
use crate::search::{Deadline, SearchResults};
use std::collections::BTreeMap;

/// Common surface both segment kinds expose to the list, the merger, and
/// the search path.
pub trait Segment {
    /// This segment's identity and merge lineage (§3).
    fn id(&self) -> SegmentId;

    /// The highest oplog commit id folded into this segment.
    fn max_commit_id(&self) -> u64;

    /// Document liveness map: `true` for a live insert, `false` for a
    /// tombstone.
    fn docs(&self) -> &BTreeMap<u32, bool>;

    /// Free-form `u64` attributes attached via `set_attribute` changes.
    fn attributes(&self) -> &BTreeMap<String, u64>;

    /// Number of postings held by this segment.
    fn size(&self) -> usize;

    /// Searches `sorted_hashes` (ascending, deduplicated) against this
    /// segment, recording matches into `results`. Returns `Err(Timeout)`
    /// if `deadline` expires mid-scan.
    fn search(
        &self,
        sorted_hashes: &[u32],
        results: &mut SearchResults,
        deadline: &Deadline,
    ) -> crate::Result<()>;

    /// Every posting held by this segment, sorted by `(hash, id)`. Used by
    /// the merger (§4.5), which needs a complete source stream for each
    /// segment in the window being merged.
    fn all_items(&self) -> crate::Result<Vec<Item>>;
}
