// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory segment (§4.2): the write-accepting tier. Built once from a
//! batch of [`Change`]s, then immutable except for the one-way `frozen`
//! transition applied by the checkpoint worker.

use crate::change::Change;
use crate::item::{Item, SegmentId};
use crate::search::{Deadline, SearchResults};
use crate::segment::Segment;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct MemorySegment {
    id: SegmentId,
    max_commit_id: u64,
    docs: BTreeMap<u32, bool>,
    items: Vec<Item>,
    attributes: BTreeMap<String, u64>,
    frozen: AtomicBool,
}

impl MemorySegment {
    /// Builds a segment from one commit's batch of changes.
    ///
    /// Changes are folded in reverse so only the final state of each
    /// document id (and each attribute key) within the batch survives:
    /// once an id or key is seen, later-processed (i.e. textually earlier)
    /// changes to it are dropped.
    #[must_use]
    pub fn build(id: SegmentId, max_commit_id: u64, changes: &[Change]) -> Self {
        let mut docs = BTreeMap::new();
        let mut items = Vec::new();
        let mut attributes = BTreeMap::new();

        for change in changes.iter().rev() {
            match change {
                Change::Insert { id: doc_id, hashes } => {
                    if docs.contains_key(doc_id) {
                        continue;
                    }
                    docs.insert(*doc_id, true);
                    items.extend(hashes.iter().map(|&hash| Item::new(hash, *doc_id)));
                }
                Change::Delete { id: doc_id } => {
                    if docs.contains_key(doc_id) {
                        continue;
                    }
                    docs.insert(*doc_id, false);
                }
                Change::SetAttribute { name, value } => {
                    attributes.entry(name.clone()).or_insert(*value);
                }
            }
        }

        items.sort_unstable();

        Self {
            id,
            max_commit_id,
            docs,
            items,
            attributes,
            frozen: AtomicBool::new(false),
        }
    }

    /// Wraps the output of the N-way merger (§4.5) into a segment that can
    /// be published back into the memory-segment list, used by
    /// memory-merge (§4.8's `maybeMergeMemorySegments`).
    #[must_use]
    pub fn from_merged(merged: crate::merge::MergedSegment) -> Self {
        Self {
            id: merged.id,
            max_commit_id: merged.max_commit_id,
            docs: merged.docs,
            items: merged.items,
            attributes: merged.attributes,
            frozen: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// One-way transition taken when this segment is selected for
    /// checkpointing (§4.8).
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }
}

impl Segment for MemorySegment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn max_commit_id(&self) -> u64 {
        self.max_commit_id
    }

    fn docs(&self) -> &BTreeMap<u32, bool> {
        &self.docs
    }

    fn attributes(&self) -> &BTreeMap<String, u64> {
        &self.attributes
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn search(
        &self,
        sorted_hashes: &[u32],
        results: &mut SearchResults,
        deadline: &Deadline,
    ) -> crate::Result<()> {
        if self.items.is_empty() {
            return Ok(());
        }

        let mut cursor = 0usize;
        for &hash in sorted_hashes {
            if deadline.is_expired() {
                return Err(crate::Error::Timeout);
            }

            while cursor < self.items.len() && self.items[cursor].hash < hash {
                cursor += 1;
            }

            let mut i = cursor;
            while i < self.items.len() && self.items[i].hash == hash {
                results.upsert_match(self.items[i].id, self.id.version);
                i += 1;
            }
        }

        Ok(())
    }

    fn all_items(&self) -> crate::Result<Vec<Item>> {
        Ok(self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn seg(changes: Vec<Change>) -> MemorySegment {
        MemorySegment::build(SegmentId::first(), 1, &changes)
    }

    #[test]
    fn build_deduplicates_by_id_last_write_wins() {
        let segment = seg(vec![
            Change::Insert { id: 1, hashes: vec![1, 2] },
            Change::Insert { id: 1, hashes: vec![9] },
        ]);

        assert_eq!(Some(&true), segment.docs().get(&1));
        assert_eq!(vec![Item::new(9, 1)], segment.items().to_vec());
    }

    #[test]
    fn delete_produces_tombstone_and_no_items() {
        let segment = seg(vec![Change::Delete { id: 1 }]);
        assert_eq!(Some(&false), segment.docs().get(&1));
        assert!(segment.items().is_empty());
    }

    #[test]
    fn search_matches_and_counts_hashes() {
        let segment = seg(vec![Change::Insert { id: 1, hashes: vec![1, 2, 3] }]);
        let mut results = SearchResults::new();
        segment.search(&[1, 2, 3], &mut results, &Deadline::none()).unwrap();
        let finished = results.finish(|_, _| false);
        assert_eq!(1, finished.len());
        assert_eq!(3, finished[0].score);
    }

    #[test]
    fn attributes_last_write_wins() {
        let segment = seg(vec![
            Change::SetAttribute { name: "k".into(), value: 1 },
            Change::SetAttribute { name: "k".into(), value: 2 },
        ]);
        assert_eq!(Some(&2), segment.attributes().get("k"));
    }

    #[test]
    fn freeze_is_one_way() {
        let segment = seg(vec![]);
        assert!(!segment.is_frozen());
        segment.freeze();
        assert!(segment.is_frozen());
    }
}
