// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shared decoded-block cache for file segments (§4.3).
//!
//! A file segment decodes blocks on demand; this cache lets repeated
//! queries against the same hot block skip the decompress+decode step.
//! Capacity defaults to a single block, matching the "most recently
//! decoded block" cache the search path needs, but can be sized up when
//! an index shares one cache across many file segments.

use crate::item::{Item, SegmentId};
use quick_cache::sync::Cache;
use quick_cache::UnitWeighter;
use std::sync::Arc;

#[derive(Eq, PartialEq, Hash)]
struct CacheKey(SegmentId, u32);

pub struct BlockCache {
    data: Cache<CacheKey, Arc<Vec<Item>>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl BlockCache {
    /// Creates a cache holding up to `capacity` decoded blocks.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            data: Cache::with(
                capacity.max(1) as usize,
                capacity.max(1),
                UnitWeighter,
                rustc_hash::FxBuildHasher::default(),
                quick_cache::sync::DefaultLifecycle::default(),
            ),
        }
    }

    pub fn get(&self, segment_id: SegmentId, block_idx: u32) -> Option<Arc<Vec<Item>>> {
        self.data.get(&CacheKey(segment_id, block_idx))
    }

    pub fn insert(&self, segment_id: SegmentId, block_idx: u32, items: Arc<Vec<Item>>) {
        self.data.insert(CacheKey(segment_id, block_idx), items);
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::with_capacity(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn caches_and_evicts() {
        let cache = BlockCache::with_capacity(1);
        let id = SegmentId::first();

        assert!(cache.get(id, 0).is_none());
        cache.insert(id, 0, Arc::new(vec![Item::new(1, 1)]));
        assert!(cache.get(id, 0).is_some());
    }
}
