// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

/// Runtime counters for an open index.
///
/// These are read-only to external collaborators (§1) and exist purely for
/// observability; nothing in the index's correctness depends on them.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of blocks decoded from the on-disk block region.
    pub(crate) block_load_io: AtomicUsize,

    /// Number of block accesses served from a file segment's one-block
    /// decode cache (§4.3).
    pub(crate) block_load_cached: AtomicUsize,

    /// Number of completed `search` calls.
    pub(crate) searches: AtomicUsize,

    /// Number of completed `update` calls.
    pub(crate) updates: AtomicUsize,

    /// Number of memory-segment merges completed.
    pub(crate) memory_merges: AtomicUsize,

    /// Number of file-segment merges completed.
    pub(crate) file_merges: AtomicUsize,

    /// Number of checkpoints (memory segment -> file segment) completed.
    pub(crate) checkpoints: AtomicUsize,
}

#[allow(clippy::cast_precision_loss)]
impl Metrics {
    /// Number of blocks decoded from disk.
    pub fn block_loads_io(&self) -> usize {
        self.block_load_io.load(Relaxed)
    }

    /// Number of blocks served from the per-segment decode cache.
    pub fn block_loads_cached(&self) -> usize {
        self.block_load_cached.load(Relaxed)
    }

    /// Fraction of block accesses served from cache (0.0 - 1.0).
    pub fn block_cache_efficiency(&self) -> f64 {
        let io = self.block_load_io.load(Relaxed) as f64;
        let cached = self.block_load_cached.load(Relaxed) as f64;
        let total = io + cached;

        if total == 0.0 {
            0.0
        } else {
            cached / total
        }
    }

    /// Number of `search` calls completed.
    pub fn searches(&self) -> usize {
        self.searches.load(Relaxed)
    }

    /// Number of `update` calls completed.
    pub fn updates(&self) -> usize {
        self.updates.load(Relaxed)
    }

    /// Number of memory-segment merges completed.
    pub fn memory_merges(&self) -> usize {
        self.memory_merges.load(Relaxed)
    }

    /// Number of file-segment merges completed.
    pub fn file_merges(&self) -> usize {
        self.file_merges.load(Relaxed)
    }

    /// Number of checkpoints completed.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn empty_cache_efficiency_is_zero() {
        let metrics = Metrics::default();
        assert_eq!(0.0, metrics.block_cache_efficiency());
    }

    #[test]
    fn cache_efficiency_tracks_hits() {
        let metrics = Metrics::default();
        metrics.block_load_io.store(1, Relaxed);
        metrics.block_load_cached.store(3, Relaxed);
        assert_eq!(0.75, metrics.block_cache_efficiency());
    }
}
