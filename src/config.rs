// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Builder-style configuration for opening an [`crate::index::Index`]: one
//! owned struct, consuming `self`-returning setters, a terminal `open`.

use crate::block_cache::BlockCache;
use crate::compression::CompressionType;
use crate::index::Index;
use crate::merge_policy::TieredMergePolicy;
use crate::metrics::Metrics;
use crate::path::absolute_path;
use crate::scheduler::Scheduler;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_MIN_SEGMENT_SIZE: usize = 10_000;
const DEFAULT_MAX_SEGMENT_SIZE: usize = 100_000_000;
const DEFAULT_SEGMENTS_PER_LEVEL: usize = 10;
const DEFAULT_SEGMENTS_PER_MERGE: usize = 10;
const DEFAULT_MAX_SEGMENTS: usize = 64;
const DEFAULT_BLOCK_SIZE: u16 = 4_096;
const DEFAULT_OPLOG_MAX_FILE_SIZE: u64 = /* 64 MiB */ 64 * 1_024 * 1_024;
const DEFAULT_BLOCK_CACHE_CAPACITY: u64 = 1_024;
const DEFAULT_SCHEDULER_WORKERS: usize = 3;

/// Configuration for opening or creating an index directory (§4.8, §6).
#[derive(Clone)]
pub struct IndexConfig {
    /// Root directory; `data/` and `oplog/` are created beneath it.
    pub(crate) path: PathBuf,

    /// Whether `open` may create a fresh index if `index.dat` is absent.
    pub(crate) create: bool,

    /// Tiered merge policy tunables (§4.6), shared by the memory- and
    /// file-segment merge workers.
    pub(crate) min_segment_size: usize,
    pub(crate) max_segment_size: usize,
    pub(crate) segments_per_level: usize,
    pub(crate) segments_per_merge: usize,
    pub(crate) max_segments: usize,

    /// Target size of a file-segment block (§4.1).
    pub(crate) block_size: u16,

    /// Block compression algorithm (§4.1).
    pub(crate) compression: CompressionType,

    /// Oplog file rotation threshold (§4.7).
    pub(crate) oplog_max_file_size: u64,

    /// Decoded-block cache capacity, shared across every open file
    /// segment (§4.3).
    pub(crate) block_cache_capacity: u64,

    /// Number of scheduler worker threads (§4.9).
    pub(crate) scheduler_workers: usize,
}

impl IndexConfig {
    /// Creates a config rooted at `path`, with every tunable at its
    /// default.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: absolute_path(path),
            create: false,
            min_segment_size: DEFAULT_MIN_SEGMENT_SIZE,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            segments_per_level: DEFAULT_SEGMENTS_PER_LEVEL,
            segments_per_merge: DEFAULT_SEGMENTS_PER_MERGE,
            max_segments: DEFAULT_MAX_SEGMENTS,
            block_size: DEFAULT_BLOCK_SIZE,
            compression: CompressionType::None,
            oplog_max_file_size: DEFAULT_OPLOG_MAX_FILE_SIZE,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            scheduler_workers: DEFAULT_SCHEDULER_WORKERS,
        }
    }

    /// Allows `open` to initialize a fresh index if the directory has no
    /// `index.dat` yet. Defaults to `false`, matching `IndexNotFound`'s
    /// contract in §6.
    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Sets the smallest on-disk segment size, in items, before it's
    /// eligible for the merge-policy budget and triggers a checkpoint
    /// (§4.6, §4.8).
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    #[must_use]
    pub fn min_segment_size(mut self, size: usize) -> Self {
        assert!(size > 0, "min_segment_size must be positive");
        self.min_segment_size = size;
        self
    }

    /// Sets the largest segment size the merge policy will ever grow a
    /// level to (§4.6).
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than `min_segment_size`.
    #[must_use]
    pub fn max_segment_size(mut self, size: usize) -> Self {
        assert!(size >= self.min_segment_size, "max_segment_size must be >= min_segment_size");
        self.max_segment_size = size;
        self
    }

    /// Sets the merge policy's level fan-out (§4.6).
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn segments_per_level(mut self, n: usize) -> Self {
        assert!(n > 0, "segments_per_level must be positive");
        self.segments_per_level = n;
        self
    }

    /// Sets the maximum number of sources a single merge may consume
    /// (§4.6).
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn segments_per_merge(mut self, n: usize) -> Self {
        assert!(n >= 2, "segments_per_merge must be at least 2");
        self.segments_per_merge = n;
        self
    }

    /// Sets the hard cap on segment count, beyond which a merge is forced
    /// even if the size-based budget would otherwise allow more (§4.6).
    #[must_use]
    pub fn max_segments(mut self, n: usize) -> Self {
        self.max_segments = n.max(2);
        self
    }

    /// Sets the target block size for new file segments (§4.1).
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    #[must_use]
    pub fn block_size(mut self, size: u16) -> Self {
        assert!(size > 0, "block_size must be positive");
        self.block_size = size;
        self
    }

    /// Sets the block compression algorithm (§4.1).
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the oplog rotation threshold, in bytes (§4.7).
    #[must_use]
    pub fn oplog_max_file_size(mut self, bytes: u64) -> Self {
        self.oplog_max_file_size = bytes.max(1);
        self
    }

    /// Sets the decoded-block cache capacity shared across file segments
    /// (§4.3).
    #[must_use]
    pub fn block_cache_capacity(mut self, capacity: u64) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Sets the number of scheduler worker threads (§4.9).
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn scheduler_workers(mut self, n: usize) -> Self {
        assert!(n > 0, "scheduler_workers must be positive");
        self.scheduler_workers = n;
        self
    }

    pub(crate) fn merge_policy(&self) -> TieredMergePolicy {
        TieredMergePolicy {
            min_segment_size: self.min_segment_size,
            max_segment_size: self.max_segment_size,
            segments_per_level: self.segments_per_level,
            segments_per_merge: self.segments_per_merge,
            max_segments: self.max_segments,
        }
    }

    pub(crate) fn block_cache(&self) -> Arc<BlockCache> {
        Arc::new(BlockCache::with_capacity(self.block_cache_capacity))
    }

    pub(crate) fn metrics(&self) -> Arc<Metrics> {
        Arc::new(Metrics::default())
    }

    pub(crate) fn scheduler(&self) -> Arc<Scheduler> {
        Scheduler::new(self.scheduler_workers)
    }

    /// Opens (or creates, if `create(true)` was set) the index at `path`.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if the directory has no `index.dat` and
    /// `create` is `false`; `AlreadyOpen` if `create` is `true` but an
    /// index already exists there; any I/O or corruption error
    /// encountered while loading segments or replaying the oplog.
    pub fn open(self) -> crate::Result<Index> {
        Index::open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn defaults_are_sane() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::new(dir.path());
        assert!(config.min_segment_size > 0);
        assert!(config.max_segment_size >= config.min_segment_size);
        assert!(!config.create);
    }

    #[test]
    #[should_panic(expected = "max_segment_size must be >= min_segment_size")]
    fn rejects_inverted_segment_sizes() {
        let dir = tempfile::tempdir().unwrap();
        IndexConfig::new(dir.path()).min_segment_size(100).max_segment_size(10);
    }

    #[test]
    fn builder_is_chainable() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::new(dir.path())
            .create(true)
            .min_segment_size(100)
            .max_segment_size(1_000_000)
            .segments_per_level(4)
            .segments_per_merge(8)
            .block_size(8_192)
            .oplog_max_file_size(1_000_000);

        assert_eq!(100, config.min_segment_size);
        assert_eq!(8_192, config.block_size);
    }
}
