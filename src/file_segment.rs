// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk segment (§4.3): mmap-backed, block-indexed, immutable once
//! published. Blocks decode lazily and are cached in a shared
//! [`BlockCache`] so a search against many file segments doesn't re-pay
//! decompression on every hit against the same hot block.

use crate::block::{self};
use crate::block_cache::BlockCache;
use crate::coding::{Decode, Encode};
use crate::compression::CompressionType;
use crate::file;
use crate::format::{Metadata, SegmentHeader};
use crate::item::{Item, SegmentId};
use crate::memory_segment::MemorySegment;
use crate::metrics::Metrics;
use crate::search::{Deadline, SearchResults};
use crate::segment::Segment;
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

pub struct FileSegment {
    id: SegmentId,
    path: PathBuf,
    metadata: Metadata,
    mmap: Mmap,
    block_region_offset: usize,
    /// Byte offset of each block, relative to `block_region_offset`.
    block_offsets: Vec<usize>,
    block_cache: Arc<BlockCache>,
    metrics: Arc<Metrics>,
}

impl FileSegment {
    /// Writes a new segment file from a sorted item stream and opens it.
    ///
    /// Used by the checkpoint worker (promoting a frozen memory segment,
    /// §4.8) and by file-segment merges (§4.5), both of which already have
    /// a merged `docs`/`attributes` map and a sorted `items` slice ready.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        data_dir: &Path,
        id: SegmentId,
        max_commit_id: u64,
        docs: BTreeMap<u32, bool>,
        attributes: BTreeMap<String, u64>,
        items: &[Item],
        block_size: u16,
        compression: CompressionType,
        block_cache: Arc<BlockCache>,
        metrics: Arc<Metrics>,
    ) -> crate::Result<Self> {
        let built = block::build_blocks(items, block_size);

        let compressed_blocks: Vec<Vec<u8>> = built
            .blocks
            .iter()
            .map(|raw| compression.compress(raw))
            .collect();

        let block_lengths = compressed_blocks.iter().map(|b| b.len() as u32).collect();

        let min_doc_id = docs.keys().copied().min().unwrap_or(0);
        let max_doc_id = docs.keys().copied().max().unwrap_or(0);

        let metadata = Metadata {
            num_items: items.len() as u64,
            num_blocks: built.blocks.len() as u32,
            min_doc_id,
            max_doc_id,
            max_commit_id,
            compression,
            attributes,
            docs,
            block_index: built.block_index,
            block_lengths,
        };

        let path = data_dir.join(file::segment_file_name(id.version, id.included_merges));

        let mut out = File::create(&path)?;
        SegmentHeader { block_size }.encode_into(&mut out)?;
        metadata.encode_into(&mut out)?;
        for block in &compressed_blocks {
            out.write_all(block)?;
        }
        out.sync_all()?;
        file::fsync_directory(data_dir)?;

        Self::open(path, id, block_cache, metrics)
    }

    /// Builds a file segment directly from a frozen memory segment, used
    /// by the checkpoint worker.
    pub fn from_memory_segment(
        data_dir: &Path,
        segment: &MemorySegment,
        block_size: u16,
        compression: CompressionType,
        block_cache: Arc<BlockCache>,
        metrics: Arc<Metrics>,
    ) -> crate::Result<Self> {
        Self::build(
            data_dir,
            segment.id(),
            segment.max_commit_id(),
            segment.docs().clone(),
            segment.attributes().clone(),
            segment.items(),
            block_size,
            compression,
            block_cache,
            metrics,
        )
    }

    /// Opens a previously-written segment file, mmapping its block region.
    ///
    /// The block compression algorithm is read from the segment's own
    /// metadata rather than taken from the caller's live config, so a
    /// segment written under one `CompressionType` (or `lz4` feature
    /// state) still decodes correctly after that configuration changes
    /// (§4.1, §4.3).
    pub fn open(
        path: PathBuf,
        id: SegmentId,
        block_cache: Arc<BlockCache>,
        metrics: Arc<Metrics>,
    ) -> crate::Result<Self> {
        let mut file = File::open(&path).map_err(|e| wrap_io(&path, e))?;

        SegmentHeader::decode_from(&mut file).map_err(|e| wrap_decode(&path, e))?;
        let metadata = Metadata::decode_from(&mut file).map_err(|e| wrap_decode(&path, e))?;
        let block_region_offset = file.stream_position()? as usize;

        let mut block_offsets = Vec::with_capacity(metadata.block_lengths.len());
        let mut offset = 0usize;
        for &length in &metadata.block_lengths {
            block_offsets.push(offset);
            offset += length as usize;
        }

        #[allow(unsafe_code, reason = "mmap requires unsafe; file is immutable post-publish")]
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| wrap_io(&path, e))?;

        Ok(Self {
            id,
            path,
            metadata,
            mmap,
            block_region_offset,
            block_offsets,
            block_cache,
            metrics,
        })
    }

    #[must_use]
    pub fn min_doc_id(&self) -> u32 {
        self.metadata.min_doc_id
    }

    #[must_use]
    pub fn max_doc_id(&self) -> u32 {
        self.metadata.max_doc_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the mmap and file handle without touching the file on
    /// disk.
    pub fn close(self) {
        drop(self);
    }

    /// Releases the mmap and file handle, then unlinks the file. Callers
    /// must only do this once a replacement `index.dat` that excludes this
    /// segment is durable (§4.3).
    pub fn delete(self) -> crate::Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Unlinks a segment file by path without requiring unique ownership
    /// of the [`FileSegment`] itself.
    ///
    /// Used by file-merge (§4.8's `maybeMergeFileSegments`), which only
    /// ever holds source segments behind `Arc` (a search snapshot may hold
    /// its own clone concurrently). POSIX guarantees an unlink doesn't
    /// invalidate mmaps or file descriptors still open elsewhere; the
    /// bytes are reclaimed once every holder drops its handle.
    pub fn unlink(path: &Path) -> crate::Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Decodes every block and returns the full sorted item list, used by
    /// file-segment merges (§4.5) which need a complete source stream.
    pub fn all_items(&self) -> crate::Result<Vec<Item>> {
        let mut items = Vec::with_capacity(self.metadata.num_items as usize);
        for idx in 0..self.metadata.num_blocks as usize {
            items.extend(self.decode_block(idx)?.iter().copied());
        }
        Ok(items)
    }

    fn block_bytes(&self, idx: usize) -> &[u8] {
        let start = self.block_region_offset + self.block_offsets[idx];
        let len = self.metadata.block_lengths[idx] as usize;
        &self.mmap[start..start + len]
    }

    fn decode_block(&self, idx: usize) -> crate::Result<Arc<Vec<Item>>> {
        if let Some(cached) = self.block_cache.get(self.id, idx as u32) {
            self.metrics.block_load_cached.fetch_add(1, Relaxed);
            return Ok(cached);
        }

        self.metrics.block_load_io.fetch_add(1, Relaxed);

        let raw = self.metadata.compression.decompress(self.block_bytes(idx))?;
        let items = block::decode_block(&raw).map_err(|e| wrap_decode(&self.path, e))?;
        let items = Arc::new(items);
        self.block_cache.insert(self.id, idx as u32, items.clone());
        Ok(items)
    }

    /// Returns the indices of every block that could hold postings for
    /// `hash`: binary-searches the block index for the rightmost block
    /// whose first key is `<= hash`, then walks backward while earlier
    /// blocks share that exact first key (the case where a single
    /// oversized run was split across several blocks, §4.1).
    fn locate_blocks(&self, hash: u32) -> Vec<usize> {
        let insertion = self.metadata.block_index.partition_point(|&k| k <= hash);
        if insertion == 0 {
            return vec![];
        }

        let last = insertion - 1;
        if self.metadata.block_index[last] != hash {
            return vec![last];
        }

        let mut start = last;
        while start > 0 && self.metadata.block_index[start - 1] == hash {
            start -= 1;
        }

        (start..=last).collect()
    }
}

impl Segment for FileSegment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn max_commit_id(&self) -> u64 {
        self.metadata.max_commit_id
    }

    fn docs(&self) -> &BTreeMap<u32, bool> {
        &self.metadata.docs
    }

    fn attributes(&self) -> &BTreeMap<String, u64> {
        &self.metadata.attributes
    }

    fn size(&self) -> usize {
        self.metadata.num_items as usize
    }

    fn search(
        &self,
        sorted_hashes: &[u32],
        results: &mut SearchResults,
        deadline: &Deadline,
    ) -> crate::Result<()> {
        if self.metadata.num_blocks == 0 {
            return Ok(());
        }

        let mut last: Option<(usize, Arc<Vec<Item>>)> = None;

        for &hash in sorted_hashes {
            if deadline.is_expired() {
                return Err(crate::Error::Timeout);
            }

            for idx in self.locate_blocks(hash) {
                let items = match &last {
                    Some((cached_idx, items)) if *cached_idx == idx => items.clone(),
                    _ => {
                        let items = self.decode_block(idx)?;
                        last = Some((idx, items.clone()));
                        items
                    }
                };

                for item in items.iter() {
                    if item.hash == hash {
                        results.upsert_match(item.id, self.id.version);
                    } else if item.hash > hash {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn all_items(&self) -> crate::Result<Vec<Item>> {
        self.all_items()
    }
}

fn wrap_io(path: &Path, error: std::io::Error) -> crate::Error {
    crate::Error::Corruption {
        path: Some(path.to_path_buf()),
        reason: error.to_string(),
    }
}

fn wrap_decode(path: &Path, error: crate::coding::DecodeError) -> crate::Error {
    crate::Error::Corruption {
        path: Some(path.to_path_buf()),
        reason: error.to_string(),
    }
}
