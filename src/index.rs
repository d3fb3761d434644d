// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Index core (§4.8): orchestrates `update`/`search` against the two
//! segment lists, plus the three background workers (memory-merge,
//! checkpoint, file-merge) that keep both tiers geometrically shaped.

use crate::block_cache::BlockCache;
use crate::change::Change;
use crate::commit::CommitIdCounter;
use crate::config::IndexConfig;
use crate::file;
use crate::file_segment::FileSegment;
use crate::index_file::IndexFile;
use crate::item::SegmentId;
use crate::memory_segment::MemorySegment;
use crate::merge;
use crate::metrics::Metrics;
use crate::oplog::Oplog;
use crate::scheduler::{CancelHandle, ScheduleOptions, Scheduler};
use crate::search::{Deadline, SearchResult};
use crate::segment::Segment;
use crate::segment_list::SegmentList;
use crate::stop_signal::StopSignal;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const BACKOFF: Duration = Duration::from_secs(60);

/// Per-document state as known to the index, returned by
/// [`Index::get_doc_info`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DocInfo {
    /// The document id looked up.
    pub id: u32,
    /// Version of the most recent segment that has touched this document.
    pub version: u64,
    /// `true` if the most recent touch was a delete.
    pub deleted: bool,
}

/// A one-shot-or-repeating wakeup used by the three background workers
/// (§4.8's "reset-events"): `signal` wakes a waiter early, `wait` blocks
/// up to a timeout and always clears the flag on the way out.
struct Event {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    fn new() -> Self {
        Self { ready: Mutex::new(false), cv: Condvar::new() }
    }

    fn signal(&self) {
        let mut ready = self.ready.lock().expect("lock is poisoned");
        *ready = true;
        self.cv.notify_all();
    }

    fn wait(&self, timeout: Duration) {
        let ready = self.ready.lock().expect("lock is poisoned");
        let (mut ready, _) = self
            .cv
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *ready = false;
    }
}

struct IndexInner {
    data_dir: PathBuf,
    config: IndexConfig,

    memory_segments: SegmentList<MemorySegment>,
    file_segments: SegmentList<FileSegment>,

    update_lock: Mutex<()>,
    memory_segments_lock: Mutex<()>,
    file_segments_lock: Mutex<()>,

    oplog: Oplog,
    commit_counter: CommitIdCounter,

    block_cache: Arc<BlockCache>,
    metrics: Arc<Metrics>,

    stop: StopSignal,
    memory_merge_event: Event,
    checkpoint_event: Event,
    file_merge_event: Event,
}

/// An open audio-fingerprint index (§4.8). Clone-free: construct one via
/// [`IndexConfig::open`] and share it across threads behind whatever
/// handle the caller prefers (it's already internally `Arc`-backed).
pub struct Index {
    inner: Arc<IndexInner>,
    scheduler: Arc<Scheduler>,
    scheduler_jobs: Vec<CancelHandle>,
    worker_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Index {
    /// Opens or creates an index per `config` (§6).
    ///
    /// # Errors
    ///
    /// `IndexNotFound` if `config.create` is `false` and the directory has
    /// no `index.dat`; `AlreadyOpen` if `config.create` is `true` and one
    /// already exists; any I/O or corruption error surfaced while loading
    /// file segments or replaying the oplog.
    pub fn open(config: IndexConfig) -> crate::Result<Self> {
        let data_dir = config.path.join(file::DATA_FOLDER);
        let oplog_dir = config.path.join(file::OPLOG_FOLDER);

        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&oplog_dir)?;

        let existing = IndexFile::load(&data_dir)?;
        match (&existing, config.create) {
            (None, false) => return Err(crate::Error::IndexNotFound),
            (Some(_), true) => return Err(crate::Error::AlreadyOpen),
            _ => {}
        }

        let block_cache = config.block_cache();
        let metrics = config.metrics();

        let mut file_segments = Vec::new();
        if let Some(index_file) = &existing {
            for &id in &index_file.segment_ids {
                let path = data_dir.join(file::segment_file_name(id.version, id.included_merges));
                let segment = FileSegment::open(path, id, block_cache.clone(), metrics.clone())?;
                file_segments.push(Arc::new(segment));
            }
        } else {
            IndexFile::default().save(&data_dir)?;
        }

        let min_published_commit_id =
            file_segments.iter().map(|s: &Arc<FileSegment>| s.max_commit_id()).max().unwrap_or(0);

        let mut next_segment_id = match file_segments.last() {
            Some(segment) => segment.id().next(),
            None => SegmentId::first(),
        };

        let mut replayed = Vec::new();
        let oplog = Oplog::open(
            &oplog_dir,
            config.oplog_max_file_size,
            min_published_commit_id,
            |commit_id, changes| {
                let segment = MemorySegment::build(next_segment_id, commit_id, changes);
                next_segment_id = segment.id().next();
                replayed.push(Arc::new(segment));
                Ok(())
            },
        )?;

        let commit_counter = CommitIdCounter::new(oplog.last_commit_id());

        let inner = Arc::new(IndexInner {
            data_dir,
            config,
            memory_segments: SegmentList::new(replayed),
            file_segments: SegmentList::new(file_segments),
            update_lock: Mutex::new(()),
            memory_segments_lock: Mutex::new(()),
            file_segments_lock: Mutex::new(()),
            oplog,
            commit_counter,
            block_cache,
            metrics,
            stop: StopSignal::default(),
            memory_merge_event: Event::new(),
            checkpoint_event: Event::new(),
            file_merge_event: Event::new(),
        });

        let scheduler = inner.config.scheduler();

        let mut handles = Vec::with_capacity(3);
        handles.push(spawn_worker(inner.clone(), "memory-merge", |inner| {
            (&inner.memory_merge_event, inner.maybe_merge_memory_segments())
        }));
        handles.push(spawn_worker(inner.clone(), "checkpoint", |inner| {
            (&inner.checkpoint_event, inner.do_checkpoint())
        }));
        handles.push(spawn_worker(inner.clone(), "file-merge", |inner| {
            (&inner.file_merge_event, inner.maybe_merge_file_segments())
        }));

        // Fallback timer (§4.9's last point): nudges each worker's event
        // periodically even if no caller ever signals it, in case a step
        // silently stops making progress.
        let mut scheduler_jobs = Vec::with_capacity(3);
        for (strand, label) in [(0u64, "memory-merge"), (1, "checkpoint"), (2, "file-merge")] {
            let inner = inner.clone();
            let (_, cancel) = scheduler.schedule(
                move || {
                    match label {
                        "memory-merge" => inner.memory_merge_event.signal(),
                        "checkpoint" => inner.checkpoint_event.signal(),
                        _ => inner.file_merge_event.signal(),
                    }
                },
                ScheduleOptions { delay: BACKOFF, repeat: Some(BACKOFF), strand },
            );
            scheduler_jobs.push(cancel);
        }

        Ok(Self { inner, scheduler, scheduler_jobs, worker_handles: Mutex::new(handles) })
    }

    /// Applies a batch of changes as one durable commit (§4.8, §6).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any [`Change::Insert`]/[`Change::Delete`] names
    /// id `0`. Any oplog I/O error; the partial memory segment is
    /// discarded and `commit_id` is not advanced.
    pub fn update(&self, changes: &[Change]) -> crate::Result<()> {
        for change in changes {
            if change.doc_id() == Some(0) {
                return Err(crate::Error::InvalidArgument("document id must not be 0"));
            }
        }

        let _update_guard = self.inner.update_lock.lock().expect("lock is poisoned");
        let _memory_guard = self.inner.memory_segments_lock.lock().expect("lock is poisoned");

        let commit_id = self.inner.commit_counter.next();

        let prev_id = self
            .inner
            .memory_segments
            .snapshot()
            .last()
            .map(|segment| segment.id())
            .or_else(|| self.inner.file_segments.snapshot().last().map(|segment| segment.id()));
        let new_id = prev_id.map_or_else(SegmentId::first, SegmentId::next);

        let segment = MemorySegment::build(new_id, commit_id, changes);

        if let Err(error) = self.inner.oplog.write_commit(commit_id, changes) {
            warn!("update commit {commit_id} failed to durably log, discarding: {error}");
            return Err(error);
        }

        self.inner.memory_segments.append(Arc::new(segment));
        self.inner.metrics.updates.fetch_add(1, Relaxed);

        drop(_memory_guard);
        drop(_update_guard);

        self.inner.memory_merge_event.signal();
        Ok(())
    }

    /// Runs a similarity search (§4.8, §6): the query hashes are sorted and
    /// deduplicated, then every segment is searched in file-then-memory
    /// order so higher-version memory segments win ties.
    ///
    /// # Errors
    ///
    /// `Timeout` if `deadline` expires mid-search.
    pub fn search(&self, hashes: &[u32], deadline: &Deadline) -> crate::Result<Vec<SearchResult>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted_hashes = hashes.to_vec();
        sorted_hashes.sort_unstable();
        sorted_hashes.dedup();

        let mut results = crate::search::SearchResults::new();
        self.inner.file_segments.search(&sorted_hashes, &mut results, deadline)?;
        self.inner.memory_segments.search(&sorted_hashes, &mut results, deadline)?;

        let memory_segments = &self.inner.memory_segments;
        let file_segments = &self.inner.file_segments;
        let finished = results.finish(|doc_id, version| {
            memory_segments.has_newer_version(doc_id, version)
                || file_segments.has_newer_version(doc_id, version)
        });

        self.inner.metrics.searches.fetch_add(1, Relaxed);
        Ok(finished)
    }

    /// Looks up the most recent state of one document, scanning from the
    /// newest segment backward (§6).
    #[must_use]
    pub fn get_doc_info(&self, id: u32) -> Option<DocInfo> {
        for segment in self.inner.memory_segments.snapshot().iter().rev() {
            if let Some(&live) = segment.docs().get(&id) {
                return Some(DocInfo { id, version: segment.id().version, deleted: !live });
            }
        }
        for segment in self.inner.file_segments.snapshot().iter().rev() {
            if let Some(&live) = segment.docs().get(&id) {
                return Some(DocInfo { id, version: segment.id().version, deleted: !live });
            }
        }
        None
    }

    /// Returns every attribute (custom, later-version-wins) plus the
    /// built-in `min_document_id`/`max_document_id` (§6).
    #[must_use]
    pub fn get_attributes(&self) -> BTreeMap<String, u64> {
        let mut attributes = BTreeMap::new();
        let mut docs: BTreeMap<u32, bool> = BTreeMap::new();

        for segment in self.inner.file_segments.snapshot().iter() {
            for (key, value) in segment.attributes() {
                attributes.insert(key.clone(), *value);
            }
            for (&id, &live) in segment.docs() {
                docs.insert(id, live);
            }
        }
        for segment in self.inner.memory_segments.snapshot().iter() {
            for (key, value) in segment.attributes() {
                attributes.insert(key.clone(), *value);
            }
            for (&id, &live) in segment.docs() {
                docs.insert(id, live);
            }
        }

        let live_ids = docs.iter().filter_map(|(&id, &live)| live.then_some(id));
        if let (Some(min), Some(max)) = (live_ids.clone().min(), live_ids.max()) {
            attributes.insert("min_document_id".to_string(), u64::from(min));
            attributes.insert("max_document_id".to_string(), u64::from(max));
        }

        attributes
    }

    /// A read-only handle to the index's runtime counters (§2, ambient).
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Quiesces the index: stops the three background workers and the
    /// scheduler, then joins every thread. Already-durable state (the
    /// oplog and any published segments) needs no further flush (§6).
    pub fn close(self) {
        self.inner.stop.send();
        self.inner.memory_merge_event.signal();
        self.inner.checkpoint_event.signal();
        self.inner.file_merge_event.signal();

        for cancel in &self.scheduler_jobs {
            cancel.cancel();
        }
        self.scheduler.shutdown();

        let mut handles = self.worker_handles.lock().expect("lock is poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl IndexInner {
    /// §4.8 `maybeMergeMemorySegments`.
    fn maybe_merge_memory_segments(&self) -> crate::Result<bool> {
        let _guard = self.memory_segments_lock.lock().expect("lock is poisoned");

        let snapshot = self.memory_segments.snapshot();
        let sizes: Vec<usize> = snapshot.iter().map(|s| s.size()).collect();
        let excluded: Vec<bool> = snapshot
            .iter()
            .map(|s| s.is_frozen() || s.size() >= self.config.max_segment_size)
            .collect();

        let Some(candidate) = self.config.merge_policy().select(&sizes, &excluded) else {
            return Ok(false);
        };

        let sources = &snapshot[candidate.start..candidate.end];
        let rest = &snapshot[candidate.end..];
        let merged = merge::merge(sources, |doc_id, version| {
            rest.iter().any(|s| s.id().version > version && s.docs().contains_key(&doc_id))
        })?;

        let merged_size = merged.items.len();
        let merged_segment = Arc::new(MemorySegment::from_merged(merged));

        self.memory_segments.replace_range(candidate.start..candidate.end, merged_segment);
        self.metrics.memory_merges.fetch_add(1, Relaxed);
        debug!("memory-merge folded {} segments ({merged_size} items)", candidate.len());

        if merged_size >= self.config.min_segment_size {
            self.checkpoint_event.signal();
        }

        Ok(true)
    }

    /// §4.8 `doCheckpoint`.
    fn do_checkpoint(&self) -> crate::Result<bool> {
        let Some(head) = self.memory_segments.snapshot().first().cloned() else {
            return Ok(false);
        };
        if head.size() < self.config.min_segment_size {
            return Ok(false);
        }

        head.freeze();

        let file_segment = FileSegment::from_memory_segment(
            &self.data_dir,
            &head,
            self.config.block_size,
            self.config.compression,
            self.block_cache.clone(),
            self.metrics.clone(),
        )?;
        let max_commit_id = file_segment.max_commit_id();

        let _memory_guard = self.memory_segments_lock.lock().expect("lock is poisoned");
        let _file_guard = self.file_segments_lock.lock().expect("lock is poisoned");

        let mut segment_ids = self.file_segments.ids();
        segment_ids.push(file_segment.id());
        IndexFile { segment_ids }.save(&self.data_dir)?;

        self.file_segments.append(Arc::new(file_segment));
        self.memory_segments.drop_head(1);

        drop(_file_guard);
        drop(_memory_guard);

        self.oplog.truncate(max_commit_id)?;
        self.metrics.checkpoints.fetch_add(1, Relaxed);
        debug!("checkpointed memory segment up to commit {max_commit_id}");

        self.file_merge_event.signal();
        Ok(true)
    }

    /// §4.8 `maybeMergeFileSegments`.
    fn maybe_merge_file_segments(&self) -> crate::Result<bool> {
        // The candidate window and its shadowing context are captured from
        // one snapshot each of both lists, then released; the actual merge
        // I/O runs unlocked (it must not block the read path). The file
        // list is append-only except for merges run by this same single
        // worker thread, so `sources` cannot disappear underneath us.
        let (candidate, sources, outside_window_files, memory_snapshot) = {
            let snapshot = self.file_segments.snapshot();
            let sizes: Vec<usize> = snapshot.iter().map(|s| s.size()).collect();
            let excluded: Vec<bool> =
                snapshot.iter().map(|s| s.size() >= self.config.max_segment_size).collect();

            let Some(candidate) = self.config.merge_policy().select(&sizes, &excluded) else {
                return Ok(false);
            };

            let sources = snapshot[candidate.start..candidate.end].to_vec();
            let outside_window_files = snapshot[candidate.end..].to_vec();
            let memory_snapshot = self.memory_segments.snapshot();
            (candidate, sources, outside_window_files, memory_snapshot)
        };

        // Every memory segment is newer than every file segment, so any
        // doc a memory segment has touched at all shadows the merge
        // result regardless of version; among file segments, only ones
        // strictly outside (newer than) the merge window can shadow it.
        let merged = merge::merge(&sources, |doc_id, version| {
            let shadowed_by_file = outside_window_files
                .iter()
                .any(|s| s.id().version > version && s.docs().contains_key(&doc_id));
            let shadowed_by_memory = memory_snapshot.iter().any(|s| s.docs().contains_key(&doc_id));
            shadowed_by_file || shadowed_by_memory
        })?;

        let merged_segment = FileSegment::build(
            &self.data_dir,
            merged.id,
            merged.max_commit_id,
            merged.docs,
            merged.attributes,
            &merged.items,
            self.config.block_size,
            self.config.compression,
            self.block_cache.clone(),
            self.metrics.clone(),
        )?;

        let source_paths: Vec<PathBuf> = sources.iter().map(|s| s.path().to_path_buf()).collect();

        let _guard = self.file_segments_lock.lock().expect("lock is poisoned");

        let mut segment_ids = self.file_segments.ids();
        segment_ids.splice(candidate.start..candidate.end, std::iter::once(merged_segment.id()));
        IndexFile { segment_ids }.save(&self.data_dir)?;

        self.file_segments.replace_range(candidate.start..candidate.end, Arc::new(merged_segment));
        self.metrics.file_merges.fetch_add(1, Relaxed);

        drop(_guard);

        for path in source_paths {
            if let Err(error) = FileSegment::unlink(&path) {
                warn!("failed to unlink merged-away segment file {path:?}: {error}");
            }
        }

        Ok(true)
    }
}

fn spawn_worker(
    inner: Arc<IndexInner>,
    name: &'static str,
    step: impl Fn(&IndexInner) -> (&Event, crate::Result<bool>) + Send + 'static,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        if inner.stop.is_stopped() {
            return;
        }

        let (event, result) = step(&inner);
        match result {
            Ok(true) => continue,
            Ok(false) => event.wait(BACKOFF),
            Err(error) => {
                warn!("{name} worker step failed, backing off: {error}");
                event.wait(BACKOFF);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use test_log::test;

    fn open(dir: &std::path::Path) -> Index {
        IndexConfig::new(dir).create(true).min_segment_size(10_000).open().unwrap()
    }

    #[test]
    fn basic_recall() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index.update(&[Change::Insert { id: 1, hashes: vec![1, 2, 3] }]).unwrap();
        let results = index.search(&[1, 2, 3], &Deadline::none()).unwrap();

        assert_eq!(1, results.len());
        assert_eq!(1, results[0].id);
        assert_eq!(3, results[0].score);
        index.close();
    }

    #[test]
    fn partial_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index.update(&[Change::Insert { id: 1, hashes: vec![1, 2, 3] }]).unwrap();
        index.update(&[Change::Insert { id: 1, hashes: vec![1, 2, 4] }]).unwrap();
        let results = index.search(&[1, 2, 3], &Deadline::none()).unwrap();

        assert_eq!(1, results.len());
        assert_eq!(2, results[0].score);
        index.close();
    }

    #[test]
    fn full_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index.update(&[Change::Insert { id: 1, hashes: vec![1, 2, 3] }]).unwrap();
        index.update(&[Change::Insert { id: 1, hashes: vec![100, 200, 300] }]).unwrap();
        let results = index.search(&[1, 2, 3], &Deadline::none()).unwrap();

        assert!(results.is_empty());
        index.close();
    }

    #[test]
    fn delete_hides_doc() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index.update(&[Change::Insert { id: 1, hashes: vec![1, 2, 3] }]).unwrap();
        index.update(&[Change::Delete { id: 1 }]).unwrap();
        let results = index.search(&[1, 2, 3], &Deadline::none()).unwrap();

        assert!(results.is_empty());
        assert!(index.get_doc_info(1).unwrap().deleted);
        index.close();
    }

    #[test]
    fn empty_query_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        assert!(index.search(&[], &Deadline::none()).unwrap().is_empty());
        index.close();
    }

    #[test]
    fn rejects_zero_document_id() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let result = index.update(&[Change::Insert { id: 0, hashes: vec![1] }]);
        assert!(matches!(result, Err(crate::Error::InvalidArgument(_))));
        index.close();
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = open(dir.path());
            for i in 1..=20u32 {
                index.update(&[Change::Insert { id: i, hashes: vec![i, i + 1] }]).unwrap();
            }
            index.close();
        }

        let index = IndexConfig::new(dir.path()).create(false).open().unwrap();
        for i in 1..=20u32 {
            let results = index.search(&[i, i + 1], &Deadline::none()).unwrap();
            assert_eq!(1, results.len());
            assert_eq!(i, results[0].id);
            assert_eq!(2, results[0].score);
        }
        index.close();
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = IndexConfig::new(dir.path()).create(false).open();
        assert!(matches!(result, Err(crate::Error::IndexNotFound)));
    }

    #[test]
    fn create_on_existing_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path()).close();
        let result = IndexConfig::new(dir.path()).create(true).open();
        assert!(matches!(result, Err(crate::Error::AlreadyOpen)));
    }

    #[test]
    fn attributes_report_built_in_doc_id_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index.update(&[Change::Insert { id: 5, hashes: vec![1] }]).unwrap();
        index.update(&[Change::Insert { id: 1, hashes: vec![2] }]).unwrap();
        index.update(&[Change::SetAttribute { name: "custom".into(), value: 42 }]).unwrap();

        let attrs = index.get_attributes();
        assert_eq!(Some(&1), attrs.get("min_document_id"));
        assert_eq!(Some(&5), attrs.get("max_document_id"));
        assert_eq!(Some(&42), attrs.get("custom"));
        index.close();
    }
}
