// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Write-ahead operation log (§4.7): an append-only, rotated, JSON-lines
//! record of committed change batches. Bounds how much a crash can ever
//! lose — nothing is visible to `search` until its commit is durable
//! here.
//!
//! Records use a begin/apply/commit shape with a rotate-by-size policy,
//! encoded with `serde`/`serde_json` as a human-inspectable append-only
//! stream.

use crate::change::Change;
use crate::file;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One line of an `.xlog` file. Exactly one of `begin`/`apply`/`commit` is
/// ever set; which one tags the record's role within its commit group.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Record {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    begin: Option<BeginBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apply: Option<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BeginBody {
    size: usize,
}

impl Record {
    fn begin(id: u64, size: usize) -> Self {
        Self { id, begin: Some(BeginBody { size }), apply: None, commit: None }
    }

    fn apply(id: u64, change: Change) -> Self {
        Self { id, begin: None, apply: Some(change), commit: None }
    }

    fn commit(id: u64) -> Self {
        Self { id, begin: None, apply: None, commit: Some(true) }
    }
}

struct FileInfo {
    path: PathBuf,
    start_commit: u64,
    max_commit: u64,
}

struct OplogState {
    files: Vec<FileInfo>,
    current: Option<File>,
    current_size: u64,
}

/// Append-only operation log (§4.7).
pub struct Oplog {
    dir: PathBuf,
    max_file_size: u64,
    state: Mutex<OplogState>,
}

impl Oplog {
    /// Opens (creating if necessary) the oplog directory, replaying every
    /// complete commit group with `commit_id > min_published_commit_id`
    /// through `replay`, and discarding any incomplete trailing group
    /// (§4.7 "Recovery on open").
    ///
    /// # Errors
    ///
    /// Returns an error if the directory can't be created/listed, an xlog
    /// file is unreadable, or `replay` fails on a record group.
    pub fn open(
        dir: &Path,
        max_file_size: u64,
        min_published_commit_id: u64,
        mut replay: impl FnMut(u64, &[Change]) -> crate::Result<()>,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "xlog"))
            .collect();
        paths.sort();

        let mut files = Vec::new();

        for path in &paths {
            let groups = read_commit_groups(path)?;

            let mut max_commit = 0u64;
            let mut start_commit = u64::MAX;

            for group in groups {
                start_commit = start_commit.min(group.id);
                max_commit = max_commit.max(group.id);

                if group.id > min_published_commit_id {
                    replay(group.id, &group.changes)?;
                } else {
                    debug!("skipping already-checkpointed commit {}", group.id);
                }
            }

            if start_commit == u64::MAX {
                // File had no complete groups at all (e.g. a crash right
                // after rotation); keep it around as the active file only
                // if it's last, otherwise it's dead weight from a prior
                // crash and safe to leave for the next truncation pass.
                start_commit = parse_commit_id(path).unwrap_or(0);
                max_commit = start_commit;
            }

            files.push(FileInfo { path: path.clone(), start_commit, max_commit });
        }

        let current = match files.last() {
            Some(last) => Some(OpenOptions::new().append(true).open(&last.path)?),
            None => None,
        };

        let current_size = match &current {
            Some(file) => file.metadata()?.len(),
            None => 0,
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_size,
            state: Mutex::new(OplogState { files, current, current_size }),
        })
    }

    /// Appends one commit's worth of changes as a `begin`/`apply*`/`commit`
    /// record group, fsync'd before returning (§4.7 writer flow).
    ///
    /// # Errors
    ///
    /// On any I/O failure mid-write, the partially-written bytes are
    /// truncated back off the file before the error is returned, so a
    /// subsequent open never sees a half-written group.
    pub fn write_commit(&self, commit_id: u64, changes: &[Change]) -> crate::Result<()> {
        #[allow(clippy::expect_used, reason = "poisoning means a prior panic corrupted state")]
        let mut state = self.state.lock().expect("lock is poisoned");

        if state.current.is_none() || state.current_size >= self.max_file_size {
            self.rotate(&mut state, commit_id)?;
        }

        let pre_write_len = state.current_size;

        let result = (|| -> crate::Result<u64> {
            #[allow(clippy::expect_used)]
            let file = state.current.as_mut().expect("just ensured present");
            let mut written = 0u64;

            written += write_line(file, &Record::begin(commit_id, changes.len()))?;
            for change in changes {
                written += write_line(file, &Record::apply(commit_id, change.clone()))?;
            }
            written += write_line(file, &Record::commit(commit_id))?;

            file.sync_all()?;
            Ok(written)
        })();

        match result {
            Ok(written) => {
                state.current_size += written;
                #[allow(clippy::expect_used)]
                let last = state.files.last_mut().expect("rotate always pushes one");
                last.max_commit = last.max_commit.max(commit_id);
                Ok(())
            }
            Err(error) => {
                warn!("oplog write failed for commit {commit_id}, truncating partial bytes: {error}");
                #[allow(clippy::expect_used)]
                let file = state.current.as_mut().expect("just ensured present");
                let _ = file.set_len(pre_write_len);
                let _ = file.seek(std::io::SeekFrom::End(0));
                Err(error)
            }
        }
    }

    fn rotate(&self, state: &mut OplogState, next_commit_id: u64) -> crate::Result<()> {
        if let Some(file) = state.current.take() {
            file.sync_all()?;
        }

        let name = file::oplog_file_name(next_commit_id);
        let path = self.dir.join(name);
        let new_file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;

        state.files.push(FileInfo { path, start_commit: next_commit_id, max_commit: next_commit_id });
        state.current = Some(new_file);
        state.current_size = 0;
        Ok(())
    }

    /// Deletes every xlog file whose highest commit id is `<= commit_id`,
    /// except the file currently being written to (§4.7 truncation).
    ///
    /// # Errors
    ///
    /// Returns an error if a file can't be removed from disk.
    pub fn truncate(&self, commit_id: u64) -> crate::Result<()> {
        #[allow(clippy::expect_used, reason = "poisoning means a prior panic corrupted state")]
        let mut state = self.state.lock().expect("lock is poisoned");

        let currently_open: BTreeSet<PathBuf> = state
            .current
            .is_some()
            .then(|| state.files.last().map(|f| f.path.clone()))
            .flatten()
            .into_iter()
            .collect();

        let mut kept = Vec::new();
        for info in state.files.drain(..) {
            if info.max_commit <= commit_id && !currently_open.contains(&info.path) {
                if let Err(error) = std::fs::remove_file(&info.path) {
                    warn!("failed to remove truncated oplog file {:?}: {error}", info.path);
                }
            } else {
                kept.push(info);
            }
        }
        state.files = kept;
        Ok(())
    }

    /// Highest commit id appended so far, or 0 if the oplog is empty.
    #[must_use]
    pub fn last_commit_id(&self) -> u64 {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock is poisoned");
        state.files.iter().map(|f| f.max_commit).max().unwrap_or(0)
    }
}

fn write_line(file: &mut File, record: &Record) -> crate::Result<u64> {
    let mut line = serde_json::to_vec(record).map_err(|e| crate::Error::Corruption {
        path: None,
        reason: format!("failed to serialize oplog record: {e}"),
    })?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(line.len() as u64)
}

fn parse_commit_id(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

struct CommitGroup {
    id: u64,
    changes: Vec<Change>,
}

fn read_commit_groups(path: &Path) -> crate::Result<Vec<CommitGroup>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut groups = Vec::new();
    let mut pending: Option<(u64, usize, Vec<Change>)> = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(_) => break, // truncated/corrupt trailing line: stop here
        };

        if let Some(begin) = &record.begin {
            pending = Some((record.id, begin.size, Vec::with_capacity(begin.size)));
        } else if let Some(change) = record.apply {
            if let Some((id, _, changes)) = pending.as_mut() {
                if *id == record.id {
                    changes.push(change);
                } else {
                    pending = None;
                }
            }
        } else if record.commit == Some(true) {
            if let Some((id, size, changes)) = pending.take() {
                if id == record.id && changes.len() == size {
                    groups.push(CommitGroup { id, changes });
                }
            }
        }
    }

    Ok(groups)
}
