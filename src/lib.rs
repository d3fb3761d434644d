// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded, persistent, log-structured index mapping audio-fingerprint
//! hash tokens to document ids.
//!
//! ##### About
//!
//! Audio fingerprinting reduces a recording to a stream of locality-sensitive
//! hash tokens. Identifying an unknown clip means: hash it the same way, then
//! ask which known documents share the most tokens with it. This crate is
//! the index behind that question — an inverted `hash -> [doc id]` posting
//! list that accepts a continuous stream of inserts, deletes, and attribute
//! updates while staying searchable the whole time.
//!
//! Writes land first in an in-memory segment and an append-only operation
//! log, then get checkpointed to immutable, mmap-backed segment files on
//! disk. Both tiers are kept from fragmenting into too many small segments
//! by a tiered merge policy running on dedicated background threads, the
//! same geometric level-size budget a log-structured merge tree uses for
//! its own compaction.
//!
//! Multiple versions of the same document can be live across different
//! segments simultaneously; the newest segment that has touched a document
//! always wins, whether that's an overwrite, a delete, or nothing at all.
//!
//! # Example usage
//!
//! ```
//! use fp_index::{Change, Deadline, IndexConfig};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let index = IndexConfig::new(folder.path()).create(true).open()?;
//!
//! index.update(&[Change::Insert { id: 1, hashes: vec![10, 20, 30] }])?;
//!
//! let results = index.search(&[10, 20, 30], &Deadline::none())?;
//! assert_eq!(1, results[0].id);
//!
//! index.close();
//! #
//! # Ok::<(), fp_index::Error>(())
//! ```

#![doc(html_root_url = "https://docs.rs/fp-index")]
#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod block;
mod block_cache;
mod change;
mod checksum;
mod coding;
mod commit;
mod compression;
mod config;
mod error;
mod file;
mod file_segment;
mod format;
mod index;
mod index_file;
mod item;
mod memory_segment;
mod merge;
mod merge_policy;
mod metrics;
mod oplog;
mod path;
mod scheduler;
mod search;
mod segment;
mod segment_list;
mod stop_signal;

pub use change::Change;
pub use compression::CompressionType;
pub use config::IndexConfig;
pub use error::{Error, Result};
pub use index::{DocInfo, Index};
pub use metrics::Metrics;
pub use search::{Deadline, SearchResult};
