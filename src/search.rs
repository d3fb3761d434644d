// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-query result aggregation (§3, §4.8): accumulates per-document
//! co-occurrence scores across segments, honouring newer-version-wins
//! overwrite and delete semantics.

use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// A single match: the document `id`, its co-occurrence `score`, and the
/// `version` of the segment the match came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SearchResult {
    pub id: u32,
    pub score: u32,
    pub version: u64,
}

/// An optional wall-clock deadline consulted by long-running per-segment
/// search loops (§5).
#[derive(Copy, Clone, Debug)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline: never expires.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Expires `duration` from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Accumulates matches across every segment touched by one `search` call.
///
/// Entries are keyed by document id; `upsert_match` keeps the score from
/// whichever segment has the highest `version` seen so far for that id,
/// since a higher version always supersedes an older segment's postings
/// for the same document.
#[derive(Default)]
pub struct SearchResults {
    entries: FxHashMap<u32, (u32, u64)>,
}

impl SearchResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a single hash match for `id` found in a segment of the
    /// given `version`.
    pub fn upsert_match(&mut self, id: u32, version: u64) {
        self.entries
            .entry(id)
            .and_modify(|(score, seen_version)| match version.cmp(seen_version) {
                std::cmp::Ordering::Greater => {
                    *score = 1;
                    *seen_version = version;
                }
                std::cmp::Ordering::Equal => *score += 1,
                std::cmp::Ordering::Less => {}
            })
            .or_insert((1, version));
    }

    /// Finalises aggregation: any document touched (inserted, overwritten,
    /// or deleted) by a segment newer than the one that produced its score
    /// has its score zeroed, since that later segment's state is what
    /// actually holds for the document now. `has_newer_version` should
    /// consult both segment lists under a single consistent snapshot.
    #[must_use]
    pub fn finish(
        self,
        has_newer_version: impl Fn(u32, u64) -> bool,
    ) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = self
            .entries
            .into_iter()
            .map(|(id, (score, version))| {
                let score = if has_newer_version(id, version) { 0 } else { score };
                SearchResult { id, score, version }
            })
            .filter(|result| result.score > 0)
            .collect();

        results.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn higher_version_replaces_lower() {
        let mut results = SearchResults::new();
        results.upsert_match(1, 1);
        results.upsert_match(1, 1);
        results.upsert_match(1, 2);
        let finished = results.finish(|_, _| false);
        assert_eq!(vec![SearchResult { id: 1, score: 1, version: 2 }], finished);
    }

    #[test]
    fn same_version_accumulates() {
        let mut results = SearchResults::new();
        results.upsert_match(1, 5);
        results.upsert_match(1, 5);
        results.upsert_match(1, 5);
        let finished = results.finish(|_, _| false);
        assert_eq!(3, finished[0].score);
    }

    #[test]
    fn newer_untouched_segment_zeroes_score() {
        let mut results = SearchResults::new();
        results.upsert_match(1, 1);
        let finished = results.finish(|id, version| id == 1 && version == 1);
        assert!(finished.is_empty());
    }

    #[test]
    fn sorted_by_score_desc_then_id_asc() {
        let mut results = SearchResults::new();
        results.upsert_match(2, 1);
        results.upsert_match(1, 1);
        results.upsert_match(1, 1);
        let finished = results.finish(|_, _| false);
        assert_eq!(
            vec![
                SearchResult { id: 1, score: 2, version: 1 },
                SearchResult { id: 2, score: 1, version: 1 },
            ],
            finished
        );
    }

    #[test]
    fn deadline_after_zero_is_immediately_expired() {
        let deadline = Deadline::after(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(1));
        assert!(deadline.is_expired());
    }

    #[test]
    fn deadline_none_never_expires() {
        assert!(!Deadline::none().is_expired());
    }
}
