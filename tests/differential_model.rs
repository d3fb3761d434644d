//! Differential test: a randomized sequence of inserts, deletes and
//! overwrites is applied to both the index and a brute-force
//! `id -> multiset<hash>` reference model; `search` against every hash
//! that ever appeared must agree with the model after every batch.

use fp_index::{Change, Deadline, IndexConfig};
use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use test_log::test;

const DOC_SPACE: u32 = 50;
const HASH_SPACE: u32 = 40;
const BATCHES: usize = 200;

/// Reference model: `None` means the id has never been touched, `Some(_)`
/// holds its live hash multiset (as a set, since duplicate hashes within a
/// fingerprint don't change which ids match which queries), and an absent
/// entry after a delete is modeled as `Some(empty-but-marked-deleted)`
/// via the separate `deleted` set.
struct Model {
    live: BTreeMap<u32, HashSet<u32>>,
    deleted: HashSet<u32>,
}

impl Model {
    fn new() -> Self {
        Self { live: BTreeMap::new(), deleted: HashSet::new() }
    }

    fn apply(&mut self, change: &Change) {
        match change {
            Change::Insert { id, hashes } => {
                self.deleted.remove(id);
                self.live.insert(*id, hashes.iter().copied().collect());
            }
            Change::Delete { id } => {
                self.live.remove(id);
                self.deleted.insert(*id);
            }
            Change::SetAttribute { .. } => {}
        }
    }

    /// Brute-force equivalent of `Index::search`: every live doc's score is
    /// how many of `hashes` it contains; only positive scores are kept.
    fn search(&self, hashes: &[u32]) -> Vec<(u32, u32)> {
        let query: HashSet<u32> = hashes.iter().copied().collect();
        let mut results: Vec<(u32, u32)> = self
            .live
            .iter()
            .map(|(&id, doc_hashes)| (id, doc_hashes.intersection(&query).count() as u32))
            .filter(|&(_, score)| score > 0)
            .collect();
        results.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        results
    }
}

#[test]
fn random_update_sequence_matches_brute_force_reference() -> fp_index::Result<()> {
    let folder = tempfile::tempdir()?;
    let index = IndexConfig::new(folder.path()).create(true).min_segment_size(50).open()?;
    let mut model = Model::new();
    let mut rng = rand::rng();

    for _ in 0..BATCHES {
        let id = rng.random_range(1..=DOC_SPACE);
        let change = if rng.random_bool(0.25) {
            Change::Delete { id }
        } else {
            let len = rng.random_range(1..=6);
            // Deduplicated: a document's own fingerprint matching the same
            // query hash twice is a degenerate case the model (a hash set)
            // can't represent faithfully, so keep fingerprints hash-unique.
            let mut hashes: Vec<u32> = (0..len).map(|_| rng.random_range(0..HASH_SPACE)).collect();
            hashes.sort_unstable();
            hashes.dedup();
            Change::Insert { id, hashes }
        };

        index.update(std::slice::from_ref(&change))?;
        model.apply(&change);

        let query: Vec<u32> = (0..HASH_SPACE).choose_multiple(&mut rng, 10);
        let mut sorted_query = query.clone();
        sorted_query.sort_unstable();
        sorted_query.dedup();

        let expected = model.search(&sorted_query);
        let actual = index.search(&sorted_query, &Deadline::none())?;
        let actual: Vec<(u32, u32)> = actual.iter().map(|r| (r.id, r.score)).collect();

        assert_eq!(expected, actual, "mismatch after applying {change:?}");
    }

    index.close();
    Ok(())
}
