// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A single posting: one occurrence of `hash` inside document `id` (§3).
///
/// Ordered lexicographically by `(hash, id)`, which is the order postings
/// are stored in within a block (§4.1) and the order the merger (§4.5)
/// consumes them in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Item {
    /// The fingerprint hash token.
    pub hash: u32,
    /// The document id this occurrence belongs to.
    pub id: u32,
}

impl Item {
    #[must_use]
    pub fn new(hash: u32, id: u32) -> Self {
        Self { hash, id }
    }
}

/// Identity and merge-lineage of a segment (§3).
///
/// A fresh segment produced by a single commit or memory-merge has
/// `included_merges = 0`. Merging a contiguous run of segments folds their
/// version ranges into one `SegmentId` whose range covers all of them,
/// which is what lets [`SegmentId::contains`] answer shadowing queries
/// without consulting the merge history itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    /// The version of the first single-commit or memory-merge segment
    /// this id's lineage starts at.
    pub version: u64,
    /// How many subsequent segments have been folded into this one via
    /// merges.
    pub included_merges: u64,
}

impl SegmentId {
    /// The id of the very first segment an empty index ever creates.
    #[must_use]
    pub fn first() -> Self {
        Self {
            version: 1,
            included_merges: 0,
        }
    }

    /// The id of the segment produced by the next single-commit write or
    /// memory-merge after `self`.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            version: self.version + self.included_merges + 1,
            included_merges: 0,
        }
    }

    /// The upper bound (inclusive) of the version range this id covers.
    #[must_use]
    pub fn max_version(self) -> u64 {
        self.version + self.included_merges
    }

    /// The id produced by merging the contiguous run of segments from
    /// `first` through `last` (inclusive) into one.
    #[must_use]
    pub fn merge(first: Self, last: Self) -> Self {
        Self {
            version: first.version,
            included_merges: last.max_version() - first.version,
        }
    }

    /// True if `child`'s version range is fully covered by `self`'s, i.e.
    /// `self` is (or subsumes, via a later merge) the segment that produced
    /// `child`.
    #[must_use]
    pub fn contains(self, child: Self) -> bool {
        child.version >= self.version && child.max_version() <= self.max_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn item_ordering_is_by_hash_then_id() {
        let mut items = vec![
            Item::new(5, 1),
            Item::new(1, 9),
            Item::new(1, 2),
            Item::new(5, 0),
        ];
        items.sort();
        assert_eq!(
            vec![Item::new(1, 2), Item::new(1, 9), Item::new(5, 0), Item::new(5, 1)],
            items
        );
    }

    #[test]
    fn segment_id_next() {
        let first = SegmentId::first();
        assert_eq!(SegmentId { version: 2, included_merges: 0 }, first.next());

        let merged = SegmentId { version: 1, included_merges: 2 };
        assert_eq!(SegmentId { version: 4, included_merges: 0 }, merged.next());
    }

    #[test]
    fn segment_id_merge_union_matches_next_invariant() {
        let a = SegmentId::first();
        let b = a.next();
        let merged = SegmentId::merge(a, b);

        // merge(a, next(a)) == a u next(a) as [version, version+included_merges] intervals
        assert_eq!(a.version, merged.version);
        assert_eq!(b.max_version(), merged.max_version());
    }

    #[test]
    fn segment_id_contains() {
        let a = SegmentId { version: 1, included_merges: 0 };
        let b = SegmentId { version: 2, included_merges: 0 };
        let merged = SegmentId::merge(a, b);

        assert!(merged.contains(a));
        assert!(merged.contains(b));
        assert!(merged.contains(merged));

        let outside = SegmentId { version: 3, included_merges: 0 };
        assert!(!merged.contains(outside));
    }
}
