// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tiered merge policy (§4.6): decides which contiguous run of segments,
//! if any, should be folded into one by the next memory- or file-merge
//! pass. A geometric level-size budget plus a greedy window selection,
//! applied to a flat, ordered segment list rather than per-level buckets.

/// A contiguous, half-open range of segment indices selected for merging.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Candidate {
    /// Index of the first segment in the window (inclusive).
    pub start: usize,
    /// Index one past the last segment in the window (exclusive).
    pub end: usize,
}

impl Candidate {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Tunable knobs for the tiered policy (§4.6), mirrored 1:1 onto
/// [`crate::config::IndexConfig`].
#[derive(Copy, Clone, Debug)]
pub struct TieredMergePolicy {
    /// Segments below this size don't count against the level budget.
    pub min_segment_size: usize,
    /// Segments at or above this size are excluded from merge candidacy.
    pub max_segment_size: usize,
    /// Level fan-out: how many segments of one level's size make up the
    /// next level up.
    pub segments_per_level: usize,
    /// Maximum number of sources a single merge may consume.
    pub segments_per_merge: usize,
    /// Hard cap on segment count, beyond which a merge is forced.
    pub max_segments: usize,
}

impl TieredMergePolicy {
    /// The smallest level size the budget formula will ever produce,
    /// floored at `min_segment_size` so a near-empty index never reports
    /// an unbounded number of "allowed" segments.
    fn floor(&self) -> usize {
        self.min_segment_size.max(1)
    }

    /// Computes `allowed`, the number of segments the index may carry at
    /// its current total size before a merge is warranted (§4.6).
    fn allowed_segment_count(&self, total_size: usize) -> usize {
        let floor = self.floor();

        let max_level = self.max_segment_size.min((total_size / 2).max(floor));
        let min_level = (max_level / 1000).max(floor);

        #[allow(clippy::cast_precision_loss)]
        let ratio = (max_level as f64 / min_level as f64).max(1.0);
        let allowed_levels = ratio.log2().max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let allowed = (allowed_levels * self.segments_per_level as f64).ceil() as usize;

        allowed.max(1)
    }

    /// The target size for a level that starts at list position
    /// `position`: grows geometrically every `segments_per_level`
    /// positions, capped at `max_segment_size`.
    fn level_size(&self, min_level: usize, position: usize) -> usize {
        let fanout = self.segments_per_level.max(1);
        let level = position / fanout;
        let size = min_level.saturating_mul(2usize.saturating_pow(level.min(63) as u32));
        size.min(self.max_segment_size).max(min_level)
    }

    /// Selects the contiguous window of segments to merge next, or `None`
    /// if the list is within budget (§4.6).
    ///
    /// `sizes` and `excluded` must be the same length and in list order;
    /// `excluded[i]` is true when segment `i` is already at or above
    /// `max_segment_size`, or is a frozen memory segment — either way it
    /// can never participate in a merge.
    #[must_use]
    pub fn select(&self, sizes: &[usize], excluded: &[bool]) -> Option<Candidate> {
        assert_eq!(sizes.len(), excluded.len());
        let count = sizes.len();
        if count < 2 {
            return None;
        }

        let total: usize = sizes.iter().sum();
        let allowed = self.allowed_segment_count(total);

        if count <= allowed && count <= self.max_segments {
            return None;
        }

        let floor = self.floor();
        let max_level = self.max_segment_size.min((total / 2).max(floor));
        let min_level = (max_level / 1000).max(floor);

        let max_window = self.segments_per_merge.max(2).min(count);

        let mut best: Option<(i64, Candidate)> = None;
        for start in 0..count {
            let mut sum = 0usize;
            for len in 1..=max_window {
                let end = start + len;
                if end > count {
                    break;
                }

                if excluded[end - 1] || sizes[end - 1] >= self.max_segment_size {
                    break;
                }
                sum += sizes[end - 1];

                if len < 2 {
                    continue;
                }
                if excluded[start..end].iter().any(|&x| x) {
                    continue;
                }

                #[allow(clippy::cast_possible_wrap)]
                let score = sum as i64 - self.level_size(min_level, start) as i64;

                let candidate = Candidate { start, end };
                match &best {
                    Some((best_score, _)) if *best_score <= score => {}
                    _ => best = Some((score, candidate)),
                }
            }
        }

        best.map(|(_, candidate)| candidate)
    }
}
