// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{Acquire, Release},
    },
    Arc,
};

/// Thread-safe, monotonically increasing commit id generator.
///
/// The oplog (§4.7) hands out ids from this counter under `update_lock`
/// (§4.8), so ids are assigned in the same order commits are durably
/// recorded.
#[derive(Clone, Default, Debug)]
pub struct CommitIdCounter(Arc<AtomicU64>);

impl CommitIdCounter {
    /// Creates a new counter, resuming from some previously durable value.
    #[must_use]
    pub fn new(prev: u64) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the current value without incrementing.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Acquire)
    }

    /// Gets the next commit id.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Release) + 1
    }

    /// Sets the counter to an exact value, used during oplog recovery.
    pub fn set(&self, value: u64) {
        self.0.store(value, Release);
    }
}

#[cfg(test)]
mod tests {
    use super::CommitIdCounter;
    use test_log::test;

    #[test]
    fn starts_at_zero() {
        let counter = CommitIdCounter::default();
        assert_eq!(0, counter.get());
        assert_eq!(1, counter.next());
        assert_eq!(2, counter.next());
    }

    #[test]
    fn resumes_from_prior_value() {
        let counter = CommitIdCounter::new(41);
        assert_eq!(42, counter.next());
    }
}
