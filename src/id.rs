//! Global monotonic ID allocator.
//!
//! The source guards this counter with a spin lock since increments are
//! always short and uncontended; a single `AtomicU64` gives the same
//! guarantee without a lock at all, so that's what's used here.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IdSeq {
    counter: AtomicU64,
}

impl IdSeq {
    pub fn new() -> IdSeq {
        IdSeq {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next id. Never returns 0 (0 is reserved to mean "no id").
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let seq = IdSeq::new();
        let a = seq.next();
        let b = seq.next();
        let c = seq.next();
        assert!(a < b);
        assert!(b < c);
        assert_ne!(a, 0);
    }
}
