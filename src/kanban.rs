//! The kanban bounded pipeline (§4.1): a fixed number of reusable draft
//! slots caps how many messages are being parsed/put concurrently.

use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Kanban {
    total: usize,
    free: usize,
    pendings: VecDeque<PathBuf>,
}

impl Kanban {
    pub fn new(total: usize) -> Kanban {
        Kanban { total, free: total, pendings: VecDeque::new() }
    }

    /// Takes a slot if one is free; otherwise parks `path` on
    /// `rfc822_pendings` for later rescheduling.
    pub fn take_slot_or_park(&mut self, path: PathBuf) -> bool {
        if self.free > 0 {
            self.free -= 1;
            true
        } else {
            self.pendings.push_back(path);
            false
        }
    }

    /// Returns a slot to the free list on PUT completion. Invariant:
    /// `in_use + free == total` always holds after this call.
    pub fn return_slot(&mut self) {
        debug_assert!(self.free < self.total, "returned more slots than exist");
        self.free += 1;
    }

    /// §4.1 rescheduling hysteresis: pop one parked path to retry, if any
    /// and a slot is free. Callers invoke this after a batch of PUTs
    /// completes and in-flight count has dropped below `total / 2`, or when
    /// the DB worker is idle.
    pub fn reschedule_one(&mut self) -> Option<PathBuf> {
        if self.free == 0 {
            return None;
        }
        let path = self.pendings.pop_front()?;
        self.free -= 1;
        Some(path)
    }

    pub fn in_use(&self) -> usize {
        self.total - self.free
    }

    pub fn free(&self) -> usize {
        self.free
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn below_half(&self) -> bool {
        self.in_use() < self.total / 2
    }

    pub fn pending_count(&self) -> usize {
        self.pendings.len()
    }

    pub fn check_invariant(&self) {
        debug_assert_eq!(self.in_use() + self.free, self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_in_use_plus_free_always_equals_total() {
        let mut k = Kanban::new(4);
        assert!(k.take_slot_or_park("/a".into()));
        assert!(k.take_slot_or_park("/b".into()));
        k.check_invariant();
        k.return_slot();
        k.check_invariant();
        assert_eq!(k.in_use() + k.free(), 4);
    }

    #[test]
    fn exhausted_slots_park_on_pendings() {
        let mut k = Kanban::new(1);
        assert!(k.take_slot_or_park("/a".into()));
        assert!(!k.take_slot_or_park("/b".into()));
        assert_eq!(k.pending_count(), 1);

        k.return_slot();
        let rescheduled = k.reschedule_one();
        assert_eq!(rescheduled, Some(PathBuf::from("/b")));
        assert_eq!(k.pending_count(), 0);
    }
}
