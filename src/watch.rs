//! Folder watch bookkeeping for the monitor worker (§4.5): which folders are
//! registered, when each was last dirtied, and the parent-child
//! subsumption rule that coalesces a directory-and-its-children event storm
//! into a single gather of the ancestor.
//!
//! The OS-level watch back-end (`notify` + `notify-debouncer-full`) lives in
//! `worker::monitor`; this module is pure bookkeeping so the coalescing
//! rules can be unit tested without a real filesystem watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct FolderWatchSet {
    folders: HashMap<PathBuf, Option<Instant>>,
}

impl FolderWatchSet {
    pub fn new() -> FolderWatchSet {
        FolderWatchSet { folders: HashMap::new() }
    }

    pub fn register(&mut self, path: PathBuf) {
        self.folders.entry(path).or_insert(None);
    }

    pub fn unregister(&mut self, path: &Path) {
        self.folders.remove(path);
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.folders.contains_key(path)
    }

    pub fn mark_dirty(&mut self, path: &Path, now: Instant) {
        if let Some(slot) = self.folders.get_mut(path) {
            *slot = Some(now);
        }
    }

    /// Next tick to schedule: `delay - max(now - last_event_time, 0)` across
    /// every dirty folder, i.e. the soonest a dirty folder will cross the
    /// coalescing threshold. `None` means nothing is dirty.
    pub fn next_wakeup(&self, delay: Duration, now: Instant) -> Option<Duration> {
        self.folders
            .values()
            .filter_map(|t| *t)
            .map(|last| {
                let elapsed = now.saturating_duration_since(last);
                delay.saturating_sub(elapsed)
            })
            .min()
    }

    /// Folders whose dirty age has reached `delay`, with parent-child
    /// subsumption applied: if A is an ancestor of dirty B, A absorbs the
    /// later of the two `last_event_time`s and B is cleared (not reported).
    /// Clears every folder it returns.
    pub fn take_ready(&mut self, delay: Duration, now: Instant) -> Vec<PathBuf> {
        let mut dirty: Vec<(PathBuf, Instant)> = self
            .folders
            .iter()
            .filter_map(|(p, t)| t.map(|last| (p.clone(), last)))
            .filter(|(_, last)| now.saturating_duration_since(*last) >= delay)
            .collect();
        dirty.sort_by_key(|(p, _)| p.components().count());

        let mut subsumed: Vec<bool> = vec![false; dirty.len()];
        for i in 0..dirty.len() {
            if subsumed[i] {
                continue;
            }
            for j in 0..dirty.len() {
                if i == j || subsumed[j] {
                    continue;
                }
                if dirty[j].0.starts_with(&dirty[i].0) && dirty[j].0 != dirty[i].0 {
                    if dirty[j].1 > dirty[i].1 {
                        dirty[i].1 = dirty[j].1;
                    }
                    subsumed[j] = true;
                }
            }
        }

        let mut ready = Vec::new();
        for (idx, (path, _)) in dirty.into_iter().enumerate() {
            if let Some(slot) = self.folders.get_mut(&path) {
                *slot = None;
            }
            if !subsumed[idx] {
                ready.push(path);
            }
        }
        ready
    }

    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.folders.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_becomes_ready_after_delay_elapses() {
        let mut set = FolderWatchSet::new();
        set.register("/mail/inbox".into());
        let t0 = Instant::now();
        set.mark_dirty(Path::new("/mail/inbox"), t0);

        let not_yet = set.take_ready(Duration::from_millis(500), t0);
        assert!(not_yet.is_empty());

        let later = t0 + Duration::from_millis(600);
        let ready = set.take_ready(Duration::from_millis(500), later);
        assert_eq!(ready, vec![PathBuf::from("/mail/inbox")]);
    }

    #[test]
    fn parent_subsumes_dirty_child() {
        let mut set = FolderWatchSet::new();
        set.register("/mail/inbox".into());
        set.register("/mail/inbox/sub".into());
        let t0 = Instant::now();
        set.mark_dirty(Path::new("/mail/inbox"), t0);
        set.mark_dirty(Path::new("/mail/inbox/sub"), t0 + Duration::from_millis(100));

        let later = t0 + Duration::from_millis(700);
        let ready = set.take_ready(Duration::from_millis(500), later);
        assert_eq!(ready, vec![PathBuf::from("/mail/inbox")]);
    }

    #[test]
    fn repeated_writes_before_delay_elapses_coalesce_to_one_gather() {
        let mut set = FolderWatchSet::new();
        set.register("/mail/inbox".into());
        let t0 = Instant::now();
        for ms in [0, 50, 90] {
            set.mark_dirty(Path::new("/mail/inbox"), t0 + Duration::from_millis(ms));
        }
        let ready = set.take_ready(Duration::from_millis(500), t0 + Duration::from_millis(600));
        assert_eq!(ready, vec![PathBuf::from("/mail/inbox")]);
    }
}
