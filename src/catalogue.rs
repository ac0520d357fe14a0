//! The in-memory catalogue: an ordered `path -> Msg` map.
//!
//! Replaces the source's macro-generated red-black tree keyed by path; a
//! `BTreeMap<String, Msg>` gives the same path-order iteration and supports
//! the prefix range scans folder gathers need ("every message under folder
//! X") via `Catalogue::range_prefix`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

/// A known message file.
#[derive(Debug, Clone)]
pub struct Msg {
    pub path: PathBuf,
    /// Index-assigned id; 0 means "not indexed".
    pub index_id: u64,
    pub mtime: SystemTime,
    pub size: u64,
    /// Timestamp of the scan epoch that last observed this file on disk.
    pub fstime: u64,
    /// Draft attribute set is carried separately by in-flight tasks
    /// (`Task::Rfc822PutDb`); this flag records whether one is in flight.
    pub draft_pending: bool,
    /// True while any task references this message. Invariant: at most one
    /// task references a given message at a time.
    pub on_task: bool,
    pub gather_id: Option<u64>,
}

impl Msg {
    pub fn new(path: PathBuf, mtime: SystemTime, size: u64, fstime: u64) -> Msg {
        Msg {
            path,
            index_id: 0,
            mtime,
            size,
            fstime,
            draft_pending: false,
            on_task: false,
            gather_id: None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index_id != 0
    }
}

/// Ordered `path -> Msg` map. Mutated only by the DB worker and the main
/// worker, and only through task dispatch — per the concurrency model this
/// is never mutated concurrently by two workers, but a `Mutex` guards it at
/// the implementation level since this is, unlike the source, built on real
/// OS threads without a GC-free single-owner arena.
#[derive(Debug, Default)]
pub struct Catalogue {
    entries: BTreeMap<String, Msg>,
}

fn key_of(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Catalogue {
    pub fn new() -> Catalogue {
        Catalogue {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &std::path::Path) -> Option<&Msg> {
        self.entries.get(&key_of(path))
    }

    pub fn get_mut(&mut self, path: &std::path::Path) -> Option<&mut Msg> {
        self.entries.get_mut(&key_of(path))
    }

    pub fn insert(&mut self, msg: Msg) {
        self.entries.insert(key_of(&msg.path), msg);
    }

    pub fn remove(&mut self, path: &std::path::Path) -> Option<Msg> {
        self.entries.remove(&key_of(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All messages whose path starts with `prefix`, in path order. Used by
    /// the gather protocol's deletion pass: anything under a folder whose
    /// `fstime` didn't get refreshed this walk is a delete candidate.
    pub fn range_prefix<'a>(&'a self, prefix: &str) -> impl Iterator<Item = &'a Msg> + 'a {
        let upper = prefix_upper_bound(prefix);
        self.entries
            .range(prefix.to_string()..upper)
            .map(|(_, msg)| msg)
    }

    pub fn range_prefix_paths(&self, prefix: &str) -> Vec<PathBuf> {
        self.range_prefix(prefix).map(|m| m.path.clone()).collect()
    }

    pub fn folders(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let mut seen = std::collections::BTreeSet::new();
        self.entries.values().filter_map(move |m| {
            let parent = m.path.parent()?.to_path_buf();
            let key = key_of(&parent);
            if seen.insert(key) { Some(parent) } else { None }
        })
    }
}

/// Smallest string that is strictly greater than every string with `prefix`
/// as a prefix, so `prefix..upper` is an exact "starts with" range.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    for i in (0..bytes.len()).rev() {
        if bytes[i] < 0xff {
            bytes[i] += 1;
            bytes.truncate(i + 1);
            return String::from_utf8(bytes).unwrap_or_else(|_| format!("{prefix}\u{10ffff}"));
        }
    }
    format!("{prefix}\u{10ffff}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(path: &str) -> Msg {
        Msg::new(PathBuf::from(path), SystemTime::now(), 0, 0)
    }

    #[test]
    fn range_prefix_finds_only_matching_paths() {
        let mut cat = Catalogue::new();
        cat.insert(msg("/mail/inbox/1.mew"));
        cat.insert(msg("/mail/inbox/2.mew"));
        cat.insert(msg("/mail/inbox-archive/3.mew"));
        cat.insert(msg("/mail/sent/4.mew"));

        let under_inbox: Vec<_> = cat
            .range_prefix("/mail/inbox/")
            .map(|m| m.path.clone())
            .collect();
        assert_eq!(under_inbox.len(), 2);
        assert!(under_inbox.iter().all(|p| p.starts_with("/mail/inbox/")));
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let mut cat = Catalogue::new();
        cat.insert(msg("/mail/inbox/1.mew"));
        assert_eq!(cat.len(), 1);
        let removed = cat.remove(std::path::Path::new("/mail/inbox/1.mew"));
        assert!(removed.is_some());
        assert!(cat.is_empty());
    }
}
