//! Gather contexts: per-request aggregate progress for the gather protocol
//! (§4.3). Owned by the DB worker.

use std::collections::HashMap;

/// Progress accounting for one user-facing "update +folder" request. Counts
/// use a single unsigned type throughout (replacing the source's signed/
/// unsigned `u_int` mix); wrap-around cannot happen within a gather's
/// lifetime since folder/put/del counts are bounded by the filesystem walk
/// that produced them.
#[derive(Debug, Clone)]
pub struct Gather {
    pub id: u64,
    pub target: String,
    /// The task id the requesting client's `Update` command was assigned;
    /// used as `src_id` when informing the completion back to the session.
    pub requester: u64,
    pub folders: u64,
    pub puts: u64,
    pub dels: u64,
    pub folders_done: u64,
    pub puts_done: u64,
    pub dels_done: u64,
    pub errmsg: Option<String>,
}

impl Gather {
    pub fn new(id: u64, target: String, requester: u64, folders: u64) -> Gather {
        Gather {
            id,
            target,
            requester,
            folders,
            puts: 0,
            dels: 0,
            folders_done: 0,
            puts_done: 0,
            dels_done: 0,
            errmsg: None,
        }
    }

    /// §4.3 completion rule.
    pub fn is_complete(&self) -> bool {
        self.errmsg.is_some()
            || (self.folders_done == self.folders
                && self.dels_done == self.dels
                && self.puts_done == self.puts)
    }

    pub fn check_invariants(&self) {
        debug_assert!(self.puts_done <= self.puts);
        debug_assert!(self.dels_done <= self.dels);
        debug_assert!(self.folders_done <= self.folders);
    }
}

/// The DB worker's live gather set, keyed by id.
#[derive(Debug, Default)]
pub struct GatherList {
    gathers: HashMap<u64, Gather>,
}

impl GatherList {
    pub fn new() -> GatherList {
        GatherList { gathers: HashMap::new() }
    }

    pub fn insert(&mut self, gather: Gather) {
        self.gathers.insert(gather.id, gather);
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Gather> {
        self.gathers.get_mut(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Gather> {
        self.gathers.get(&id)
    }

    /// Removes and returns the gather if, after applying the caller's
    /// update, it has reached completion. The gather context is destroyed
    /// exactly once, on whichever event drives the last counter home.
    pub fn take_if_complete(&mut self, id: u64) -> Option<Gather> {
        let complete = self.gathers.get(&id).map(Gather::is_complete).unwrap_or(false);
        if complete { self.gathers.remove(&id) } else { None }
    }

    /// §4.7 db_error: every live gather gets a terminal error, to be
    /// drained and informed to their requesters by the caller.
    pub fn set_all_errmsg(&mut self, msg: &str) -> Vec<Gather> {
        for g in self.gathers.values_mut() {
            g.errmsg = Some(msg.to_string());
        }
        let ids: Vec<u64> = self.gathers.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.gathers.remove(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.gathers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gathers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_completes_only_when_every_counter_hits_target() {
        let mut gathers = GatherList::new();
        gathers.insert(Gather::new(1, "+inbox".into(), 100, 1));
        {
            let g = gathers.get_mut(1).unwrap();
            g.puts = 2;
            g.dels = 1;
        }
        assert!(gathers.take_if_complete(1).is_none());

        {
            let g = gathers.get_mut(1).unwrap();
            g.puts_done = 2;
            g.dels_done = 1;
            g.folders_done = 1;
        }
        let done = gathers.take_if_complete(1).unwrap();
        assert!(done.is_complete());
        assert!(gathers.get(1).is_none());
    }

    #[test]
    fn db_error_sets_errmsg_on_every_live_gather() {
        let mut gathers = GatherList::new();
        gathers.insert(Gather::new(1, "+inbox".into(), 100, 1));
        gathers.insert(Gather::new(2, "+sent".into(), 200, 1));
        let terminal = gathers.set_all_errmsg("Database broken");
        assert_eq!(terminal.len(), 2);
        assert!(terminal.iter().all(|g| g.errmsg.as_deref() == Some("Database broken")));
        assert!(gathers.is_empty());
    }
}
