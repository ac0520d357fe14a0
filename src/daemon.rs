//! Shared daemon state and startup/shutdown orchestration.
//!
//! Replaces the source's cyclic `mailestd_this` back-pointer with a single
//! `Arc<Shared>` handle every worker thread holds; no raw pointers, no
//! unchecked back-references. `Shared`'s fields are each guarded
//! individually rather than behind one coarse lock, matching which
//! component owns which piece of state per §5's shared-resource policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use std::path::PathBuf;

use crate::catalogue::Catalogue;
use crate::config::ResolvedConfig;
use crate::document::Document;
use crate::gather::GatherList;
use crate::id::IdSeq;
use crate::index::MailIndex;
use crate::kanban::Kanban;
use crate::parser::MessageParser;
use crate::task::{Task, TaskEnvelope, TaskInbox};
use crate::watch::FolderWatchSet;

pub struct Shared {
    pub config: ResolvedConfig,
    pub id_seq: IdSeq,
    pub catalogue: Mutex<Catalogue>,
    pub gathers: Mutex<GatherList>,
    pub kanban: Mutex<Kanban>,
    pub index: Mutex<Box<dyn MailIndex>>,
    pub parser: Box<dyn MessageParser>,
    pub watches: Mutex<FolderWatchSet>,

    pub db_inbox: Arc<TaskInbox>,
    pub main_inbox: Arc<TaskInbox>,
    pub monitor_inbox: Arc<TaskInbox>,

    /// `sync_prev`: the `SyncDb` cursor. `None` means start from the
    /// beginning; per §9, the source's reset-then-free-on-null sequence is
    /// a cleanup no-op, so resetting this to `None` needs no companion
    /// dealloc step here either.
    pub sync_prev: Mutex<Option<u64>>,
    pub db_sync_time: AtomicU64,
    pub curr_epoch: AtomicU64,
    /// Gathers (folder, gather_id, requester) that arrived before the
    /// initial `SyncDb` completed; replayed once sync finishes, since
    /// walking a folder before the catalogue reflects the existing index
    /// would misreport already-indexed messages as new.
    pub gather_pendings: Mutex<Vec<(PathBuf, u64, u64)>>,
    /// Parsed drafts handed from the main worker to the DB worker, keyed by
    /// message path. The `Rfc822Draft`/`Rfc822PutDb` task pair carries only
    /// the path; the draft itself is staged here between the two stages
    /// rather than being threaded through the task payload, since the task
    /// enum is a plain sum type (no in-place tag rewrite as in the source).
    pub drafts: Mutex<HashMap<PathBuf, Option<Document>>>,
    pub initial_sync_done: std::sync::atomic::AtomicBool,
}

impl Shared {
    pub fn new_task_id(&self) -> u64 {
        self.id_seq.next()
    }

    pub fn next_epoch(&self) -> u64 {
        self.curr_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn submit(&self, inbox: &TaskInbox, task: Task) -> u64 {
        let id = self.new_task_id();
        let high_priority = task.is_high_priority();
        inbox.submit(TaskEnvelope { id, high_priority, task });
        id
    }

    /// §4.7 db_error: surfaces "Database broken" on every live gather and
    /// suspends every worker. Returns the terminal informs the caller
    /// should route back to requesters.
    pub fn db_error(&self) -> Vec<crate::gather::Gather> {
        log::error!("Database may be broken");
        let terminal = self.gathers.lock().expect("gathers poisoned").set_all_errmsg("Database broken");
        for inbox in [&self.db_inbox, &self.main_inbox, &self.monitor_inbox] {
            self.submit(inbox, Task::Suspend);
        }
        terminal
    }
}

pub struct Daemon {
    pub shared: Arc<Shared>,
    handles: Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl Daemon {
    pub fn new(shared: Arc<Shared>) -> Daemon {
        Daemon { shared, handles: Mutex::new(HashMap::new()) }
    }

    pub fn register_handle(&self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.lock().expect("handles poisoned").insert(name, handle);
    }

    /// Broadcasts `Stop` to every worker and joins their threads. Per §5,
    /// each worker finishes its current task, drains its queue (freeing
    /// tasks, §8 invariant 3), and exits.
    pub fn shutdown(&self) {
        for inbox in [&self.shared.db_inbox, &self.shared.main_inbox, &self.shared.monitor_inbox] {
            self.shared.submit(inbox, Task::Stop);
        }
        let mut handles = self.handles.lock().expect("handles poisoned");
        for (name, handle) in handles.drain() {
            if let Err(e) = handle.join() {
                log::error!("worker thread {name} panicked: {e:?}");
            }
        }
    }

    pub fn schedule_db_sync(&self) -> u64 {
        self.shared.submit(&self.shared.db_inbox, Task::SyncDb)
    }

    pub fn schedule_gather(&self, folder: &str) -> u64 {
        let gather_id = self.shared.id_seq.next();
        self.shared.submit(
            &self.shared.db_inbox,
            Task::Gather { folder: folder.into(), gather_id },
        )
    }

    pub fn schedule_search(&self, cond: crate::task::SearchCond) -> u64 {
        self.shared.submit(
            &self.shared.db_inbox,
            Task::Search { cond, outform: crate::task::SearchOutform::CompatVu },
        )
    }

    pub fn schedule_smew(&self, msgid: &str, folder_scope: Option<&str>) -> u64 {
        self.shared.submit(
            &self.shared.db_inbox,
            Task::Smew { msgid: msgid.to_string(), folder_scope: folder_scope.map(Into::into) },
        )
    }

    pub fn broadcast_suspend(&self) {
        for inbox in [&self.shared.db_inbox, &self.shared.main_inbox, &self.shared.monitor_inbox] {
            self.shared.submit(inbox, Task::Suspend);
        }
    }

    pub fn broadcast_resume(&self) {
        for inbox in [&self.shared.db_inbox, &self.shared.main_inbox, &self.shared.monitor_inbox] {
            self.shared.submit(inbox, Task::Resume);
        }
    }
}
