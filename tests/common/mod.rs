//! Shared test fixtures: an in-memory `FakeIndex` and helpers to stand up a
//! `Shared`/`Daemon` pair without touching `tantivy` or a real control
//! socket, per SPEC_FULL.md §8's test-tooling note.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use mailestd_lib::catalogue::Catalogue;
use mailestd_lib::config::ResolvedConfig;
use mailestd_lib::daemon::{Daemon, Shared};
use mailestd_lib::document::Document;
use mailestd_lib::error::IndexError;
use mailestd_lib::gather::GatherList;
use mailestd_lib::id::IdSeq;
use mailestd_lib::index::{MailIndex, ATTR_URI};
use mailestd_lib::kanban::Kanban;
use mailestd_lib::parser::HeaderOnlyParser;
use mailestd_lib::task::{SearchCond, TaskInbox};
use mailestd_lib::watch::FolderWatchSet;

#[derive(Default)]
pub struct FakeIndex {
    docs: Mutex<HashMap<u64, Document>>,
    next_id: AtomicU64,
    puts_seen: AtomicU64,
    /// Fail the put whose 1-based ordinal equals this value, if set.
    pub fail_put_ordinal: Option<u64>,
}

impl FakeIndex {
    pub fn new() -> FakeIndex {
        FakeIndex { next_id: AtomicU64::new(1), ..Default::default() }
    }

    pub fn with_put_failure_at(ordinal: u64) -> FakeIndex {
        FakeIndex { next_id: AtomicU64::new(1), fail_put_ordinal: Some(ordinal), ..Default::default() }
    }
}

impl MailIndex for FakeIndex {
    fn open_read(&mut self) -> Result<(), IndexError> {
        Ok(())
    }
    fn open_write(&mut self) -> Result<(), IndexError> {
        Ok(())
    }
    fn close(&mut self) -> Result<(), IndexError> {
        Ok(())
    }

    fn put_doc(&mut self, doc: &Document) -> Result<u64, IndexError> {
        let ordinal = self.puts_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_put_ordinal == Some(ordinal) {
            return Err(IndexError::Write("injected failure".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.docs.lock().unwrap().insert(id, doc.clone());
        Ok(id)
    }

    fn delete_doc(&mut self, id: u64) -> Result<(), IndexError> {
        self.docs.lock().unwrap().remove(&id);
        Ok(())
    }

    fn get_doc(&self, id: u64) -> Result<Option<Document>, IndexError> {
        Ok(self.docs.lock().unwrap().get(&id).cloned())
    }

    fn uri_to_id(&self, uri: &str) -> Result<Option<u64>, IndexError> {
        Ok(self.search_by_attr(ATTR_URI, uri)?.into_iter().next())
    }

    fn search(&self, cond: &SearchCond) -> Result<Vec<u64>, IndexError> {
        let needle = cond.phrase.to_ascii_lowercase();
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d)| d.body.to_ascii_lowercase().contains(&needle))
            .map(|(id, _)| *id)
            .collect())
    }

    fn search_by_attr(&self, attr: &str, value: &str) -> Result<Vec<u64>, IndexError> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d)| d.attr(attr) == Some(value))
            .map(|(id, _)| *id)
            .collect())
    }

    fn iter_from(&self, cursor: Option<u64>, limit: usize) -> Result<Vec<(u64, Document)>, IndexError> {
        let mut out: Vec<(u64, Document)> = self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| cursor.map(|c| **id > c).unwrap_or(true))
            .map(|(id, d)| (*id, d.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out.truncate(limit);
        Ok(out)
    }

    fn flush(&mut self) -> Result<(), IndexError> {
        Ok(())
    }
    fn optimize(&mut self) -> Result<(), IndexError> {
        Ok(())
    }
    fn used_cache_size(&self) -> u64 {
        self.docs.lock().unwrap().len() as u64
    }
    fn should_optimize(&self) -> bool {
        false
    }
}

pub fn resolved_config(maildir: &std::path::Path) -> ResolvedConfig {
    ResolvedConfig {
        debug: true,
        maildir: maildir.to_path_buf(),
        db_path: maildir.join(".mailest.db"),
        sock_path: maildir.join(".mailest.sock"),
        log_path: None,
        log_size: 0,
        log_count: 0,
        trim_size: 128 * 1024,
        rfc822_task_max: 4,
        suffixes: vec![".mew".to_string()],
        folders: Vec::new(),
        monitor: false,
        monitor_delay_ms: 50,
    }
}

pub fn build_daemon(maildir: &std::path::Path, index: FakeIndex) -> Arc<Daemon> {
    let shared = Arc::new(Shared {
        kanban: Mutex::new(Kanban::new(4)),
        config: resolved_config(maildir),
        id_seq: IdSeq::new(),
        catalogue: Mutex::new(Catalogue::new()),
        gathers: Mutex::new(GatherList::new()),
        index: Mutex::new(Box::new(index) as Box<dyn MailIndex>),
        parser: Box::new(HeaderOnlyParser),
        watches: Mutex::new(FolderWatchSet::new()),
        db_inbox: Arc::new(TaskInbox::new().unwrap()),
        main_inbox: Arc::new(TaskInbox::new().unwrap()),
        monitor_inbox: Arc::new(TaskInbox::new().unwrap()),
        sync_prev: Mutex::new(None),
        db_sync_time: Default::default(),
        curr_epoch: Default::default(),
        gather_pendings: Mutex::new(Vec::new()),
        drafts: Mutex::new(HashMap::new()),
        initial_sync_done: Default::default(),
    });
    Arc::new(Daemon::new(shared))
}

/// Drains every `Inform` payload currently queued on the main inbox as
/// UTF-8 text, without spinning up the main worker's socket machinery.
pub fn drain_informs(daemon: &Daemon) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(envelope) = daemon.shared.main_inbox.pop() {
        if let mailestd_lib::task::Task::Inform { payload, .. } = envelope.task {
            out.push(String::from_utf8_lossy(&payload).into_owned());
        }
    }
    out
}

pub fn spawn_db_worker(daemon: &Arc<Daemon>) -> std::thread::JoinHandle<()> {
    let shared = daemon.shared.clone();
    std::thread::spawn(move || mailestd_lib::worker::db::run(shared))
}
