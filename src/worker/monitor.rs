//! The monitor worker (§4.5): watches registered folders for filesystem
//! changes and schedules a `Gather` once a folder has been quiet for
//! `monitor_delay` — the coalescing policy lives in `watch::FolderWatchSet`,
//! this module only wires it to a real backend.
//!
//! Uses `notify` + `notify-debouncer-full`, matching the watcher crate the
//! pack's desktop-indexing examples use for recursive directory watches.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};

use crate::daemon::Shared;
use crate::folders;
use crate::task::Task;

pub fn run(shared: Arc<Shared>) {
    let inbox = shared.monitor_inbox.clone();
    log::info!("monitor worker starting");

    let (event_tx, event_rx) = mpsc::channel::<PathBuf>();
    let mut debouncer = match new_debouncer(
        Duration::from_millis(shared.config.monitor_delay_ms.max(50)),
        None,
        move |result: DebounceEventResult| {
            if let Ok(events) = result {
                for event in events {
                    for path in event.event.paths {
                        let _ = event_tx.send(path);
                    }
                }
            }
        },
    ) {
        Ok(d) => d,
        Err(e) => {
            log::error!("failed to start filesystem watch backend: {e}");
            return;
        }
    };

    let delay = Duration::from_millis(shared.config.monitor_delay_ms);

    'outer: loop {
        inbox.wait(Some(delay.as_millis().clamp(50, 2000) as i32));
        inbox.drain_wake();

        while let Some(envelope) = inbox.pop() {
            match envelope.task {
                Task::Stop => break 'outer,
                Task::Suspend => inbox.set_suspended(true),
                Task::Resume => inbox.set_suspended(false),
                Task::MonitorFolder { path } => register_folder(&shared, &mut debouncer, path),
                other => log::warn!("monitor worker received an unexpected task: {other:?}"),
            }
        }

        drain_fs_events(&shared, &event_rx);

        let ready = {
            let mut watches = shared.watches.lock().expect("watches poisoned");
            watches.take_ready(delay, Instant::now())
        };
        for folder in ready {
            if folder == shared.config.maildir {
                rescan_root(&shared, &mut debouncer);
                continue;
            }
            let gather_id = shared.id_seq.next();
            log::debug!("monitor scheduling gather for {}", folder.display());
            shared.submit(&shared.db_inbox, Task::Gather { folder, gather_id });
        }
    }

    log::info!("monitor worker exiting");
}

/// §4.5: when the maildir root itself goes quiet, re-enumerate its direct
/// subdirectories instead of gathering the root as if it were a folder —
/// any new ones get their own watch (and, via `register_folder`'s own
/// `Task::MonitorFolder` caller elsewhere, their own gather).
fn rescan_root(shared: &Arc<Shared>, debouncer: &mut Debouncer<notify::RecommendedWatcher, RecommendedCache>) {
    let catalogue_folders: Vec<PathBuf> = shared.catalogue.lock().expect("catalogue poisoned").folders().collect();
    let subdirs = folders::enumerate_known_folders(&shared.config.maildir, &catalogue_folders, &shared.config.folders);
    for path in subdirs {
        let is_new = !shared.watches.lock().expect("watches poisoned").is_registered(&path);
        if is_new {
            log::info!("new top-level folder {} discovered under maildir root", path.display());
            register_folder(shared, debouncer, path.clone());
            let gather_id = shared.id_seq.next();
            shared.submit(&shared.db_inbox, Task::Gather { folder: path, gather_id });
        }
    }
}

fn register_folder(shared: &Arc<Shared>, debouncer: &mut Debouncer<notify::RecommendedWatcher, RecommendedCache>, path: PathBuf) {
    let mut watches = shared.watches.lock().expect("watches poisoned");
    if watches.is_registered(&path) {
        return;
    }
    watches.register(path.clone());
    drop(watches);
    if let Err(e) = debouncer.watch(&path, RecursiveMode::Recursive) {
        log::warn!("failed to watch {}: {e}", path.display());
    }
}

/// Maps each raw filesystem event path to the nearest registered ancestor
/// folder and marks it dirty; events outside any registered folder (a
/// sibling file notify reported alongside a real hit) are ignored.
fn drain_fs_events(shared: &Arc<Shared>, rx: &mpsc::Receiver<PathBuf>) {
    let now = Instant::now();
    let mut watches = shared.watches.lock().expect("watches poisoned");
    while let Ok(path) = rx.try_recv() {
        if let Some(folder) = nearest_registered_ancestor(&watches, &path) {
            watches.mark_dirty(&folder, now);
        }
    }
}

fn nearest_registered_ancestor(watches: &crate::watch::FolderWatchSet, path: &Path) -> Option<PathBuf> {
    let mut candidates = watches.registered_paths();
    candidates.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    candidates.into_iter().find(|folder| path.starts_with(folder))
}
