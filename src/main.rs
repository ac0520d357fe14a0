//! Daemon entry point: parse the command line, resolve configuration,
//! open the index, spawn the three worker threads, and block until a
//! terminating signal arrives.

use std::sync::{Arc, Mutex};

use clap::Parser;

use mailestd_lib::catalogue::Catalogue;
use mailestd_lib::config::{Cli, ResolvedConfig};
use mailestd_lib::daemon::{Daemon, Shared};
use mailestd_lib::gather::GatherList;
use mailestd_lib::id::IdSeq;
use mailestd_lib::index::{MailIndex, TantivyIndex};
use mailestd_lib::kanban::Kanban;
use mailestd_lib::logging;
use mailestd_lib::parser::HeaderOnlyParser;
use mailestd_lib::task::TaskInbox;
use mailestd_lib::watch::FolderWatchSet;
use mailestd_lib::worker;

fn main() {
    let cli = Cli::parse();
    let resolved = match mailestd_lib::config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mailestd: config error: {e}");
            std::process::exit(1);
        }
    };

    if cli.check_only {
        println!("configuration OK: maildir={}", resolved.maildir.display());
        return;
    }

    logging::init(resolved.debug, resolved.log_path.as_deref(), resolved.log_size, resolved.log_count);
    log::info!("mailestd starting, maildir={}", resolved.maildir.display());

    let index = match TantivyIndex::open(&resolved.db_path) {
        Ok(i) => i,
        Err(e) => {
            log::error!("failed to open index at {}: {e}", resolved.db_path.display());
            std::process::exit(1);
        }
    };

    let shared = match build_shared(resolved, index) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    block_terminating_signals();

    let daemon = Arc::new(Daemon::new(shared.clone()));

    {
        let s = shared.clone();
        let handle = std::thread::Builder::new()
            .name("db-worker".into())
            .spawn(move || worker::db::run(s))
            .expect("failed to spawn db worker");
        daemon.register_handle("db", handle);
    }
    {
        let s = shared.clone();
        let handle = std::thread::Builder::new()
            .name("main-worker".into())
            .spawn(move || worker::main_worker::run(s))
            .expect("failed to spawn main worker");
        daemon.register_handle("main", handle);
    }
    {
        let s = shared.clone();
        let handle = std::thread::Builder::new()
            .name("monitor-worker".into())
            .spawn(move || worker::monitor::run(s))
            .expect("failed to spawn monitor worker");
        daemon.register_handle("monitor", handle);
    }

    daemon.schedule_db_sync();

    wait_for_terminating_signal();
    log::info!("shutdown signal received, stopping workers");
    daemon.shutdown();
    log::info!("mailestd exiting");
}

fn build_shared(config: ResolvedConfig, index: TantivyIndex) -> std::io::Result<Shared> {
    Ok(Shared {
        kanban: Mutex::new(Kanban::new(config.rfc822_task_max)),
        config,
        id_seq: IdSeq::new(),
        catalogue: Mutex::new(Catalogue::new()),
        gathers: Mutex::new(GatherList::new()),
        index: Mutex::new(Box::new(index) as Box<dyn MailIndex>),
        parser: Box::new(HeaderOnlyParser),
        watches: Mutex::new(FolderWatchSet::new()),
        db_inbox: Arc::new(TaskInbox::new()?),
        main_inbox: Arc::new(TaskInbox::new()?),
        monitor_inbox: Arc::new(TaskInbox::new()?),
        sync_prev: Mutex::new(None),
        db_sync_time: Default::default(),
        curr_epoch: Default::default(),
        gather_pendings: Mutex::new(Vec::new()),
        drafts: Mutex::new(std::collections::HashMap::new()),
        initial_sync_done: Default::default(),
    })
}

#[cfg(unix)]
fn block_terminating_signals() {
    use nix::sys::signal::{SigSet, Signal};
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGHUP);
    if let Err(e) = mask.thread_block() {
        log::warn!("failed to block terminating signals: {e}");
    }
}

#[cfg(unix)]
fn wait_for_terminating_signal() {
    use nix::sys::signal::{SigSet, Signal};
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGHUP);
    match mask.wait() {
        Ok(sig) => log::info!("received {sig:?}"),
        Err(e) => log::warn!("sigwait failed, shutting down anyway: {e}"),
    }
}
