//! The main/parse worker (§4.1, §4.8): runs the draft pipeline (parse a
//! message file into a `Document`) and owns every client control-socket
//! connection. It is the only thread that ever touches a `UnixStream`
//! accepted from the control socket, so `Session` state needs no locking.
//!
//! The event loop multiplexes the task-inbox wake fd, the listening
//! socket, and every open session's fd through a single `libc::poll` call
//! per iteration — the same raw-poll idiom `TaskInbox::wait` uses, just
//! widened to more than one descriptor.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::daemon::Shared;
use crate::folders;
use crate::gather::Gather;
use crate::index::{ATTR_MDATE, ATTR_PARID, ATTR_URI};
use crate::protocol::Command;
use crate::session::{ReadOutcome, Session};
use crate::smew;
use crate::task::{SearchCond, SearchOutform, Task, TaskEnvelope};
use crate::timefmt;

pub fn run(shared: Arc<Shared>) {
    let inbox = shared.main_inbox.clone();
    log::info!("main worker starting");

    let listener = match setup_listener(&shared.config.sock_path) {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind control socket {}: {e}", shared.config.sock_path.display());
            return;
        }
    };

    let mut sessions: Vec<Session> = Vec::new();
    let mut pending: HashMap<u64, u64> = HashMap::new();
    let mut next_session_id: u64 = 1;

    'outer: loop {
        let timeout_ms = compute_timeout(&sessions);
        let ready = poll_round(inbox.wake_fd().as_raw_fd(), listener.as_raw_fd(), &sessions, timeout_ms);

        if ready.wake {
            inbox.drain_wake();
            while let Some(envelope) = inbox.pop() {
                if matches!(envelope.task, Task::Stop) {
                    break 'outer;
                }
                handle_task(&shared, envelope, &mut sessions, &mut pending);
            }
        }

        if ready.listener {
            accept_all(&listener, &mut sessions, &mut next_session_id);
        }

        for id in ready.session_ids {
            let idx = match sessions.iter().position(|s| s.id == id) {
                Some(i) => i,
                None => continue,
            };
            step_session(&shared, &mut sessions, idx, &mut pending);
        }

        let now = Instant::now();
        sessions.retain(|s| {
            let expired = s.is_idle(now);
            if expired {
                log::debug!("session {} idle timeout", s.id);
                pending.retain(|_, sid| *sid != s.id);
            }
            !expired
        });
    }

    log::info!("main worker stopping, closing {} session(s)", sessions.len());
    for session in &mut sessions {
        let _ = session.write_error("server shutting down");
    }
    let _ = std::fs::remove_file(&shared.config.sock_path);
    log::info!("main worker exiting");
}

fn setup_listener(sock_path: &std::path::Path) -> std::io::Result<UnixListener> {
    let _ = std::fs::remove_file(sock_path);
    let listener = UnixListener::bind(sock_path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn compute_timeout(sessions: &[Session]) -> i32 {
    let now = Instant::now();
    sessions
        .iter()
        .map(|s| s.idle_deadline().saturating_duration_since(now))
        .min()
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1)
}

struct PollReady {
    wake: bool,
    listener: bool,
    session_ids: Vec<u64>,
}

fn poll_round(wake_fd: RawFd, listener_fd: RawFd, sessions: &[Session], timeout_ms: i32) -> PollReady {
    let mut fds = vec![
        libc::pollfd { fd: wake_fd, events: libc::POLLIN, revents: 0 },
        libc::pollfd { fd: listener_fd, events: libc::POLLIN, revents: 0 },
    ];
    for s in sessions {
        fds.push(libc::pollfd { fd: s.fd(), events: libc::POLLIN, revents: 0 });
    }

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        return PollReady { wake: false, listener: false, session_ids: Vec::new() };
    }

    let wake = (fds[0].revents & libc::POLLIN) != 0;
    let listener = (fds[1].revents & libc::POLLIN) != 0;
    let session_ids = sessions
        .iter()
        .zip(fds.iter().skip(2))
        .filter(|(_, pfd)| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .map(|(s, _)| s.id)
        .collect();
    PollReady { wake, listener, session_ids }
}

fn accept_all(listener: &UnixListener, sessions: &mut Vec<Session>, next_id: &mut u64) {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let id = *next_id;
                *next_id += 1;
                match Session::new(id, stream) {
                    Ok(session) => {
                        log::debug!("session {id} connected");
                        sessions.push(session);
                    }
                    Err(e) => log::warn!("failed to accept control connection: {e}"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::warn!("accept failed: {e}");
                break;
            }
        }
    }
}

fn step_session(shared: &Arc<Shared>, sessions: &mut [Session], idx: usize, pending: &mut HashMap<u64, u64>) {
    let outcome = sessions[idx].read_commands();
    match outcome {
        ReadOutcome::Closed => {
            let id = sessions[idx].id;
            pending.retain(|_, sid| *sid != id);
            // Marked for removal by the caller's idle sweep would be wrong
            // here (the socket is already gone); shrink it out directly by
            // replacing it with a sentinel the idle sweep will also catch:
            // simplest is to mark it expired immediately.
            sessions[idx].last_activity = Instant::now() - Duration::from_secs(u64::MAX / 2);
        }
        ReadOutcome::WouldBlock => {}
        ReadOutcome::MalformedLine => {
            let _ = sessions[idx].write_error("malformed command");
        }
        ReadOutcome::Commands(cmds) => {
            for cmd in cmds {
                dispatch_command(shared, &mut sessions[idx], pending, cmd);
            }
        }
    }
}

fn dispatch_command(shared: &Arc<Shared>, session: &mut Session, pending: &mut HashMap<u64, u64>, cmd: Command) {
    if matches!(cmd, Command::Quit) {
        session.last_activity = Instant::now() - Duration::from_secs(u64::MAX / 2);
        return;
    }
    if session.awaiting.is_some() {
        let _ = session.write_error("previous request still pending");
        return;
    }

    let task_id = match cmd {
        Command::Search { phrase } => {
            let cond = SearchCond { phrase, attrs: Vec::new(), order: None, max: None };
            shared.submit(&shared.db_inbox, Task::Search { cond, outform: SearchOutform::CompatVu })
        }
        Command::Smew { msgid, folder } => shared.submit(
            &shared.db_inbox,
            Task::Smew { msgid, folder_scope: folder.map(PathBuf::from) },
        ),
        Command::Update { folder } => match expand_update_folder(shared, &folder) {
            Some(task_id) => task_id,
            None => {
                let _ = session.write_error(&format!("no folder matches {folder}"));
                return;
            }
        },
        Command::Sync => shared.submit(&shared.db_inbox, Task::SyncDb),
        Command::Quit => unreachable!("handled above"),
    };

    session.awaiting = Some(task_id);
    pending.insert(task_id, session.id);
}

/// §4.3's gather front-end: resolves the `Update` command's folder argument
/// against the maildir (empty-folder enumeration, `+folder`/glob/brace
/// expansion, absolute-path fallback — see `folders::resolve_folders`),
/// pre-creates the `Gather` context sized to the resolved folder count, and
/// submits one `Task::Gather` per resolved folder sharing that context.
/// Returns the task id the session should track for the completion inform,
/// or `None` if nothing matched.
fn expand_update_folder(shared: &Arc<Shared>, folder: &str) -> Option<u64> {
    let catalogue_folders: Vec<PathBuf> = shared.catalogue.lock().expect("catalogue poisoned").folders().collect();
    let resolved = folders::resolve_folders(&shared.config.maildir, &catalogue_folders, &shared.config.folders, folder);
    if resolved.is_empty() {
        return None;
    }

    let requester = shared.new_task_id();
    let gather_id = shared.id_seq.next();
    shared
        .gathers
        .lock()
        .expect("gathers poisoned")
        .insert(Gather::new(gather_id, folder.to_string(), requester, resolved.len() as u64));

    for path in resolved {
        shared.submit(&shared.db_inbox, Task::Gather { folder: path, gather_id });
    }
    Some(requester)
}

fn handle_task(
    shared: &Arc<Shared>,
    envelope: TaskEnvelope,
    sessions: &mut [Session],
    pending: &mut HashMap<u64, u64>,
) {
    match envelope.task {
        Task::Stop => unreachable!("handled by caller"),
        Task::Suspend => {
            log::info!("suspend requested");
            shared.main_inbox.set_suspended(true);
        }
        Task::Resume => {
            log::info!("resume requested");
            shared.main_inbox.set_suspended(false);
        }
        Task::Rfc822Draft { path } => handle_draft(shared, path),
        Task::Inform { src_id, payload } => deliver_inform(sessions, pending, src_id, payload),
        other => {
            log::warn!("main worker received an unexpected task: {other:?}");
        }
    }
}

fn deliver_inform(sessions: &mut [Session], pending: &mut HashMap<u64, u64>, src_id: u64, payload: Vec<u8>) {
    let Some(session_id) = pending.remove(&src_id) else {
        log::debug!("Inform for unknown or already-closed task {src_id}");
        return;
    };
    let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) else {
        return;
    };
    if let Err(e) = session.write_reply(&payload) {
        log::warn!("failed to deliver reply to session {session_id}: {e}");
    }
    session.awaiting = None;
}

/// §4.4 draft pipeline: read the file, hand it to the configured parser,
/// trim the body to `trim_size`, stamp uri/mdate, extract the SMEW parent
/// id from In-Reply-To/References, then stage the result (or `None` on a
/// parse failure, which still must free the kanban slot) for the DB
/// worker's `Rfc822PutDb` step.
fn handle_draft(shared: &Arc<Shared>, path: PathBuf) {
    let doc = std::fs::read(&path)
        .ok()
        .and_then(|bytes| shared.parser.parse(&bytes))
        .map(|mut doc| {
            doc.slim(shared.config.trim_size);
            doc.add_attr(ATTR_URI, &format!("file://{}", path.display()));
            if let Ok(metadata) = std::fs::metadata(&path) {
                if let Ok(mtime) = metadata.modified() {
                    doc.add_attr(ATTR_MDATE, &timefmt::format_mdate(mtime));
                }
            }
            let in_reply_to = doc.attr("in-reply-to").unwrap_or("").to_string();
            let references = doc.attr("references").unwrap_or("").to_string();
            if let Some(parent) = smew::extract_parent_id(&in_reply_to, &references) {
                doc.add_attr(ATTR_PARID, &parent);
            }
            doc
        });

    if doc.is_none() {
        log::warn!("failed to read or parse {}", path.display());
    }

    shared.drafts.lock().expect("drafts poisoned").insert(path.clone(), doc);
    shared.submit(&shared.db_inbox, Task::Rfc822PutDb { path });
}
