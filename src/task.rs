//! Task types and the per-worker priority queue with its wake socket.
//!
//! Each worker owns a FIFO guarded by a mutex plus a connected pair of Unix
//! domain sockets used purely as an eventfd-equivalent: `submit` writes one
//! byte to the write half to wake the worker's blocking `recv`/`poll` loop;
//! the worker drains the read half before touching the queue. This is the
//! direct port of the source's socketpair-based interrupt idiom (§4.1/§5),
//! kept instead of collapsing to a plain channel so that a worker's event
//! loop can multiplex the wake signal against other descriptors it watches
//! (the monitor worker's watch backend, the main worker's control socket).

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutform {
    CompatVu,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCond {
    pub phrase: String,
    pub attrs: Vec<(String, String)>,
    pub order: Option<String>,
    pub max: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum Task {
    Stop,
    Suspend,
    Resume,
    SyncDb,
    Inform { src_id: u64, payload: Vec<u8> },
    Gather { folder: PathBuf, gather_id: u64 },
    MonitorFolder { path: PathBuf },
    Search { cond: SearchCond, outform: SearchOutform },
    Smew { msgid: String, folder_scope: Option<PathBuf> },
    Rfc822Draft { path: PathBuf },
    Rfc822PutDb { path: PathBuf },
    Rfc822DelDb { path: PathBuf },
}

impl Task {
    /// §4.1 priority rule: everything except the per-message draft/put/del
    /// trio is high-priority.
    pub fn is_high_priority(&self) -> bool {
        !matches!(
            self,
            Task::Rfc822Draft { .. } | Task::Rfc822PutDb { .. } | Task::Rfc822DelDb { .. }
        )
    }

    pub fn referenced_path(&self) -> Option<&PathBuf> {
        match self {
            Task::Rfc822Draft { path } | Task::Rfc822PutDb { path } | Task::Rfc822DelDb { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub id: u64,
    pub high_priority: bool,
    pub task: Task,
}

struct Queue {
    items: VecDeque<TaskEnvelope>,
}

/// A worker's inbound task queue plus its wake socket.
pub struct TaskInbox {
    queue: Mutex<Queue>,
    wake_writer: UnixStream,
    wake_reader: UnixStream,
    suspended: AtomicBool,
}

impl TaskInbox {
    pub fn new() -> std::io::Result<TaskInbox> {
        let (wake_writer, wake_reader) = UnixStream::pair()?;
        wake_reader.set_nonblocking(true)?;
        Ok(TaskInbox {
            queue: Mutex::new(Queue { items: VecDeque::new() }),
            wake_writer,
            wake_reader,
            suspended: AtomicBool::new(false),
        })
    }

    /// A file descriptor the worker's event loop can poll/select alongside
    /// whatever else it watches.
    pub fn wake_fd(&self) -> &UnixStream {
        &self.wake_reader
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// §4.1 Submit: lock, insert at head if high-priority else tail, unlock,
    /// wake the worker. A transient write failure on the wake socket is
    /// logged and otherwise ignored — the task is already queued, so at
    /// worst the worker notices it on its next unrelated wake.
    pub fn submit(&self, envelope: TaskEnvelope) {
        {
            let mut q = self.queue.lock().expect("task queue poisoned");
            if envelope.high_priority {
                // Head-insertion places the new high-priority task after any
                // existing high-priority run at the head, preserving FIFO
                // among high-priority tasks.
                let split = q
                    .items
                    .iter()
                    .position(|t| !t.high_priority)
                    .unwrap_or(q.items.len());
                q.items.insert(split, envelope);
            } else {
                q.items.push_back(envelope);
            }
        }
        if let Err(e) = (&self.wake_writer).write_all(&[0u8]) {
            log::warn!("failed to write worker wake byte: {e}");
        }
    }

    /// Blocks the calling thread's event loop until the wake socket is
    /// readable or `timeout_ms` elapses (`None` blocks indefinitely). This
    /// is the per-worker event loop's I/O wait (§5): the only place a
    /// worker thread blocks.
    pub fn wait(&self, timeout_ms: Option<i32>) -> bool {
        let fd = self.wake_reader.as_raw_fd();
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let timeout = timeout_ms.unwrap_or(-1);
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
        rc > 0 && (pfd.revents & libc::POLLIN) != 0
    }

    /// Drains the wake socket's pending bytes. Call once per wake before
    /// popping tasks.
    pub fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_reader).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    /// §4.1 Drain: pop one task. While suspended, only high-priority tasks
    /// are dequeued; low-priority ones stay at the head until `Resume`.
    pub fn pop(&self) -> Option<TaskEnvelope> {
        let mut q = self.queue.lock().expect("task queue poisoned");
        if self.is_suspended() {
            let idx = q.items.iter().position(|t| t.high_priority)?;
            Some(q.items.remove(idx).unwrap())
        } else {
            q.items.pop_front()
        }
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Every queued task, front to back, freeing the queue. Used on `Stop`
    /// to account for outstanding low-priority tasks being dropped rather
    /// than silently leaked.
    pub fn drain_all(&self) -> Vec<TaskEnvelope> {
        let mut q = self.queue.lock().expect("task queue poisoned");
        q.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("task queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(id: u64, task: Task) -> TaskEnvelope {
        TaskEnvelope { id, high_priority: task.is_high_priority(), task }
    }

    #[test]
    fn high_priority_tasks_stay_fifo_among_themselves() {
        let inbox = TaskInbox::new().unwrap();
        inbox.submit(env(1, Task::Rfc822Draft { path: "/a".into() }));
        inbox.submit(env(2, Task::Suspend));
        inbox.submit(env(3, Task::Resume));
        inbox.drain_wake();

        // Suspend and Resume are high priority and both jump ahead of the
        // earlier-submitted low-priority draft, in submission order.
        let first = inbox.pop().unwrap();
        let second = inbox.pop().unwrap();
        let third = inbox.pop().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(second.id, 3);
        assert_eq!(third.id, 1);
    }

    #[test]
    fn suspended_worker_only_dequeues_high_priority() {
        let inbox = TaskInbox::new().unwrap();
        inbox.set_suspended(true);
        inbox.submit(env(1, Task::Rfc822Draft { path: "/a".into() }));
        inbox.submit(env(2, Task::Search { cond: SearchCond::default(), outform: SearchOutform::CompatVu }));
        inbox.drain_wake();

        let popped = inbox.pop().unwrap();
        assert_eq!(popped.id, 2);
        assert!(inbox.pop().is_none());
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn drain_all_frees_every_queued_task() {
        let inbox = TaskInbox::new().unwrap();
        inbox.submit(env(1, Task::Rfc822Draft { path: "/a".into() }));
        inbox.submit(env(2, Task::Rfc822Draft { path: "/b".into() }));
        let drained = inbox.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(inbox.is_empty());
    }
}
