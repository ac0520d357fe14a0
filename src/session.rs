//! Per-connection client session state (§4.8), owned exclusively by the
//! main worker: read buffering, the idle timeout, and which outstanding
//! task (if any) a session is waiting on a reply for.
//!
//! The main worker is the only thread that ever touches a client's
//! `UnixStream`, so no locking is needed here; `Session` is plain local
//! state in the main worker's event loop, not behind a `Mutex`.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Instant;

use crate::config::{MAILESTCTL_CMD_MAX, MAILESTCTL_IDLE_TIMEOUT_SECS};
use crate::protocol::{self, Command};

pub struct Session {
    pub id: u64,
    stream: UnixStream,
    read_buf: Vec<u8>,
    pub last_activity: Instant,
    /// The db-worker task id this session is waiting on a reply for, if any.
    /// Invariant: at most one outstanding request per session (§4.8) — a
    /// session that sends a second command before the first replies gets a
    /// protocol error rather than a second in-flight task.
    pub awaiting: Option<u64>,
}

pub enum ReadOutcome {
    Commands(Vec<Command>),
    MalformedLine,
    Closed,
    WouldBlock,
}

impl Session {
    pub fn new(id: u64, stream: UnixStream) -> std::io::Result<Session> {
        stream.set_nonblocking(true)?;
        Ok(Session { id, stream, read_buf: Vec::new(), last_activity: Instant::now(), awaiting: None })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn idle_deadline(&self) -> Instant {
        self.last_activity + std::time::Duration::from_secs(MAILESTCTL_IDLE_TIMEOUT_SECS)
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        now >= self.idle_deadline()
    }

    /// Reads whatever is available and extracts complete newline-terminated
    /// commands. Partial lines remain buffered for the next read.
    pub fn read_commands(&mut self) -> ReadOutcome {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                    if self.read_buf.len() > MAILESTCTL_CMD_MAX * 4 {
                        return ReadOutcome::MalformedLine;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return ReadOutcome::Closed,
            }
        }

        let mut commands = Vec::new();
        while let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.read_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            match protocol::parse_command(line) {
                Ok(cmd) => commands.push(cmd),
                Err(_) => return ReadOutcome::MalformedLine,
            }
        }
        if commands.is_empty() {
            ReadOutcome::WouldBlock
        } else {
            ReadOutcome::Commands(commands)
        }
    }

    pub fn write_reply(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(payload)?;
        self.stream.write_all(b"\n\n")
    }

    pub fn write_error(&mut self, msg: &str) -> std::io::Result<()> {
        self.stream.write_all(format!("ERR {msg}\n\n").as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_complete_line_and_buffers_a_partial_one() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut session = Session::new(1, a).unwrap();
        b.write_all(b"search hello\nsearch wo").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        match session.read_commands() {
            ReadOutcome::Commands(cmds) => {
                assert_eq!(cmds, vec![Command::Search { phrase: "hello".into() }]);
            }
            _ => panic!("expected one parsed command"),
        }
    }
}
