//! The control-socket wire protocol (§6 "mailestctl interface").
//!
//! The source frames requests as a fixed-size binary `struct mailestc`
//! sized to `MAILESTCTL_CMD_MAX`. This implementation simplifies that to a
//! newline-delimited text protocol instead: one command per line, a
//! trailing blank line terminates the response. Still bounded by
//! `MAILESTCTL_CMD_MAX` so a misbehaving client can't make a session buffer
//! unbounded input; this divergence from the fixed binary frame is recorded
//! in DESIGN.md.

use crate::config::MAILESTCTL_CMD_MAX;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search { phrase: String },
    Smew { msgid: String, folder: Option<String> },
    Update { folder: String },
    Sync,
    Quit,
}

/// Parses one command line (already stripped of its trailing `\n`).
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    if line.len() > MAILESTCTL_CMD_MAX {
        return Err(ProtocolError::TooLong { field: "command", max: MAILESTCTL_CMD_MAX });
    }
    let line = line.trim();
    let mut parts = line.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_lowercase();
    let rest = parts.next().unwrap_or("").trim();

    match verb.as_str() {
        "search" if !rest.is_empty() => Ok(Command::Search { phrase: rest.to_string() }),
        "smew" if !rest.is_empty() => {
            let mut pieces = rest.splitn(2, char::is_whitespace);
            let msgid = pieces.next().unwrap_or("").to_string();
            let folder = pieces.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            Ok(Command::Smew { msgid, folder })
        }
        "update" if !rest.is_empty() => Ok(Command::Update { folder: rest.to_string() }),
        "sync" => Ok(Command::Sync),
        "quit" => Ok(Command::Quit),
        _ => Err(ProtocolError::Malformed(line.to_string())),
    }
}
