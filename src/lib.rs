//! `mailestd`: a full-text search daemon over a local Maildir-like mail
//! store. See `SPEC_FULL.md` for the component design this module layout
//! follows.

pub mod catalogue;
pub mod config;
pub mod daemon;
pub mod document;
pub mod error;
pub mod folders;
pub mod gather;
pub mod id;
pub mod index;
pub mod kanban;
pub mod logging;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod smew;
pub mod task;
pub mod timefmt;
pub mod walk;
pub mod watch;
pub mod worker;
