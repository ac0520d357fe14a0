//! CLI surface and config-file layering.
//!
//! `clap` parses the command line, `toml`/`serde` parse the config file;
//! defaults < config file < CLI flags. `-n` runs this merge plus validation
//! and exits without starting any worker thread.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MAILESTD_TIMEFMT: &str = "%a, %d %b %Y %H:%M:%S +0000";
pub const MAILESTCTL_IDLE_TIMEOUT_SECS: u64 = 60;
pub const MAILESTCTL_CMD_MAX: usize = 1024;
pub const MAILESTD_TRIMSIZE: usize = 128 * 1024;
pub const MAILESTD_DBSYNC_NITER: u64 = 4000;
pub const DEFAULT_RFC822_TASK_MAX: usize = 64;
pub const DEFAULT_MONITOR_DELAY_MS: u64 = 500;
pub const DEFAULT_SUFFIX: &str = ".mew";

#[derive(Debug, Parser)]
#[command(name = "mailestd", about = "Full-text search daemon for local mail stores")]
pub struct Cli {
    /// Run in the foreground with debug logging to stderr.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Path to the config file.
    #[arg(short = 'f', value_name = "conf")]
    pub conf: Option<PathBuf>,

    /// Parse and validate the config, then exit.
    #[arg(short = 'n')]
    pub check_only: bool,

    /// Additional message-file suffix (repeatable).
    #[arg(short = 'S', value_name = "suffix")]
    pub suffix: Vec<String>,

    /// Root of the mail store. Defaults to `$HOME/Mail`.
    pub maildir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailestdConfig {
    pub debug: bool,
    pub sock_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub log_size: u64,
    pub log_count: u32,
    pub trim_size: usize,
    pub db_path: Option<PathBuf>,
    pub tasks: usize,
    pub maildir: Option<PathBuf>,
    pub suffixes: Vec<String>,
    pub folders: Vec<String>,
    pub monitor: bool,
    pub monitor_delay: u64,
}

impl Default for MailestdConfig {
    fn default() -> Self {
        MailestdConfig {
            debug: false,
            sock_path: None,
            log_path: None,
            log_size: 1024 * 1024,
            log_count: 3,
            trim_size: MAILESTD_TRIMSIZE,
            db_path: None,
            tasks: DEFAULT_RFC822_TASK_MAX,
            maildir: None,
            suffixes: vec![DEFAULT_SUFFIX.to_string()],
            folders: Vec::new(),
            monitor: true,
            monitor_delay: DEFAULT_MONITOR_DELAY_MS,
        }
    }
}

/// Fully resolved configuration: config file merged with CLI overrides and
/// defaulted paths filled in from the environment.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub debug: bool,
    pub maildir: PathBuf,
    pub db_path: PathBuf,
    pub sock_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub log_size: u64,
    pub log_count: u32,
    pub trim_size: usize,
    pub rfc822_task_max: usize,
    pub suffixes: Vec<String>,
    pub folders: Vec<String>,
    pub monitor: bool,
    pub monitor_delay_ms: u64,
}

impl MailestdConfig {
    pub fn load(path: &Path) -> Result<MailestdConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: MailestdConfig = toml::from_str(&text)?;
        Ok(cfg)
    }

    pub fn merge_cli(mut self, cli: &Cli) -> MailestdConfig {
        if cli.debug {
            self.debug = true;
        }
        if let Some(maildir) = &cli.maildir {
            self.maildir = Some(maildir.clone());
        }
        self.suffixes.extend(cli.suffix.iter().cloned());
        self
    }

    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("HOME"))?;

        let maildir = self.maildir.unwrap_or_else(|| home.join("Mail"));
        let db_path = self.db_path.unwrap_or_else(|| maildir.join(".mailest.db"));
        let sock_path = self
            .sock_path
            .unwrap_or_else(|| maildir.join(".mailest.sock"));

        let mut suffixes = self.suffixes;
        if suffixes.is_empty() {
            suffixes.push(DEFAULT_SUFFIX.to_string());
        }

        Ok(ResolvedConfig {
            debug: self.debug,
            maildir,
            db_path,
            sock_path,
            log_path: self.log_path,
            log_size: self.log_size,
            log_count: self.log_count,
            trim_size: self.trim_size,
            rfc822_task_max: self.tasks.max(1),
            suffixes,
            folders: self.folders,
            monitor: self.monitor,
            monitor_delay_ms: self.monitor_delay,
        })
    }
}

/// Load config-file + CLI, in that override order, and resolve environment
/// defaults. Used by both `main` and `-n` config-check.
pub fn load(cli: &Cli) -> Result<ResolvedConfig, ConfigError> {
    let base = match &cli.conf {
        Some(path) => MailestdConfig::load(path)?,
        None => MailestdConfig::default(),
    };
    base.merge_cli(cli).resolve()
}
