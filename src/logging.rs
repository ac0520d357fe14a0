//! Logging sinks.
//!
//! Foreground/debug mode uses `env_logger` on stderr. Daemonized mode uses
//! `FileLogger`, a small `log::Log` implementation that fsyncs after every
//! record and rotates when the current file exceeds a configured size,
//! keeping a bounded number of backups — the direct analogue of the spec's
//! spinlock-guarded, fsync-per-record log sink.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct FileLogger {
    inner: Mutex<FileLoggerInner>,
    level: LevelFilter,
}

struct FileLoggerInner {
    path: PathBuf,
    file: File,
    size: u64,
    max_size: u64,
    max_backups: u32,
}

impl FileLoggerInner {
    fn rotate(&mut self) -> std::io::Result<()> {
        for i in (1..self.max_backups).rev() {
            let from = backup_path(&self.path, i);
            let to = backup_path(&self.path, i + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to);
            }
        }
        if self.max_backups > 0 {
            let _ = fs::rename(&self.path, backup_path(&self.path, 1));
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = 0;
        Ok(())
    }

    fn write_record(&mut self, line: &str) {
        if self.size >= self.max_size && self.max_size > 0 {
            if let Err(e) = self.rotate() {
                eprintln!("mailestd: log rotation failed: {e}");
            }
        }
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            eprintln!("mailestd: failed to write log record: {e}");
            return;
        }
        self.size += line.len() as u64;
        let _ = self.file.sync_all();
    }
}

fn backup_path(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Utc::now();
        let line = format!(
            "{} [{}] {}: {}\n",
            now.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            record.args()
        );
        if let Ok(mut inner) = self.inner.lock() {
            inner.write_record(&line);
        }
    }

    fn flush(&self) {
        if let Ok(inner) = self.inner.lock() {
            let _ = inner.file.sync_all();
        }
    }
}

/// Install the appropriate logger for `debug`. In debug/foreground mode this
/// is `env_logger` on stderr (`RUST_LOG`-driven, matching the teacher's
/// dev-only logging idiom); otherwise it's a rotating file sink at
/// `log_path`.
pub fn init(debug: bool, log_path: Option<&Path>, log_size: u64, log_count: u32) {
    if debug || log_path.is_none() {
        let _ = env_logger_init();
        return;
    }
    let path = log_path.unwrap().to_path_buf();
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("mailestd: failed to open log file {}: {e}", path.display());
            let _ = env_logger_init();
            return;
        }
    };
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let logger = FileLogger {
        inner: Mutex::new(FileLoggerInner {
            path,
            file,
            size,
            max_size: log_size,
            max_backups: log_count,
        }),
        level: LevelFilter::Info,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

fn env_logger_init() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
}

#[allow(dead_code)]
fn level_from_env() -> Level {
    Level::Info
}
