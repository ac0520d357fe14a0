//! Error taxonomy.
//!
//! Every subsystem gets its own narrow enum for the failure modes specific to
//! it; `MailestdError` is the umbrella a worker's dispatch loop matches on to
//! decide propagation policy (§7: transient filesystem/parse errors are
//! localized and logged, index write failures trigger `db_error`, protocol
//! errors tear down the client session, configuration errors are fatal at
//! startup).

use std::fmt;

#[derive(Debug)]
pub enum CatalogueError {
    Io(std::io::Error),
    NotFound(String),
}

impl fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogueError::Io(e) => write!(f, "I/O error: {e}"),
            CatalogueError::NotFound(path) => write!(f, "no catalogue entry for {path}"),
        }
    }
}

impl std::error::Error for CatalogueError {}

impl From<std::io::Error> for CatalogueError {
    fn from(err: std::io::Error) -> Self {
        CatalogueError::Io(err)
    }
}

#[derive(Debug)]
pub enum IndexError {
    Open(String),
    Write(String),
    Read(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Open(msg) => write!(f, "failed to open index: {msg}"),
            IndexError::Write(msg) => write!(f, "index write failed: {msg}"),
            IndexError::Read(msg) => write!(f, "index read failed: {msg}"),
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Debug)]
pub enum ScanError {
    Io(std::io::Error),
    Cancelled,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Io(e) => write!(f, "I/O error: {e}"),
            ScanError::Cancelled => write!(f, "gather cancelled"),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Io(err)
    }
}

#[derive(Debug)]
pub enum WatchError {
    Io(std::io::Error),
    BackendInit(String),
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Io(e) => write!(f, "I/O error: {e}"),
            WatchError::BackendInit(msg) => write!(f, "failed to start watch backend: {msg}"),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<std::io::Error> for WatchError {
    fn from(err: std::io::Error) -> Self {
        WatchError::Io(err)
    }
}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        WatchError::BackendInit(err.to_string())
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    Malformed(String),
    TooLong { field: &'static str, max: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed command: {msg}"),
            ProtocolError::TooLong { field, max } => {
                write!(f, "field {field} exceeds {max} bytes")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Missing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {e}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Missing(key) => write!(f, "missing required setting: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Propagation class an error belongs to, independent of which subsystem
/// raised it. Worker dispatch loops match on this rather than on the
/// concrete variant, so adding a new error to a subsystem enum can't
/// silently change how it's handled.
#[derive(Debug)]
pub enum MailestdError {
    Catalogue(CatalogueError),
    Index(IndexError),
    Scan(ScanError),
    Watch(WatchError),
    Protocol(ProtocolError),
    Config(ConfigError),
}

impl fmt::Display for MailestdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailestdError::Catalogue(e) => write!(f, "{e}"),
            MailestdError::Index(e) => write!(f, "{e}"),
            MailestdError::Scan(e) => write!(f, "{e}"),
            MailestdError::Watch(e) => write!(f, "{e}"),
            MailestdError::Protocol(e) => write!(f, "{e}"),
            MailestdError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MailestdError {}

impl From<CatalogueError> for MailestdError {
    fn from(err: CatalogueError) -> Self {
        MailestdError::Catalogue(err)
    }
}

impl From<IndexError> for MailestdError {
    fn from(err: IndexError) -> Self {
        MailestdError::Index(err)
    }
}

impl From<ScanError> for MailestdError {
    fn from(err: ScanError) -> Self {
        MailestdError::Scan(err)
    }
}

impl From<WatchError> for MailestdError {
    fn from(err: WatchError) -> Self {
        MailestdError::Watch(err)
    }
}

impl From<ProtocolError> for MailestdError {
    fn from(err: ProtocolError) -> Self {
        MailestdError::Protocol(err)
    }
}

impl From<ConfigError> for MailestdError {
    fn from(err: ConfigError) -> Self {
        MailestdError::Config(err)
    }
}
