//! Append-only snapshot log for provisioned hosts.
//!
//! Every lifecycle action leaves one file behind:
//!
//! ```text
//! <root>/<provider>/machines/<host>/log/<timestamp>-<action>.json
//! ```
//!
//! The timestamp is a zero padded count of microseconds since the Unix epoch,
//! so lexical order of the file names equals chronological order. The file
//! holds the serialised driver state and is never rewritten. The newest file
//! is the authoritative state of the host; the directory listing is the
//! index.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::driver::Action;

/// Directory under each provider holding one directory per host.
pub const MACHINES_DIR: &str = "machines";

/// Directory under each host holding its snapshot files.
pub const LOG_DIR: &str = "log";

const SNAPSHOT_EXTENSION: &str = ".json";
const TEMP_PREFIX: &str = ".tmp-";
const PUBLISH_ATTEMPTS: u32 = 16;

/// Errors raised by the state store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateStoreError {
    /// Raised when a provider or host name cannot be used as a directory.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        /// Which name was rejected (`provider` or `host`).
        kind: String,
        /// The rejected value.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Metadata for one recorded snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotRecord {
    /// Action that produced the snapshot.
    pub action: Action,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    /// File name inside the host's log directory.
    pub file_name: String,
}

impl SnapshotRecord {
    fn new(timestamp: u64, action: Action) -> Self {
        Self {
            action,
            timestamp,
            file_name: format!("{timestamp:020}-{action}{SNAPSHOT_EXTENSION}"),
        }
    }

    /// Parses a log file name. Temporary files and names that do not follow
    /// the `<timestamp>-<action>.json` pattern yield `None`.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SNAPSHOT_EXTENSION)?;
        let (digits, label) = stem.split_once('-')?;
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            action: label.parse().ok()?,
            timestamp: digits.parse().ok()?,
            file_name: file_name.to_owned(),
        })
    }
}

/// A snapshot read back from the log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Provider the host belongs to.
    pub provider: String,
    /// Host name.
    pub host: String,
    /// Action that produced the snapshot.
    pub action: Action,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Serialised driver state.
    pub state: Vec<u8>,
}

/// Abstraction over snapshot persistence for dependency injection.
pub trait SnapshotLog: Send + Sync {
    /// Records a new snapshot for the host.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the names are invalid or the
    /// snapshot cannot be written durably.
    fn append(
        &self,
        provider: &str,
        host: &str,
        action: Action,
        state: &[u8],
    ) -> Result<SnapshotRecord, StateStoreError>;

    /// Returns the newest snapshot for the host, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the names are invalid or the log
    /// cannot be read.
    fn load_latest(&self, provider: &str, host: &str)
    -> Result<Option<Snapshot>, StateStoreError>;
}

/// File system backed snapshot log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    root: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store rooted at `root`. Nothing is created until the first
    /// append.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory handed to driver factories for provider-local files.
    #[must_use]
    pub fn provider_root(&self, provider: &str) -> Utf8PathBuf {
        self.root.join(provider)
    }

    /// Lists providers that have at least one host directory.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] when the root cannot be read.
    pub fn list_providers(&self) -> Result<BTreeSet<String>, StateStoreError> {
        let Some(root) = self.open_root()? else {
            return Ok(BTreeSet::new());
        };

        let mut providers = BTreeSet::new();
        for provider in subdirectories(&root, &self.root)? {
            if !self.list_hosts(&provider)?.is_empty() {
                providers.insert(provider);
            }
        }
        Ok(providers)
    }

    /// Lists host names recorded under a provider.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the provider name is invalid or the
    /// directory cannot be read.
    pub fn list_hosts(&self, provider: &str) -> Result<BTreeSet<String>, StateStoreError> {
        validate_name("provider", provider)?;
        let relative = Utf8PathBuf::from(provider).join(MACHINES_DIR);
        let Some(machines) = self.open_existing(&relative)? else {
            return Ok(BTreeSet::new());
        };
        Ok(subdirectories(&machines, &self.root.join(&relative))?
            .into_iter()
            .collect())
    }

    /// Lists the recorded snapshots of a host, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the names are invalid or the log
    /// cannot be read.
    pub fn history(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Vec<SnapshotRecord>, StateStoreError> {
        let relative = log_path(provider, host)?;
        let Some(log) = self.open_existing(&relative)? else {
            return Ok(Vec::new());
        };
        records(&log, &self.root.join(&relative))
    }

    fn open_root(&self) -> Result<Option<Dir>, StateStoreError> {
        match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.root, &err)),
        }
    }

    fn open_existing(&self, relative: &Utf8Path) -> Result<Option<Dir>, StateStoreError> {
        let Some(root) = self.open_root()? else {
            return Ok(None);
        };
        match root.open_dir(relative) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.root.join(relative), &err)),
        }
    }

    fn create_log(&self, relative: &Utf8Path) -> Result<Dir, StateStoreError> {
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        let root = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        let path = self.root.join(relative);
        root.create_dir_all(relative)
            .map_err(|err| io_error(&path, &err))?;
        root.open_dir(relative).map_err(|err| io_error(&path, &err))
    }
}

impl SnapshotLog for StateStore {
    fn append(
        &self,
        provider: &str,
        host: &str,
        action: Action,
        state: &[u8],
    ) -> Result<SnapshotRecord, StateStoreError> {
        let relative = log_path(provider, host)?;
        let log = self.create_log(&relative)?;
        let log_dir = self.root.join(&relative);

        let newest = records(&log, &log_dir)?
            .last()
            .map_or(0, |record| record.timestamp);
        let next = newest
            .checked_add(1)
            .ok_or_else(|| exhausted(&log_dir))?;

        let temp_name = format!("{TEMP_PREFIX}{}", Uuid::new_v4().simple());
        write_synced(&log, &temp_name, state)
            .map_err(|err| io_error(&log_dir.join(&temp_name), &err))?;
        let published = publish(&log, &temp_name, now_micros().max(next), action);
        log.remove_file(&temp_name).ok();
        let record = published.map_err(|err| io_error(&log_dir, &err))?;

        debug!(
            provider,
            host,
            action = %action,
            file = %record.file_name,
            "snapshot appended"
        );
        Ok(record)
    }

    fn load_latest(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Option<Snapshot>, StateStoreError> {
        let relative = log_path(provider, host)?;
        let Some(log) = self.open_existing(&relative)? else {
            return Ok(None);
        };
        let log_dir = self.root.join(&relative);
        let Some(latest) = records(&log, &log_dir)?.pop() else {
            return Ok(None);
        };

        let state = log
            .read(&latest.file_name)
            .map_err(|err| io_error(&log_dir.join(&latest.file_name), &err))?;
        Ok(Some(Snapshot {
            provider: provider.to_owned(),
            host: host.to_owned(),
            action: latest.action,
            timestamp: latest.timestamp,
            state,
        }))
    }
}

/// Checks that a provider or host name is a single, visible path component.
///
/// # Errors
///
/// Returns [`StateStoreError::InvalidName`] describing the problem.
pub fn validate_name(kind: &str, name: &str) -> Result<(), StateStoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain path separators or NUL")
    } else {
        None
    };

    reason.map_or(Ok(()), |why| {
        Err(StateStoreError::InvalidName {
            kind: kind.to_owned(),
            name: name.to_owned(),
            reason: why.to_owned(),
        })
    })
}

fn log_path(provider: &str, host: &str) -> Result<Utf8PathBuf, StateStoreError> {
    validate_name("provider", provider)?;
    validate_name("host", host)?;
    Ok(Utf8PathBuf::from(provider)
        .join(MACHINES_DIR)
        .join(host)
        .join(LOG_DIR))
}

fn records(log: &Dir, log_dir: &Utf8Path) -> Result<Vec<SnapshotRecord>, StateStoreError> {
    let mut found = Vec::new();
    for entry in log.entries().map_err(|err| io_error(log_dir, &err))? {
        let entry = entry.map_err(|err| io_error(log_dir, &err))?;
        let Ok(name) = entry.file_name() else {
            debug!(dir = %log_dir, "skipping log entry with a non UTF-8 name");
            continue;
        };
        if let Some(record) = SnapshotRecord::parse(&name) {
            found.push(record);
        }
    }
    found.sort_by(|lhs, rhs| {
        lhs.timestamp
            .cmp(&rhs.timestamp)
            .then_with(|| lhs.file_name.cmp(&rhs.file_name))
    });
    Ok(found)
}

fn subdirectories(dir: &Dir, path: &Utf8Path) -> Result<Vec<String>, StateStoreError> {
    let mut names = Vec::new();
    for entry in dir.entries().map_err(|err| io_error(path, &err))? {
        let entry = entry.map_err(|err| io_error(path, &err))?;
        let Ok(name) = entry.file_name() else {
            debug!(dir = %path, "skipping entry with a non UTF-8 name");
            continue;
        };
        let is_dir = entry
            .file_type()
            .map_err(|err| io_error(path, &err))?
            .is_dir();
        if is_dir && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Links the temporary file under the first free snapshot name at or after
/// `first`. Existing snapshots are never replaced, even when another process
/// writes the same name.
fn publish(
    log: &Dir,
    temp_name: &str,
    first: u64,
    action: Action,
) -> io::Result<SnapshotRecord> {
    let mut timestamp = first;
    for _ in 0..PUBLISH_ATTEMPTS {
        let record = SnapshotRecord::new(timestamp, action);
        match log.hard_link(temp_name, log, &record.file_name) {
            Ok(()) => return Ok(record),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(file = %record.file_name, "snapshot name taken, trying the next one");
                timestamp = timestamp
                    .checked_add(1)
                    .ok_or_else(|| io::Error::other("snapshot timestamps are exhausted"))?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free snapshot name after {PUBLISH_ATTEMPTS} attempts"),
    ))
}

fn write_synced(dir: &Dir, name: &str, contents: &[u8]) -> io::Result<()> {
    let mut file = dir.create(name)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
        })
}

fn exhausted(log_dir: &Utf8Path) -> StateStoreError {
    StateStoreError::Io {
        path: log_dir.to_path_buf(),
        message: String::from("snapshot timestamps are exhausted"),
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StateStoreError {
    StateStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests;
