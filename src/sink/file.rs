//! JSON file sink
//!
//! The whole log is one JSON array. Every store reads the array, appends, and
//! writes it back through a uniquely named temporary file in the same directory
//! that is then renamed over the log, so a reader never sees a half-written log.
//! Writers in this process are serialized by a lock shared by every sink on the
//! same path; separate processes sharing a file are not coordinated.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{sort_newest_first, Completion, LogSink};
use crate::error::{KeepError, Result};
use crate::logging::LogRecord;

type WriteLock = Arc<Mutex<()>>;

/// Write locks of live sinks, by resolved log path
static WRITE_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = OnceLock::new();

/// Resolve `path` so two spellings of one file share a key
///
/// The nearest existing ancestor is canonicalized, so the key is stable whether
/// or not the log directory exists yet.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    for ancestor in absolute.ancestors().skip(1) {
        let Ok(canonical) = fs::canonicalize(ancestor) else {
            continue;
        };
        if let Ok(rest) = absolute.strip_prefix(ancestor) {
            return canonical.join(rest);
        }
    }
    absolute
}

/// The write lock shared by every sink on `path`
fn shared_write_lock(path: &Path) -> WriteLock {
    let mut locks = WRITE_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    let key = lock_key(path);
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }

    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = WriteLock::default();
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// Stores records as a JSON array in a single file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    write_lock: WriteLock,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let write_lock = shared_write_lock(&path);
        Self { path, write_lock }
    }

    /// A sink writing `file_name` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self::new(dir.as_ref().join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decode the file
    ///
    /// A missing or empty file is an empty log. Individual records that fail to
    /// decode are skipped; only an unreadable file or a non-array document is an
    /// error.
    fn read_records(&self) -> Result<Vec<LogRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
        let total = raw.len();
        let records: Vec<LogRecord> = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();

        if records.len() < total {
            warn!(
                path = %self.path.display(),
                skipped = total - records.len(),
                "Skipped undecodable log records"
            );
        }
        Ok(records)
    }

    /// Read the log, treating any failure as an empty log
    fn load_or_empty(&self) -> Vec<LogRecord> {
        self.read_records().unwrap_or_else(|e| {
            warn!(
                path = %self.path.display(),
                kind = e.disk_kind().map(|k| k.describe()).unwrap_or("decode"),
                error = %e,
                "Failed to read log file, treating as empty"
            );
            Vec::new()
        })
    }

    /// Replace the file contents with `records`
    ///
    /// The temporary file is removed if anything fails before the rename.
    fn write_records(&self, records: &[LogRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_vec(records)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| KeepError::Io(e.error))?;
        Ok(())
    }

    fn report_write_failure(&self, action: &str, e: &KeepError) {
        warn!(
            path = %self.path.display(),
            kind = e.disk_kind().map(|k| k.describe()).unwrap_or("encode"),
            error = %e,
            "Failed to {} log file",
            action
        );
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn store(&self, record: LogRecord) {
        let _guard = self.lock();
        let mut records = self.load_or_empty();
        records.push(record);

        match self.write_records(&records) {
            Ok(()) => debug!(path = %self.path.display(), count = records.len(), "Stored log record"),
            Err(e) => self.report_write_failure("write", &e),
        }
    }

    /// Records newest first
    ///
    /// Reads take no lock: the file is only ever replaced whole.
    fn fetch(&self) -> Vec<LogRecord> {
        let mut records = self.load_or_empty();
        sort_newest_first(&mut records);
        records
    }

    fn flush(&self, on_complete: Completion) {
        let result = {
            let _guard = self.lock();
            self.write_records(&[])
        };

        match result {
            Ok(()) => {
                debug!(path = %self.path.display(), "Log file cleared");
                on_complete();
            }
            Err(e) => self.report_write_failure("clear", &e),
        }
    }
}
