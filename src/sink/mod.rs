//! Storage backends for log records
//!
//! A sink only stores, fetches and clears. Ordering, filtering and redaction
//! happen above it, in the facade and the query engine.

mod file;
mod memory;

use std::sync::Arc;

pub use file::FileSink;
pub use memory::MemorySink;

use crate::config::{KeepConfig, SinkKind};
use crate::error::Result;
use crate::logging::LogRecord;

/// Callback run once a flush has completed
pub type Completion = Box<dyn FnOnce() + Send>;

/// A place log records are kept
///
/// Implementations must be safe to call from any thread. Failures are reported
/// through `tracing` and never surface to the caller: a sink that cannot read
/// behaves as empty, and a sink that cannot write drops the record.
pub trait LogSink: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Persist one record
    fn store(&self, record: LogRecord);

    /// Every record currently held, in no guaranteed order
    fn fetch(&self) -> Vec<LogRecord>;

    /// Remove every record, then run `on_complete`
    ///
    /// `on_complete` is not called if the clear failed.
    fn flush(&self, on_complete: Completion);
}

/// Build the sink selected by `config`
pub fn from_config(config: &KeepConfig) -> Result<Arc<dyn LogSink>> {
    let sink: Arc<dyn LogSink> = match &config.sink {
        SinkKind::File { file_name } => Arc::new(FileSink::in_dir(config.log_dir(), file_name)),
        SinkKind::Memory => Arc::new(MemorySink::new(config.cache.options())?),
    };
    Ok(sink)
}

/// Sort records newest first
///
/// Records sharing a timestamp keep the reverse of their input order, so the
/// later of two same-millisecond writes still comes first.
pub fn sort_newest_first(records: &mut [LogRecord]) {
    records.reverse();
    records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
}
