//! Keep - embeddable diagnostic logging
//!
//! Capture structured log records, keep them in memory or in a JSON file, and
//! search the history with a debounced, severity-filtered view.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod query;
pub mod sink;

pub use cache::{CacheOptions, ExpiringCache};
pub use config::{KeepConfig, SinkKind};
pub use error::{KeepError, Result};
pub use facade::Keep;
pub use logging::{CallSite, KeepLayer, LogRecord, Metadata, MetadataValue, Severity};
pub use query::{filter_records, QueryEngine};
pub use sink::{FileSink, LogSink, MemorySink};
