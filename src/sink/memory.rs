//! In-process sink backed by the expiring cache
//!
//! Records live only as long as the process, and only until they expire or are
//! pushed out by newer records.

use tracing::{debug, trace};

use super::{Completion, LogSink};
use crate::cache::{CacheOptions, ExpiringCache};
use crate::error::Result;
use crate::logging::LogRecord;

/// Keeps records in an [`ExpiringCache`] keyed by record id
#[derive(Debug)]
pub struct MemorySink {
    cache: ExpiringCache<String, LogRecord>,
}

impl MemorySink {
    pub fn new(options: CacheOptions) -> Result<Self> {
        let cache = ExpiringCache::new(options)?
            .on_evict(|id: &String| trace!(id = %id, "Record evicted from memory sink"));
        Ok(Self::with_cache(cache))
    }

    /// Use an existing cache, for example one driven by a manual clock
    pub fn with_cache(cache: ExpiringCache<String, LogRecord>) -> Self {
        Self { cache }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl LogSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn store(&self, record: LogRecord) {
        self.cache.insert(record.id().to_string(), record);
    }

    fn fetch(&self) -> Vec<LogRecord> {
        self.cache.values()
    }

    fn flush(&self, on_complete: Completion) {
        self.cache.remove_all();
        debug!("Memory sink cleared");
        on_complete();
    }
}
