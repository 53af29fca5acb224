//! The `Keep` facade
//!
//! One `Keep` owns a sink and a query engine over it. Every record goes through
//! [`Keep::log`]: severity gate, then redaction, then the sink. Readers either
//! take a snapshot with [`Keep::fetch_all`] or follow the filtered view.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::KeepConfig;
use crate::error::Result;
use crate::logging::{sanitize, CallSite, LogRecord, Metadata, Severity};
use crate::query::QueryEngine;
use crate::sink::{self, sort_newest_first, LogSink};

/// An independent log store with search and filtering
///
/// Instances share nothing, so a host may keep several (one per subsystem, say)
/// or wrap one in an `Arc` for global use.
pub struct Keep {
    config: KeepConfig,
    sink: Arc<dyn LogSink>,
    query: QueryEngine,
}

impl Keep {
    /// Create an instance with the sink named in `config`
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`KeepConfig::validate`]. Use [`Keep::try_new`] to
    /// handle invalid settings.
    pub fn new(config: KeepConfig) -> Self {
        match Self::try_new(config) {
            Ok(keep) => keep,
            Err(e) => panic!("invalid Keep configuration: {}", e),
        }
    }

    pub fn try_new(config: KeepConfig) -> Result<Self> {
        config.validate()?;
        let sink = sink::from_config(&config)?;
        Ok(Self::with_sink(config, sink))
    }

    /// Create an instance over an existing sink
    ///
    /// The sink settings in `config` are ignored.
    pub fn with_sink(config: KeepConfig, sink: Arc<dyn LogSink>) -> Self {
        let query = QueryEngine::new(Arc::clone(&sink), config.search_debounce());
        query.refresh();
        info!(sink = sink.name(), min_level = %config.min_level, "Keep initialized");
        Self {
            config,
            sink,
            query,
        }
    }

    pub fn config(&self) -> &KeepConfig {
        &self.config
    }

    pub fn min_level(&self) -> Severity {
        self.config.min_level
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// The query engine driving the filtered view
    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Record a message
    ///
    /// Records below the minimum level are dropped. Metadata is redacted before
    /// the record reaches the sink, so nothing sensitive is ever stored. Use the
    /// [`call_site!`](crate::call_site) macro for `call_site`.
    pub fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        source: Option<String>,
        call_site: CallSite,
    ) {
        if severity < self.config.min_level {
            return;
        }

        let record = LogRecord::new(severity, message, call_site)
            .with_metadata(sanitize(metadata.as_ref()))
            .with_source(source);
        self.sink.store(record);
    }

    /// Every stored record, newest first
    pub fn fetch_all(&self) -> Vec<LogRecord> {
        let mut records = self.sink.fetch();
        sort_newest_first(&mut records);
        records
    }

    /// Records in the filtered view as of the last refresh
    pub fn current_filtered(&self) -> Vec<LogRecord> {
        self.query.current()
    }

    /// Follow changes to the filtered view
    pub fn subscribe(&self) -> watch::Receiver<Vec<LogRecord>> {
        self.query.subscribe()
    }

    /// Debounced search over every field; see [`QueryEngine::set_search_term`]
    pub fn set_search_term(&self, term: impl Into<String>) {
        self.query.set_search_term(term);
    }

    pub fn set_severity_filter(&self, severity: Option<Severity>) {
        self.query.set_severity_filter(severity);
    }

    /// Reload the filtered view from the sink
    pub fn refresh(&self) {
        self.query.refresh();
    }

    /// Delete every record
    ///
    /// On success the view is refreshed and then `on_complete` runs. If the sink
    /// cannot clear, neither happens.
    pub fn clear_all(&self, on_complete: impl FnOnce() + Send + 'static) {
        let query = self.query.clone();
        self.sink.flush(Box::new(move || {
            debug!("Records cleared");
            query.refresh();
            on_complete();
        }));
    }
}

impl std::fmt::Debug for Keep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keep")
            .field("config", &self.config)
            .field("sink", &self.sink.name())
            .field("query", &self.query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MetadataValue, REDACTED};
    use crate::sink::FileSink;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn here() -> CallSite {
        crate::call_site!()
    }

    fn request_metadata() -> Metadata {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), MetadataValue::from("Bearer xyz"));
        headers.insert("Accept".to_string(), MetadataValue::from("*/*"));
        let mut metadata = Metadata::new();
        metadata.insert("headers".to_string(), MetadataValue::Map(headers));
        metadata
    }

    fn header<'a>(record: &'a LogRecord, name: &str) -> &'a str {
        record.metadata().unwrap()["headers"].as_map().unwrap()[name]
            .as_str()
            .unwrap()
    }

    #[test]
    fn test_log_and_fetch() {
        let keep = Keep::new(KeepConfig::memory());
        keep.log(
            Severity::Notice,
            "user signed in",
            None,
            Some("auth".to_string()),
            here(),
        );

        let records = keep.fetch_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "user signed in");
        assert_eq!(records[0].source(), Some("auth"));
        assert!(records[0].file().ends_with("facade.rs"));
        assert!(records[0].function().contains("facade"));
    }

    #[test]
    fn test_min_level_gate() {
        let keep = Keep::new(KeepConfig::memory().with_min_level(Severity::Warning));
        keep.log(Severity::Info, "dropped", None, None, here());
        keep.log(Severity::Warning, "kept", None, None, here());
        keep.log(Severity::Critical, "kept too", None, None, here());

        assert_eq!(keep.fetch_all().len(), 2);
    }

    #[test]
    fn test_metadata_redacted_before_store() {
        let keep = Keep::new(KeepConfig::memory());
        keep.log(Severity::Info, "request", Some(request_metadata()), None, here());

        let record = &keep.fetch_all()[0];
        assert_eq!(header(record, "Authorization"), REDACTED);
        assert_eq!(header(record, "Accept"), "*/*");
    }

    #[test]
    fn test_file_sink_never_sees_secrets() {
        let temp_dir = TempDir::new().unwrap();
        let keep = Keep::new(KeepConfig::file("log.json").with_log_dir(temp_dir.path()));
        keep.log(Severity::Info, "request", Some(request_metadata()), None, here());

        let content = std::fs::read_to_string(temp_dir.path().join("log.json")).unwrap();
        assert!(!content.contains("Bearer xyz"));
        assert!(content.contains(REDACTED));
    }

    #[test]
    fn test_fetch_all_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let keep = Keep::new(KeepConfig::file("log.json").with_log_dir(temp_dir.path()));
        keep.log(Severity::Info, "first", None, None, here());
        std::thread::sleep(Duration::from_millis(5));
        keep.log(Severity::Info, "second", None, None, here());

        let messages: Vec<_> = keep.fetch_all().iter().map(|r| r.message().to_string()).collect();
        assert_eq!(messages, ["second", "first"]);
    }

    #[test]
    fn test_view_updates_on_refresh() {
        let keep = Keep::new(KeepConfig::memory());
        assert!(keep.current_filtered().is_empty());

        keep.log(Severity::Error, "boom", None, None, here());
        assert!(keep.current_filtered().is_empty());

        keep.refresh();
        assert_eq!(keep.current_filtered().len(), 1);
    }

    #[test]
    fn test_view_loads_existing_records() {
        let temp_dir = TempDir::new().unwrap();
        let sink: Arc<dyn LogSink> = Arc::new(FileSink::in_dir(temp_dir.path(), "log.json"));
        sink.store(LogRecord::new(Severity::Info, "earlier", here()));

        let keep = Keep::with_sink(KeepConfig::default(), sink);
        assert_eq!(keep.current_filtered().len(), 1);
    }

    #[test]
    fn test_severity_filter() {
        let keep = Keep::new(KeepConfig::memory());
        keep.log(Severity::Info, "a", None, None, here());
        keep.log(Severity::Error, "b", None, None, here());
        keep.refresh();

        keep.set_severity_filter(Some(Severity::Error));
        let visible = keep.current_filtered();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message(), "b");
    }

    #[test]
    fn test_clear_all() {
        let temp_dir = TempDir::new().unwrap();
        let keep = Keep::new(KeepConfig::file("log.json").with_log_dir(temp_dir.path()));
        keep.log(Severity::Info, "a", None, None, here());
        keep.refresh();
        assert_eq!(keep.current_filtered().len(), 1);

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        keep.clear_all(move || flag.store(true, Ordering::SeqCst));

        assert!(done.load(Ordering::SeqCst));
        assert!(keep.fetch_all().is_empty());
        assert!(keep.current_filtered().is_empty());
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Keep::new(KeepConfig::memory());
        let b = Keep::new(KeepConfig::memory());
        a.log(Severity::Info, "only in a", None, None, here());

        assert_eq!(a.fetch_all().len(), 1);
        assert!(b.fetch_all().is_empty());
    }

    #[test]
    fn test_try_new_rejects_invalid_config() {
        assert!(Keep::try_new(KeepConfig::file("")).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid Keep configuration")]
    fn test_new_panics_on_invalid_config() {
        let mut config = KeepConfig::memory();
        config.cache.capacity = 0;
        let _ = Keep::new(config);
    }

    #[test]
    fn test_search_from_sync_host() {
        let keep = Keep::new(KeepConfig::memory());
        keep.log(Severity::Info, "cache miss", None, None, here());
        keep.log(Severity::Info, "request done", None, None, here());
        keep.refresh();

        keep.set_search_term("miss");
        let visible = keep.current_filtered();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message(), "cache miss");
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_through_facade() {
        let keep = Keep::new(KeepConfig::memory());
        keep.log(Severity::Info, "cache miss", None, None, here());
        keep.log(Severity::Info, "cache hit", None, None, here());
        keep.log(Severity::Info, "request done", None, None, here());
        keep.refresh();

        let mut rx = keep.subscribe();
        keep.set_search_term("CACHE");
        rx.changed().await.unwrap();

        assert_eq!(rx.borrow().len(), 2);
        assert_eq!(keep.current_filtered().len(), 2);
    }
}
