//! Filtered, debounced view over a sink
//!
//! The engine caches a newest-first copy of the sink's records and publishes the
//! subset passing the current search term and severity filter on a `watch`
//! channel. Severity changes apply at once; search terms apply after a quiet
//! period, and a newer term cancels a pending one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logging::{LogRecord, Severity};
use crate::sink::{sort_newest_first, LogSink};

/// Default quiet period before a search term is applied
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Records passing `severity` (exact match) and `term` (case-insensitive substring)
///
/// An empty term matches everything; `None` disables the severity filter.
pub fn filter_records(
    records: &[LogRecord],
    term: &str,
    severity: Option<Severity>,
) -> Vec<LogRecord> {
    records
        .iter()
        .filter(|r| severity.map_or(true, |s| r.severity() == s))
        .filter(|r| term.is_empty() || r.matches(term))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct QueryState {
    all: Vec<LogRecord>,
    /// Term currently applied to the view
    search_term: String,
    /// Most recent term asked for, possibly still pending
    requested_term: String,
    severity: Option<Severity>,
}

struct Shared {
    sink: Arc<dyn LogSink>,
    debounce: Duration,
    state: Mutex<QueryState>,
    visible: watch::Sender<Vec<LogRecord>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &QueryState) {
        let visible = filter_records(&state.all, &state.search_term, state.severity);
        self.visible.send_replace(visible);
    }
}

/// Search and severity filtering over a [`LogSink`]
///
/// Cloning is cheap and every clone drives the same view.
#[derive(Clone)]
pub struct QueryEngine {
    shared: Arc<Shared>,
}

impl QueryEngine {
    /// Create an engine with an empty view; call [`refresh`](Self::refresh) to load
    pub fn new(sink: Arc<dyn LogSink>, debounce: Duration) -> Self {
        let (visible, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                sink,
                debounce,
                state: Mutex::new(QueryState::default()),
                visible,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Reload every record from the sink and republish
    pub fn refresh(&self) {
        let mut records = self.shared.sink.fetch();
        sort_newest_first(&mut records);

        let mut state = self.shared.state();
        state.all = records;
        debug!(count = state.all.len(), "Query view refreshed");
        self.shared.publish(&state);
    }

    /// Filter by exact severity, or clear the filter with `None`
    pub fn set_severity_filter(&self, severity: Option<Severity>) {
        let mut state = self.shared.state();
        state.severity = severity;
        self.shared.publish(&state);
    }

    /// Apply `term` once the debounce period passes without a newer term
    ///
    /// Repeating the most recently requested term does nothing. Outside a tokio
    /// runtime there is nothing to debounce on, so the term applies at once.
    pub fn set_search_term(&self, term: impl Into<String>) {
        let term = term.into();
        let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());

        {
            let mut state = self.shared.state();
            if state.requested_term == term {
                return;
            }
            state.requested_term = term.clone();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime, applying search term without debounce");
                if let Some(previous) = pending.take() {
                    previous.abort();
                }
                let mut state = self.shared.state();
                state.search_term = term;
                self.shared.publish(&state);
                return;
            }
        };

        let shared = Arc::clone(&self.shared);
        let task = runtime.spawn(async move {
            tokio::time::sleep(shared.debounce).await;

            let mut state = shared.state();
            if state.requested_term != term {
                return;
            }
            debug!(term = %term, "Applying search term");
            state.search_term = term;
            shared.publish(&state);
        });

        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    /// The search term currently applied to the view
    pub fn search_term(&self) -> String {
        self.shared.state().search_term.clone()
    }

    pub fn severity_filter(&self) -> Option<Severity> {
        self.shared.state().severity
    }

    /// Every cached record, newest first, ignoring filters
    pub fn all(&self) -> Vec<LogRecord> {
        self.shared.state().all.clone()
    }

    /// The filtered records currently published
    pub fn current(&self) -> Vec<LogRecord> {
        self.shared.visible.borrow().clone()
    }

    /// Receive every future change to the filtered records
    pub fn subscribe(&self) -> watch::Receiver<Vec<LogRecord>> {
        self.shared.visible.subscribe()
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("QueryEngine")
            .field("sink", &self.shared.sink.name())
            .field("debounce", &self.shared.debounce)
            .field("records", &state.all.len())
            .field("search_term", &state.search_term)
            .field("severity", &state.severity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::logging::CallSite;
    use crate::sink::MemorySink;
    use chrono::{TimeZone, Utc};

    fn record(secs: i64, severity: Severity, message: &str) -> LogRecord {
        LogRecord::new(severity, message, CallSite::new("main.rs", "run", 1))
            .with_timestamp(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn sample() -> Vec<LogRecord> {
        vec![
            record(1_700_000_000, Severity::Info, "foo"),
            record(1_700_000_001, Severity::Error, "bar"),
            record(1_700_000_002, Severity::Error, "foobar"),
        ]
    }

    fn engine() -> QueryEngine {
        let sink = MemorySink::new(CacheOptions::default()).unwrap();
        for r in sample() {
            sink.store(r);
        }
        let engine = QueryEngine::new(Arc::new(sink), DEFAULT_DEBOUNCE);
        engine.refresh();
        engine
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message()).collect()
    }

    #[test]
    fn test_filter_records() {
        let records = sample();

        assert_eq!(messages(&filter_records(&records, "", None)).len(), 3);
        assert_eq!(
            messages(&filter_records(&records, "", Some(Severity::Error))),
            ["bar", "foobar"]
        );
        assert_eq!(
            messages(&filter_records(&records, "FOO", None)),
            ["foo", "foobar"]
        );
        assert_eq!(
            messages(&filter_records(&records, "foo", Some(Severity::Error))),
            ["foobar"]
        );
        assert!(filter_records(&records, "", Some(Severity::Critical)).is_empty());
    }

    #[test]
    fn test_refresh_orders_newest_first() {
        let engine = engine();
        assert_eq!(messages(&engine.current()), ["foobar", "bar", "foo"]);
        assert_eq!(engine.all().len(), 3);
    }

    #[test]
    fn test_severity_filter_immediate() {
        let engine = engine();

        engine.set_severity_filter(Some(Severity::Error));
        assert_eq!(messages(&engine.current()), ["foobar", "bar"]);
        assert_eq!(engine.severity_filter(), Some(Severity::Error));

        engine.set_severity_filter(None);
        assert_eq!(engine.current().len(), 3);
    }

    #[test]
    fn test_search_term_without_runtime_applies_at_once() {
        let engine = engine();

        engine.set_search_term("bar");
        assert_eq!(messages(&engine.current()), ["foobar", "bar"]);
        assert_eq!(engine.search_term(), "bar");

        engine.set_search_term("");
        assert_eq!(engine.current().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_term_debounced() {
        let engine = engine();

        engine.set_search_term("bar");
        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(engine.current().len(), 3);
        assert_eq!(engine.search_term(), "");

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(messages(&engine.current()), ["foobar", "bar"]);
        assert_eq!(engine.search_term(), "bar");
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_term_cancels_pending() {
        let engine = engine();

        engine.set_search_term("foo");
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.set_search_term("bar");

        // "foo" would have fired at 300ms
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.current().len(), 3);

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(messages(&engine.current()), ["foobar", "bar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_term_keeps_original_deadline() {
        let engine = engine();

        engine.set_search_term("foo");
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.set_search_term("foo");

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(messages(&engine.current()), ["foobar", "foo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_and_severity_combine() {
        let engine = engine();

        engine.set_severity_filter(Some(Severity::Error));
        engine.set_search_term("foo");
        tokio::time::sleep(Duration::from_millis(301)).await;

        assert_eq!(messages(&engine.current()), ["foobar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_term_restores_all() {
        let engine = engine();

        engine.set_search_term("foobar");
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert_eq!(engine.current().len(), 1);

        engine.set_search_term("");
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert_eq!(engine.current().len(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let engine = engine();
        let mut rx = engine.subscribe();

        engine.set_severity_filter(Some(Severity::Info));
        rx.changed().await.unwrap();
        assert_eq!(messages(&rx.borrow_and_update()), ["foo"]);
    }
}
