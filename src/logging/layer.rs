//! `tracing` integration
//!
//! [`KeepLayer`] turns every `tracing` event into a Keep record, so a host that
//! already logs through `tracing` gets capture for free. Keep's own diagnostics
//! (targets under `keep`) are skipped, otherwise a sink that logs while storing
//! would feed itself.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::metadata::{Metadata, MetadataValue};
use super::record::{CallSite, Severity};
use crate::facade::Keep;

/// Target prefix of Keep's own events
const SELF_TARGET: &str = "keep";

/// Default filter for Keep's own diagnostics on stderr
pub const DEFAULT_DIAGNOSTICS_FILTER: &str = "keep=warn";

/// A `tracing_subscriber` layer that forwards events into a [`Keep`] instance
pub struct KeepLayer {
    keep: Arc<Keep>,
}

impl KeepLayer {
    pub fn new(keep: Arc<Keep>) -> Self {
        Self { keep }
    }
}

fn is_own_target(target: &str) -> bool {
    target == SELF_TARGET
        || target
            .strip_prefix(SELF_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

impl<S: Subscriber> Layer<S> for KeepLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_own_target(meta.target()) {
            return;
        }

        let severity = Severity::from(*meta.level());
        if severity < self.keep.min_level() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let call_site = CallSite::new(
            meta.file().unwrap_or("<unknown>"),
            meta.module_path().unwrap_or(meta.target()),
            meta.line().unwrap_or(0),
        );
        let metadata = (!visitor.fields.is_empty()).then_some(visitor.fields);

        self.keep.log(
            severity,
            visitor.message.unwrap_or_default(),
            metadata,
            Some(meta.target().to_string()),
            call_site,
        );
    }
}

/// Collects the `message` field and every other field as string metadata
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Metadata,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields
                .insert(field.name().to_string(), MetadataValue::String(value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

/// Send Keep's own diagnostics to stderr
///
/// The filter comes from `KEEP_LOG`, then `RUST_LOG`, then `default_filter`.
pub fn init_diagnostics(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(stderr_layer(default_filter))
        .try_init()
        .context("Failed to initialize diagnostics subscriber")
}

/// Install a global subscriber that captures events into `keep`
///
/// Keep's own diagnostics still go to stderr, filtered as in [`init_diagnostics`].
pub fn install(keep: Arc<Keep>, default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(stderr_layer(default_filter))
        .with(KeepLayer::new(keep))
        .try_init()
        .context("Failed to install Keep tracing layer")
}

fn stderr_layer<S>(default_filter: &str) -> impl Layer<S>
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let env_filter = EnvFilter::try_from_env("KEEP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter)
}
