//! Record model and `tracing` ingress
//!
//! Records are built here, redacted by [`sanitize`], and handed to a sink by the
//! facade. [`KeepLayer`] feeds `tracing` events through the same path.

mod layer;
pub mod metadata;
mod record;
mod sanitize;

pub use layer::{init_diagnostics, install, KeepLayer, DEFAULT_DIAGNOSTICS_FILTER};
pub use metadata::{metadata_matches, Metadata, MetadataValue};
pub use record::{CallSite, LogRecord, Severity};
pub use sanitize::{sanitize, REDACTED};
