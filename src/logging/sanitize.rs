//! Redaction of sensitive metadata
//!
//! Only request headers are inspected: any header whose name contains "token" or
//! is "authorization" (case-insensitive) has its value replaced by [`REDACTED`].

use super::metadata::{Metadata, MetadataValue};

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

const HEADERS_KEY: &str = "headers";

/// Return a redacted copy of `metadata`
///
/// The input is never modified. A `"headers"` entry that is not a map passes
/// through untouched.
pub fn sanitize(metadata: Option<&Metadata>) -> Option<Metadata> {
    let mut copy = metadata?.clone();

    if let Some(MetadataValue::Map(headers)) = copy.get_mut(HEADERS_KEY) {
        for (name, value) in headers.iter_mut() {
            if is_sensitive_header(name) {
                *value = MetadataValue::String(REDACTED.to_string());
            }
        }
    }

    Some(copy)
}

fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("token") || name == "authorization"
}
