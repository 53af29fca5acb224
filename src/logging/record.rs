//! The log record data model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::{self, Metadata};
use super::sanitize::sanitize;

/// Severity of a record, from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Every severity, in ascending order
    pub const ALL: [Severity; 7] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Notice,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    /// Name as written to disk
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "notice" => Ok(Severity::Notice),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Where a record was emitted from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl CallSite {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }
}

/// Capture the current file, module path and line as a [`CallSite`]
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::CallSite::new(file!(), module_path!(), line!())
    };
}

/// A single structured log entry
///
/// Records are immutable: every field is private and fixed at construction.
/// The serialized field names are the on-disk format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    id: String,

    #[serde(rename = "level")]
    severity: Severity,

    #[serde(rename = "description")]
    message: String,

    #[serde(with = "timestamp_format")]
    timestamp: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "metadata::deserialize_lenient"
    )]
    metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,

    file: String,
    function: String,
    line: u32,
}

impl LogRecord {
    /// Create a record stamped with a fresh id and the current time
    ///
    /// The timestamp is truncated to milliseconds, the precision of the file format.
    pub fn new(severity: Severity, message: impl Into<String>, call_site: CallSite) -> Self {
        Self {
            id: Uuid::new_v4().to_string().to_uppercase(),
            severity,
            message: message.into(),
            timestamp: Utc::now().trunc_subsecs(3),
            metadata: None,
            source: None,
            file: call_site.file,
            function: call_site.function,
            line: call_site.line,
        }
    }

    pub fn with_metadata(self, metadata: Option<Metadata>) -> Self {
        Self { metadata, ..self }
    }

    pub fn with_source(self, source: Option<String>) -> Self {
        Self { source, ..self }
    }

    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(3),
            ..self
        }
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// A copy of this record with sensitive metadata redacted
    pub fn sanitized(&self) -> Self {
        Self {
            metadata: sanitize(self.metadata.as_ref()),
            ..self.clone()
        }
    }

    /// Case-insensitive substring search over every field, metadata included
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        let contains = |field: &str| field.to_lowercase().contains(&term);

        contains(&self.id)
            || self.severity.as_str().contains(&term)
            || contains(&self.message)
            || self.source.as_deref().is_some_and(contains)
            || contains(&self.file)
            || contains(&self.function)
            || self.line.to_string().contains(&term)
            || contains(&self.timestamp.to_string())
            || self
                .metadata
                .as_ref()
                .is_some_and(|m| metadata::metadata_matches(m, &term))
    }
}

/// ISO-8601 UTC with millisecond fractions on write; any RFC 3339 form on read
///
/// An unreadable timestamp decodes as the time of decoding rather than failing
/// the whole record.
mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::metadata::MetadataValue;
    use chrono::TimeZone;
    use serde_json::json;

    fn record() -> LogRecord {
        LogRecord::new(
            Severity::Info,
            "User signed in",
            CallSite::new("App/Auth.swift", "signIn()", 42),
        )
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Notice < Severity::Warning);
        assert!(Severity::Error < Severity::Critical);
        let mut sorted = Severity::ALL;
        sorted.sort();
        assert_eq!(sorted, Severity::ALL);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("WARN".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!(" Error ".parse::<Severity>(), Ok(Severity::Error));
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_from_tracing_level() {
        assert_eq!(Severity::from(tracing::Level::WARN), Severity::Warning);
        assert_eq!(Severity::from(tracing::Level::TRACE), Severity::Trace);
    }

    #[test]
    fn test_new_record_has_uppercase_uuid() {
        let record = record();
        assert_eq!(record.id().len(), 36);
        assert_eq!(record.id(), record.id().to_uppercase());
        assert_ne!(record.id(), self::record().id());
    }

    #[test]
    fn test_call_site_macro() {
        let site = call_site!();
        assert!(site.file.ends_with("record.rs"));
        assert!(site.function.contains("record"));
        assert!(site.line > 0);
    }

    #[test]
    fn test_serialized_field_names() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 24, 9, 30, 5).unwrap();
        let record = record()
            .with_id("ABC")
            .with_timestamp(ts)
            .with_source(Some("auth".to_string()));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "ABC",
                "level": "info",
                "description": "User signed in",
                "timestamp": "2025-04-24T09:30:05.000Z",
                "source": "auth",
                "file": "App/Auth.swift",
                "function": "signIn()",
                "line": 42
            })
        );
    }

    #[test]
    fn test_round_trip_is_exact() {
        let mut metadata = Metadata::new();
        metadata.insert("user".to_string(), MetadataValue::from("alice"));
        let record = record().with_metadata(Some(metadata));

        let json = serde_json::to_string(&record).unwrap();
        let decoded: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_foreign_record() {
        let decoded: LogRecord = serde_json::from_value(json!({
            "id": "1F0C",
            "level": "critical",
            "description": "Disk failure",
            "timestamp": "2025-04-24T09:30:05.5+02:00",
            "file": "Keep/Store.swift",
            "function": "save()",
            "line": 7,
            "extra": "ignored"
        }))
        .unwrap();

        assert_eq!(decoded.severity(), Severity::Critical);
        assert_eq!(
            decoded.timestamp(),
            Utc.with_ymd_and_hms(2025, 4, 24, 7, 30, 5).unwrap() + chrono::Duration::milliseconds(500)
        );
        assert!(decoded.metadata().is_none());
        assert!(decoded.source().is_none());
    }

    #[test]
    fn test_malformed_metadata_decodes_as_absent() {
        let decoded: LogRecord = serde_json::from_value(json!({
            "id": "1",
            "level": "info",
            "description": "still here",
            "timestamp": "2025-04-24T09:30:05.000Z",
            "metadata": {"broken": null},
            "file": "f",
            "function": "g",
            "line": 1
        }))
        .unwrap();

        assert_eq!(decoded.message(), "still here");
        assert!(decoded.metadata().is_none());
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let decoded: LogRecord = serde_json::from_value(json!({
            "id": "1",
            "level": "info",
            "description": "x",
            "timestamp": "yesterday",
            "file": "f",
            "function": "g",
            "line": 1
        }))
        .unwrap();
        assert!(decoded.timestamp() >= before);
    }

    #[test]
    fn test_negative_line_rejected() {
        let result = serde_json::from_value::<LogRecord>(json!({
            "id": "1",
            "level": "info",
            "description": "x",
            "timestamp": "2025-04-24T09:30:05.000Z",
            "file": "f",
            "function": "g",
            "line": -3
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_matches_fields() {
        let record = record().with_source(Some("AuthService".to_string()));

        assert!(record.matches("signed"));
        assert!(record.matches("SIGNED"));
        assert!(record.matches("info"));
        assert!(record.matches("authservice"));
        assert!(record.matches("auth.swift"));
        assert!(record.matches("signin()"));
        assert!(record.matches("42"));
        assert!(record.matches(&record.id()[..8]));
        assert!(!record.matches("nothing like this"));
    }

    #[test]
    fn test_matches_timestamp_text() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let record = record().with_timestamp(ts);
        assert!(record.matches("2024-12-31"));
    }

    #[test]
    fn test_matches_metadata() {
        let mut nested = std::collections::BTreeMap::new();
        nested.insert("region".to_string(), MetadataValue::from("eu-west-1"));
        let mut metadata = Metadata::new();
        metadata.insert("request".to_string(), MetadataValue::Map(nested));
        let record = record().with_metadata(Some(metadata));

        assert!(record.matches("request"));
        assert!(record.matches("EU-WEST"));
        assert!(!record.matches("us-east"));
    }

    #[test]
    fn test_sanitized_leaves_original() {
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("Authorization".to_string(), MetadataValue::from("Bearer xyz"));
        let mut metadata = Metadata::new();
        metadata.insert("headers".to_string(), MetadataValue::Map(headers));
        let record = record().with_metadata(Some(metadata));

        let sanitized = record.sanitized();
        assert_eq!(sanitized.id(), record.id());
        assert!(sanitized.matches("[redacted]"));
        assert!(record.matches("bearer xyz"));
        assert!(!sanitized.matches("bearer xyz"));
    }
}
