//! Structured error taxonomy for per-date pipeline work.
//!
//! Every variant is recorded in the ledger rather than propagated out of the
//! run loop. `kind()` gives a stable label for reports, `is_retryable()`
//! drives the fetch retry policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("holiday calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    #[error("no data available (HTTP {status})")]
    ResourceAbsent { status: u16 },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("hard stop: remote source has blocked requests (circuit breaker open)")]
    CircuitOpen,

    #[error("invalid archive: {0}")]
    Integrity(String),

    #[error("extracted content unusable: {0}")]
    ExtractionShape(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("write failed: {0}")]
    WriteFailure(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Stable snake_case label used in status reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::CalendarUnavailable(_) => "calendar_unavailable",
            PipelineError::TransientFetch(_) => "transient_fetch",
            PipelineError::ResourceAbsent { .. } => "resource_absent",
            PipelineError::HttpStatus { .. } => "http_status",
            PipelineError::CircuitOpen => "circuit_open",
            PipelineError::Integrity(_) => "integrity",
            PipelineError::ExtractionShape(_) => "extraction_shape",
            PipelineError::SchemaMismatch(_) => "schema_mismatch",
            PipelineError::WriteFailure(_) => "write_failure",
            PipelineError::Io(_) => "io",
        }
    }

    /// Whether another fetch attempt could plausibly succeed.
    ///
    /// Malformed payloads are not retried: a broken remote archive stays broken.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFetch(_) | PipelineError::HttpStatus { .. }
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_status_errors_retry() {
        assert!(PipelineError::TransientFetch("timeout".into()).is_retryable());
        assert!(PipelineError::HttpStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!PipelineError::ResourceAbsent { status: 404 }.is_retryable());
        assert!(!PipelineError::Integrity("not a zip".into()).is_retryable());
        assert!(!PipelineError::CircuitOpen.is_retryable());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&PipelineError::ResourceAbsent { status: 404 }).unwrap();
        assert_eq!(json, r#"{"kind":"resource_absent","detail":{"status":404}}"#);
    }
}
