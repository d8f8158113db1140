//! Archive source trait and HTTP status classification.
//!
//! An `ArchiveSource` fetches the raw archive bytes for one trading date in a
//! single attempt. Retrying, integrity checks and placement live above it in
//! the acquisition pipeline, so any transport (plain HTTP, a scripted
//! browser session, a test double) plugs in without touching the ledger.

use crate::error::PipelineError;
use chrono::NaiveDate;

pub trait ArchiveSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Make one attempt at fetching the archive payload for `date`.
    fn fetch(&self, date: NaiveDate) -> Result<Vec<u8>, PipelineError>;

    /// False once the source has been blocked (e.g. circuit breaker open).
    fn is_available(&self) -> bool {
        true
    }
}

impl<S: ArchiveSource + ?Sized> ArchiveSource for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, date: NaiveDate) -> Result<Vec<u8>, PipelineError> {
        (**self).fetch(date)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Which HTTP statuses mean "no bulletin for this date".
///
/// The exchange can be closed on dates the published calendar did not
/// predict; the archive then answers with one of these statuses and the date
/// is skipped rather than failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsentStatuses(Vec<u16>);

impl AbsentStatuses {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self(statuses.into_iter().collect())
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    /// Classify a non-success status.
    pub fn classify(&self, status: u16, context: &str) -> PipelineError {
        if self.contains(status) {
            PipelineError::ResourceAbsent { status }
        } else {
            PipelineError::HttpStatus {
                status,
                message: context.to_string(),
            }
        }
    }
}

impl Default for AbsentStatuses {
    fn default() -> Self {
        Self(vec![404])
    }
}
