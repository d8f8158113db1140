//! Acquisition pipeline: idempotent, retried fetch-and-extract of one archive per date.
//!
//! Steps short-circuit on the first failure:
//! 1. skip if the raw artifact is already on disk (canonical or legacy dir)
//! 2. fetch with bounded retry
//! 3. integrity check and member extraction
//! 4. atomic placement at the canonical raw path

use crate::archive::extract_member;
use crate::error::PipelineError;
use crate::layout::{raw_file_name, write_bytes_atomic, StorageLayout};
use crate::record::{AcquisitionOutcome, AcquisitionRecord, SkipReason};
use crate::retry::RetryPolicy;
use crate::source::ArchiveSource;
use chrono::NaiveDate;
use tracing::{debug, info, warn};

pub struct AcquisitionPipeline<'a> {
    source: &'a dyn ArchiveSource,
    layout: &'a StorageLayout,
    retry: RetryPolicy,
}

impl<'a> AcquisitionPipeline<'a> {
    pub fn new(
        source: &'a dyn ArchiveSource,
        layout: &'a StorageLayout,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            layout,
            retry,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        self.layout
    }

    /// Artifact already on disk for `date`, if any.
    fn existing(&self, date: NaiveDate) -> Option<SkipReason> {
        let canonical = self.layout.raw_path(date);
        if canonical.is_file() {
            return Some(SkipReason::AlreadyPresent { path: canonical });
        }
        self.layout
            .existing_path(date)
            .filter(|p| p.is_file())
            .map(|path| SkipReason::PresentInExistingDir { path })
    }

    pub fn acquire(&self, date: NaiveDate, force: bool) -> AcquisitionRecord {
        if !force {
            if let Some(reason) = self.existing(date) {
                info!(%date, reason = %reason.describe(), "raw artifact present, skipping fetch");
                return AcquisitionRecord::new(date, AcquisitionOutcome::Skipped { reason }, 0);
            }
        }

        let retried = self.retry.run(PipelineError::is_retryable, |attempt| {
            debug!(%date, attempt, source = self.source.name(), "fetching archive");
            self.source.fetch(date)
        });
        let attempts = retried.attempts;

        let payload = match retried.result {
            Ok(bytes) => bytes,
            Err(PipelineError::ResourceAbsent { status }) => {
                info!(%date, status, "no bulletin published, treating as holiday");
                return AcquisitionRecord::new(
                    date,
                    AcquisitionOutcome::Skipped {
                        reason: SkipReason::ResourceAbsent { status },
                    },
                    attempts,
                );
            }
            Err(error) => return self.failed(date, error, attempts),
        };

        match self.place(date, &payload) {
            Ok(outcome) => {
                if let AcquisitionOutcome::Success {
                    size_bytes, shape, ..
                } = &outcome
                {
                    info!(%date, attempts, size_bytes, %shape, "archive acquired");
                }
                AcquisitionRecord::new(date, outcome, attempts)
            }
            Err(error) => self.failed(date, error, attempts),
        }
    }

    fn place(&self, date: NaiveDate, payload: &[u8]) -> Result<AcquisitionOutcome, PipelineError> {
        let member = extract_member(payload, &raw_file_name(date))?;
        let raw_path = self.layout.raw_path(date);
        let size_bytes = write_bytes_atomic(&raw_path, &member.bytes)?;
        Ok(AcquisitionOutcome::Success {
            raw_path,
            size_bytes,
            shape: member.shape,
            content_hash: blake3::hash(&member.bytes).to_hex().to_string(),
        })
    }

    fn failed(&self, date: NaiveDate, error: PipelineError, attempts: u32) -> AcquisitionRecord {
        warn!(%date, attempts, kind = error.kind(), error = %error, "acquisition failed");
        AcquisitionRecord::new(date, AcquisitionOutcome::Failed { error }, attempts)
    }
}
