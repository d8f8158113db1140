//! Per-date outcome records produced by the acquisition and curation engines.

use crate::archive::Shape;
use crate::calendar::ExclusionReason;
use crate::error::PipelineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Why an acquisition did no work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyPresent { path: PathBuf },
    PresentInExistingDir { path: PathBuf },
    ResourceAbsent { status: u16 },
}

impl SkipReason {
    /// Report status label.
    pub fn status(&self) -> &'static str {
        match self {
            SkipReason::AlreadyPresent { .. } | SkipReason::PresentInExistingDir { .. } => {
                "skipped_existing"
            }
            SkipReason::ResourceAbsent { .. } => "skipped_absent",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SkipReason::AlreadyPresent { .. } => "File already exists".into(),
            SkipReason::PresentInExistingDir { .. } => {
                "File already exists in existing directory".into()
            }
            SkipReason::ResourceAbsent { status } => format!("No data available ({status})"),
        }
    }

    /// The raw artifact backing this skip, if there is one.
    pub fn raw_path(&self) -> Option<&Path> {
        match self {
            SkipReason::AlreadyPresent { path } | SkipReason::PresentInExistingDir { path } => {
                Some(path)
            }
            SkipReason::ResourceAbsent { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquisitionOutcome {
    Success {
        raw_path: PathBuf,
        size_bytes: u64,
        shape: Shape,
        /// blake3 of the extracted member, hex.
        content_hash: String,
    },
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
    },
    Failed {
        error: PipelineError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRecord {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub outcome: AcquisitionOutcome,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl AcquisitionRecord {
    pub fn new(date: NaiveDate, outcome: AcquisitionOutcome, attempts: u32) -> Self {
        Self {
            date,
            outcome,
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Path of a usable raw artifact: freshly written or already on disk.
    pub fn usable_raw(&self) -> Option<&Path> {
        match &self.outcome {
            AcquisitionOutcome::Success { raw_path, .. } => Some(raw_path),
            AcquisitionOutcome::Skipped { reason } => reason.raw_path(),
            AcquisitionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, AcquisitionOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, AcquisitionOutcome::Skipped { .. })
    }

    /// Whether this date hit the network (used for request pacing).
    pub fn touched_network(&self) -> bool {
        match &self.outcome {
            AcquisitionOutcome::Success { .. } => true,
            AcquisitionOutcome::Skipped { reason } => {
                matches!(reason, SkipReason::ResourceAbsent { .. })
            }
            AcquisitionOutcome::Failed { .. } => self.attempts > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CurationOutcome {
    Success {
        output_path: PathBuf,
        output_size: u64,
        shape: Shape,
    },
    Skipped {
        output_path: PathBuf,
        output_size: u64,
    },
    Error {
        reason: PipelineError,
    },
}

impl CurationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CurationOutcome::Success { .. } => "Success",
            CurationOutcome::Skipped { .. } => "Skipped",
            CurationOutcome::Error { .. } => "Error",
        }
    }
}

/// Curation of one raw file. `date` is `None` when it could not be parsed
/// from the input file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationRecord {
    pub date: Option<NaiveDate>,
    pub weekday: Option<String>,
    #[serde(flatten)]
    pub outcome: CurationOutcome,
    pub input_path: PathBuf,
    pub input_size: u64,
    pub input_shape: Option<Shape>,
    pub copied_input_path: Option<PathBuf>,
}

impl CurationRecord {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, CurationOutcome::Error { .. })
    }

    pub fn input_file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A calendar date that was never attempted because the exchange was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarExclusion {
    pub date: NaiveDate,
    pub reason: ExclusionReason,
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum LedgerEntry {
    Excluded(CalendarExclusion),
    Acquisition(AcquisitionRecord),
    Curation(CurationRecord),
}

impl LedgerEntry {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            LedgerEntry::Excluded(e) => Some(e.date),
            LedgerEntry::Acquisition(r) => Some(r.date),
            LedgerEntry::Curation(r) => r.date,
        }
    }

    /// Failure reason if this entry is a hard failure.
    pub fn failure(&self) -> Option<String> {
        match self {
            LedgerEntry::Acquisition(AcquisitionRecord {
                outcome: AcquisitionOutcome::Failed { error },
                ..
            }) => Some(error.to_string()),
            LedgerEntry::Curation(CurationRecord {
                outcome: CurationOutcome::Error { reason },
                ..
            }) => Some(reason.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    }

    #[test]
    fn usable_raw_only_for_present_artifacts() {
        let ok = AcquisitionRecord::new(
            date(),
            AcquisitionOutcome::Success {
                raw_path: "raw/a.csv".into(),
                size_bytes: 10,
                shape: Shape::new(1, 2),
                content_hash: "00".into(),
            },
            1,
        );
        assert_eq!(ok.usable_raw(), Some(Path::new("raw/a.csv")));

        let legacy = AcquisitionRecord::new(
            date(),
            AcquisitionOutcome::Skipped {
                reason: SkipReason::PresentInExistingDir {
                    path: "old/202501/a.csv".into(),
                },
            },
            0,
        );
        assert_eq!(legacy.usable_raw(), Some(Path::new("old/202501/a.csv")));
        assert!(!legacy.touched_network());

        let absent = AcquisitionRecord::new(
            date(),
            AcquisitionOutcome::Skipped {
                reason: SkipReason::ResourceAbsent { status: 404 },
            },
            1,
        );
        assert_eq!(absent.usable_raw(), None);
        assert!(absent.touched_network());
    }

    #[test]
    fn failure_text_comes_from_the_error() {
        let entry = LedgerEntry::Acquisition(AcquisitionRecord::new(
            date(),
            AcquisitionOutcome::Failed {
                error: PipelineError::Integrity("not a zip".into()),
            },
            1,
        ));
        assert_eq!(entry.failure().as_deref(), Some("invalid archive: not a zip"));
        assert_eq!(entry.date(), Some(date()));
    }

    #[test]
    fn records_serialize_flat() {
        let record = AcquisitionRecord::new(
            date(),
            AcquisitionOutcome::Skipped {
                reason: SkipReason::ResourceAbsent { status: 404 },
            },
            1,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["outcome"], "skipped");
        assert_eq!(value["reason"], "resource_absent");
        assert_eq!(value["status"], 404);
        assert_eq!(value["date"], "2025-01-02");
    }
}
