//! Status ledger: append-only per-run record of every date's outcome.
//!
//! Entries accumulate in memory during the run. Failures are additionally
//! appended to a JSONL journal the moment they are recorded, so an
//! interrupted run still leaves a trace. At run end `flush` writes:
//!
//! - `download_status-{run_id}.csv` (acquisition and calendar rows)
//! - `file_processing_status-{run_id}.csv` (curation rows)
//! - `failed_downloads-{run_id}.json` (`{"YYYY-MM-DD": "reason"}`)
//!
//! Report files are created with `create_new`: two runs never share a file.

use crate::calendar::ExclusionReason;
use crate::layout::file_size;
use crate::record::{
    AcquisitionOutcome, AcquisitionRecord, CurationOutcome, CurationRecord, LedgerEntry,
};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("report {path} already exists")]
    ReportExists { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Identity of one run: where its reports go and what they are called.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub log_dir: PathBuf,
    /// Root that report paths are rendered relative to.
    pub output_root: PathBuf,
}

impl RunMetadata {
    /// `run_id = {start %Y%m%d_%H%M%S}-{pid}`.
    pub fn new(log_dir: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        let started_at = Local::now();
        Self {
            run_id: format!(
                "{}-{}",
                started_at.format("%Y%m%d_%H%M%S"),
                std::process::id()
            ),
            started_at,
            log_dir: log_dir.into(),
            output_root: output_root.into(),
        }
    }

    fn report_path(&self, stem: &str, ext: &str) -> PathBuf {
        self.log_dir.join(format!("{stem}-{}.{ext}", self.run_id))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.report_path("failures", "jsonl")
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.output_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Counts per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub excluded: usize,
    pub acquired: usize,
    pub acquire_skipped: usize,
    pub acquire_failed: usize,
    pub curated: usize,
    pub curate_skipped: usize,
    pub curate_failed: usize,
}

impl LedgerSummary {
    pub fn failed(&self) -> usize {
        self.acquire_failed + self.curate_failed
    }
}

/// Files written by `flush`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReport {
    pub download_status: Option<PathBuf>,
    pub file_processing_status: Option<PathBuf>,
    pub failed_downloads: PathBuf,
}

#[derive(Debug, Default)]
pub struct StatusLedger {
    entries: Vec<LedgerEntry>,
    journal: Option<PathBuf>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal failures as JSONL to `path` as they are recorded.
    pub fn with_journal(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            journal: Some(path.into()),
        }
    }

    pub fn record(&mut self, entry: LedgerEntry) {
        if entry.failure().is_some() {
            if let Some(path) = &self.journal {
                if let Err(e) = append_jsonl(path, &entry) {
                    warn!(path = %path.display(), error = %e, "failed to journal failure");
                }
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn acquisitions(&self) -> impl Iterator<Item = &AcquisitionRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Acquisition(r) => Some(r),
            _ => None,
        })
    }

    pub fn curations(&self) -> impl Iterator<Item = &CurationRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Curation(r) => Some(r),
            _ => None,
        })
    }

    /// Dates with a hard failure in either stage.
    pub fn failed_dates(&self) -> BTreeSet<NaiveDate> {
        self.failures().into_keys().collect()
    }

    /// Failure reason per dated failure. Undatable curation errors are not keyed.
    pub fn failures(&self) -> BTreeMap<NaiveDate, String> {
        self.entries
            .iter()
            .filter_map(|e| Some((e.date()?, e.failure()?)))
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut s = LedgerSummary::default();
        for entry in &self.entries {
            match entry {
                LedgerEntry::Excluded(_) => s.excluded += 1,
                LedgerEntry::Acquisition(r) => match r.outcome {
                    AcquisitionOutcome::Success { .. } => s.acquired += 1,
                    AcquisitionOutcome::Skipped { .. } => s.acquire_skipped += 1,
                    AcquisitionOutcome::Failed { .. } => s.acquire_failed += 1,
                },
                LedgerEntry::Curation(r) => match r.outcome {
                    CurationOutcome::Success { .. } => s.curated += 1,
                    CurationOutcome::Skipped { .. } => s.curate_skipped += 1,
                    CurationOutcome::Error { .. } => s.curate_failed += 1,
                },
            }
        }
        s
    }

    /// Write the run reports. Rows are sorted by date.
    pub fn flush(&self, meta: &RunMetadata) -> Result<LedgerReport, LedgerError> {
        fs::create_dir_all(&meta.log_dir).map_err(|source| LedgerError::Io {
            path: meta.log_dir.clone(),
            source,
        })?;

        let mut download_rows: Vec<(NaiveDate, Vec<String>)> = Vec::new();
        let mut processing_rows: Vec<(Option<NaiveDate>, Vec<String>)> = Vec::new();
        for entry in &self.entries {
            match entry {
                LedgerEntry::Excluded(e) => download_rows.push((
                    e.date,
                    vec![
                        e.date.to_string(),
                        weekday(e.date),
                        e.reason.as_str().into(),
                        match e.reason {
                            ExclusionReason::Weekend => "Market closed on weekends".into(),
                            ExclusionReason::Holiday => "Exchange holiday".into(),
                        },
                        "0".into(),
                        String::new(),
                        String::new(),
                        String::new(),
                    ],
                )),
                LedgerEntry::Acquisition(r) => {
                    download_rows.push((r.date, acquisition_row(r, meta)))
                }
                LedgerEntry::Curation(r) => processing_rows.push((r.date, curation_row(r, meta))),
            }
        }
        download_rows.sort_by_key(|(d, _)| *d);
        processing_rows.sort_by_key(|(d, _)| *d);

        let download_status = if download_rows.is_empty() {
            None
        } else {
            let path = meta.report_path("download_status", "csv");
            write_csv(
                &path,
                &[
                    "date",
                    "weekday",
                    "status",
                    "reason",
                    "attempts",
                    "file_path",
                    "file_size",
                    "file_shape",
                ],
                download_rows.into_iter().map(|(_, row)| row),
            )?;
            Some(path)
        };

        let file_processing_status = if processing_rows.is_empty() {
            None
        } else {
            let path = meta.report_path("file_processing_status", "csv");
            write_csv(
                &path,
                &[
                    "File name",
                    "Processing status",
                    "Output file name",
                    "File date",
                    "Weekday",
                    "Input file size",
                    "Output file size",
                    "Input file shape",
                    "Input file path",
                    "Output file path",
                    "Copied input file path",
                ],
                processing_rows.into_iter().map(|(_, row)| row),
            )?;
            Some(path)
        };

        let failed_downloads = meta.report_path("failed_downloads", "json");
        let failures: BTreeMap<String, String> = self
            .failures()
            .into_iter()
            .map(|(d, reason)| (d.to_string(), reason))
            .collect();
        let file = create_report(&failed_downloads)?;
        serde_json::to_writer_pretty(file, &failures).map_err(|source| LedgerError::Json {
            path: failed_downloads.clone(),
            source,
        })?;

        info!(
            log_dir = %meta.log_dir.display(),
            run_id = %meta.run_id,
            failures = failures.len(),
            "status reports written"
        );
        Ok(LedgerReport {
            download_status,
            file_processing_status,
            failed_downloads,
        })
    }
}

fn weekday(date: NaiveDate) -> String {
    date.format("%A").to_string()
}

fn acquisition_row(r: &AcquisitionRecord, meta: &RunMetadata) -> Vec<String> {
    let (status, reason, path, size, shape) = match &r.outcome {
        AcquisitionOutcome::Success {
            raw_path,
            size_bytes,
            shape,
            ..
        } => (
            "success".to_string(),
            String::new(),
            meta.relative(raw_path),
            size_bytes.to_string(),
            shape.to_string(),
        ),
        AcquisitionOutcome::Skipped { reason } => (
            reason.status().to_string(),
            reason.describe(),
            reason.raw_path().map(|p| meta.relative(p)).unwrap_or_default(),
            reason
                .raw_path()
                .map(|p| file_size(p).to_string())
                .unwrap_or_default(),
            String::new(),
        ),
        AcquisitionOutcome::Failed { error } => (
            "failed".to_string(),
            error.to_string(),
            String::new(),
            String::new(),
            String::new(),
        ),
    };
    vec![
        r.date.to_string(),
        weekday(r.date),
        status,
        reason,
        r.attempts.to_string(),
        path,
        size,
        shape,
    ]
}

fn curation_row(r: &CurationRecord, meta: &RunMetadata) -> Vec<String> {
    let (output_path, output_size) = match &r.outcome {
        CurationOutcome::Success {
            output_path,
            output_size,
            ..
        }
        | CurationOutcome::Skipped {
            output_path,
            output_size,
        } => (Some(output_path.as_path()), *output_size),
        CurationOutcome::Error { .. } => (None, 0),
    };
    vec![
        r.input_file_name(),
        r.outcome.label().into(),
        output_path
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        r.date.map(|d| d.to_string()).unwrap_or_else(|| "N/A".into()),
        r.weekday.clone().unwrap_or_else(|| "N/A".into()),
        r.input_size.to_string(),
        output_size.to_string(),
        r.input_shape.map(|s| s.to_string()).unwrap_or_default(),
        r.input_path.display().to_string(),
        output_path.map(|p| meta.relative(p)).unwrap_or_default(),
        r.copied_input_path
            .as_deref()
            .map(|p| meta.relative(p))
            .unwrap_or_default(),
    ]
}

fn create_report(path: &Path) -> Result<File, LedgerError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                LedgerError::ReportExists {
                    path: path.to_path_buf(),
                }
            } else {
                LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
}

fn write_csv(
    path: &Path,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<(), LedgerError> {
    let csv_err = |source: csv::Error| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_writer(create_report(path)?);
    writer.write_record(header).map_err(csv_err)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn append_jsonl(path: &Path, entry: &LedgerEntry) -> io::Result<()> {
    let json =
        serde_json::to_string(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{json}")?;
    file.flush()
}

/// A failure list read back from `failed_downloads-*.json` for a selective re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FailureList(BTreeMap<NaiveDate, String>);

impl FailureList {
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let text = fs::read_to_string(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| LedgerError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.0.keys().copied().collect()
    }

    pub fn reason(&self, date: NaiveDate) -> Option<&str> {
        self.0.get(&date).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
