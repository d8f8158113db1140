//! Curation: raw CSV → one Parquet file per trading date.
//!
//! The whole file is parsed with full-file schema inference, header names are
//! trimmed (the exchange pads them with spaces), and the required columns are
//! checked before anything is written. Outputs land via temp file + rename.

use crate::archive::Shape;
use crate::error::PipelineError;
use crate::layout::{copy_atomic, file_size, write_atomic, StorageLayout};
use crate::record::{CurationOutcome, CurationRecord};
use chrono::NaiveDate;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Columns every bhavcopy file must carry.
pub const DEFAULT_REQUIRED_COLUMNS: [&str; 4] = ["SYMBOL", "SERIES", "DATE1", "CLOSE_PRICE"];

pub struct CurationConverter<'a> {
    layout: &'a StorageLayout,
    required_columns: Vec<String>,
}

impl<'a> CurationConverter<'a> {
    pub fn new(layout: &'a StorageLayout, required_columns: Vec<String>) -> Self {
        Self {
            layout,
            required_columns,
        }
    }

    pub fn with_default_columns(layout: &'a StorageLayout) -> Self {
        Self::new(
            layout,
            DEFAULT_REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        )
    }

    pub fn curate(&self, date: NaiveDate, raw: &Path, force: bool) -> CurationRecord {
        let output_path = self.layout.curated_path(date);
        let mut record = CurationRecord {
            date: Some(date),
            weekday: Some(date.format("%A").to_string()),
            outcome: CurationOutcome::Error {
                reason: PipelineError::Io("not processed".into()),
            },
            input_path: raw.to_path_buf(),
            input_size: file_size(raw),
            input_shape: None,
            copied_input_path: None,
        };

        if !force && output_path.is_file() {
            info!(%date, path = %output_path.display(), "parquet already exists, skipping");
            record.copied_input_path = self.canonical_copy(date, raw).filter(|p| p.is_file());
            record.outcome = CurationOutcome::Skipped {
                output_size: file_size(&output_path),
                output_path,
            };
            return record;
        }

        match self.convert(date, raw, &output_path, force, &mut record) {
            Ok((output_size, shape)) => {
                info!(%date, %shape, output_size, "curated");
                record.outcome = CurationOutcome::Success {
                    output_path,
                    output_size,
                    shape,
                };
            }
            Err(reason) => {
                warn!(%date, input = %raw.display(), error = %reason, "curation failed");
                record.outcome = CurationOutcome::Error { reason };
            }
        }
        record
    }

    /// Error row for an input whose date could not be determined.
    pub fn reject(&self, input: &Path, reason: PipelineError) -> CurationRecord {
        warn!(input = %input.display(), error = %reason, "rejecting input");
        CurationRecord {
            date: None,
            weekday: None,
            outcome: CurationOutcome::Error { reason },
            input_path: input.to_path_buf(),
            input_size: file_size(input),
            input_shape: None,
            copied_input_path: None,
        }
    }

    /// Where `raw` lives (or should live) under the canonical raw partition.
    /// `None` when `raw` already is that file.
    fn canonical_copy(&self, date: NaiveDate, raw: &Path) -> Option<PathBuf> {
        let name = raw.file_name()?;
        let target = self.layout.raw_dir(date).join(name);
        if same_file(&target, raw) {
            None
        } else {
            Some(target)
        }
    }

    fn convert(
        &self,
        date: NaiveDate,
        raw: &Path,
        output_path: &Path,
        force: bool,
        record: &mut CurationRecord,
    ) -> Result<(u64, Shape), PipelineError> {
        let mut df = read_raw_csv(raw)?;
        let shape = Shape::new(df.height(), df.width());
        record.input_shape = Some(shape);
        self.validate(&df)?;

        if let Some(target) = self.canonical_copy(date, raw) {
            if force || !target.is_file() {
                copy_atomic(raw, &target)?;
                info!(%date, to = %self.layout.relative(&target).display(), "copied raw input");
            }
            record.copied_input_path = Some(target);
        }

        let size = write_atomic(output_path, |file| {
            ParquetWriter::new(file)
                .finish(&mut df)
                .map(|_| ())
                .map_err(|e| PipelineError::WriteFailure(format!("write parquet: {e}")))
        })?;
        Ok((size, shape))
    }

    fn validate(&self, df: &DataFrame) -> Result<(), PipelineError> {
        if df.height() == 0 {
            return Err(PipelineError::SchemaMismatch("no data rows".into()));
        }
        let present: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        let missing: Vec<&str> = self
            .required_columns
            .iter()
            .filter(|c| !present.iter().any(|p| p == *c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::SchemaMismatch(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Parse a raw CSV with full schema inference and trimmed header names.
pub fn read_raw_csv(path: &Path) -> Result<DataFrame, PipelineError> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| PipelineError::SchemaMismatch(format!("unreadable CSV: {e}")))?;

    let trimmed: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.trim().to_string())
        .collect();
    df.set_column_names(trimmed)
        .map_err(|e| PipelineError::SchemaMismatch(format!("header: {e}")))?;
    Ok(df)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::write_bytes_atomic;

    const CSV: &str = "SYMBOL, SERIES, DATE1, PREV_CLOSE, CLOSE_PRICE\n\
                       INFY, EQ, 02-Jan-2025, 1890.0, 1900.5\n\
                       TCS, EQ, 02-Jan-2025, 4050.0, 4100.0\n\
                       SBIN, EQ, 02-Jan-2025, 760.1, 765.0\n";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    }

    #[test]
    fn canonical_raw_is_converted_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), "cm");
        let raw = layout.raw_path(date());
        write_bytes_atomic(&raw, CSV.as_bytes()).unwrap();

        let record = CurationConverter::with_default_columns(&layout).curate(date(), &raw, false);
        match &record.outcome {
            CurationOutcome::Success {
                output_path,
                output_size,
                shape,
            } => {
                assert_eq!(output_path, &layout.curated_path(date()));
                assert!(*output_size > 0);
                assert_eq!(*shape, Shape::new(3, 5));
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(record.weekday.as_deref(), Some("Thursday"));
        assert_eq!(record.copied_input_path, None);

        let df = ParquetReader::new(std::fs::File::open(layout.curated_path(date())).unwrap())
            .finish()
            .unwrap();
        assert_eq!(df.shape(), (3, 5));
        assert!(df.column("CLOSE_PRICE").is_ok());
    }

    #[test]
    fn foreign_input_is_copied_into_raw_partition() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("legacy/202501/sec_bhavdata_full_02012025.csv");
        write_bytes_atomic(&input, CSV.as_bytes()).unwrap();
        let layout = StorageLayout::new(dir.path().join("out"), "cm");

        let record = CurationConverter::with_default_columns(&layout).curate(date(), &input, false);
        assert_eq!(record.outcome.label(), "Success");
        let copied = record.copied_input_path.unwrap();
        assert_eq!(copied, layout.raw_path(date()));
        assert_eq!(std::fs::read_to_string(copied).unwrap(), CSV);
    }

    #[test]
    fn existing_output_is_skipped_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), "cm");
        let raw = layout.raw_path(date());
        write_bytes_atomic(&raw, CSV.as_bytes()).unwrap();
        let converter = CurationConverter::with_default_columns(&layout);

        converter.curate(date(), &raw, false);
        let again = converter.curate(date(), &raw, false);
        assert_eq!(again.outcome.label(), "Skipped");
        assert_eq!(again.weekday.as_deref(), Some("Thursday"));

        let forced = converter.curate(date(), &raw, true);
        assert_eq!(forced.outcome.label(), "Success");
    }

    #[test]
    fn missing_required_column_leaves_input_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), "cm");
        let raw = layout.raw_path(date());
        write_bytes_atomic(&raw, b"SYMBOL,SERIES\nINFY,EQ\n").unwrap();

        let record = CurationConverter::with_default_columns(&layout).curate(date(), &raw, false);
        match &record.outcome {
            CurationOutcome::Error { reason } => {
                assert_eq!(reason.kind(), "schema_mismatch");
                assert!(reason.to_string().contains("DATE1"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(!layout.curated_path(date()).exists());
        assert_eq!(std::fs::read(&raw).unwrap(), b"SYMBOL,SERIES\nINFY,EQ\n");
    }

    #[test]
    fn header_only_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), "cm");
        let raw = layout.raw_path(date());
        write_bytes_atomic(&raw, b"SYMBOL,SERIES,DATE1,CLOSE_PRICE\n").unwrap();

        let record = CurationConverter::with_default_columns(&layout).curate(date(), &raw, false);
        assert!(record.is_error());
    }

    #[test]
    fn trimmed_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, CSV).unwrap();
        let df = read_raw_csv(&path).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["SYMBOL", "SERIES", "DATE1", "PREV_CLOSE", "CLOSE_PRICE"]);
    }
}
