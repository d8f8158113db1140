//! Hive-style partition layout for raw and curated artifacts.
//!
//! Layout under the output root:
//! - raw:     `raw/{category}/year={YYYY}/month={MM}/sec_bhavdata_full_{DDMMYYYY}.csv`
//! - curated: `curated/{category}/year={YYYY}/month={MM}/day={DD}.parquet`
//!
//! The optional legacy directory uses the downloader's old flat month folders:
//! `{existing}/{YYYYMM}/sec_bhavdata_full_{DDMMYYYY}.csv`.

use chrono::{Datelike, NaiveDate};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PipelineError;

pub const RAW_FILE_PREFIX: &str = "sec_bhavdata_full_";
pub const RAW_FILE_EXT: &str = "csv";
pub const CURATED_FILE_EXT: &str = "parquet";

/// Name of the raw member inside the remote archive for a date.
pub fn raw_file_name(date: NaiveDate) -> String {
    format!("{RAW_FILE_PREFIX}{}.{RAW_FILE_EXT}", date.format("%d%m%Y"))
}

/// Parse the trade date from a raw file name: the stem ends in `DDMMYYYY`.
pub fn date_from_raw_file_name(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() < 8 || !stem.is_char_boundary(stem.len() - 8) {
        return None;
    }
    NaiveDate::parse_from_str(&stem[stem.len() - 8..], "%d%m%Y").ok()
}

/// Canonical on-disk locations for one output tree.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    category: String,
    existing_dir: Option<PathBuf>,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            category: category.into(),
            existing_dir: None,
        }
    }

    /// Also treat files under a legacy download directory as already acquired.
    pub fn with_existing_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.existing_dir = dir;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    fn partition_dir(&self, stage: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(stage)
            .join(&self.category)
            .join(format!("year={}", date.year()))
            .join(format!("month={:02}", date.month()))
    }

    /// `{root}/raw/{category}/year=YYYY/month=MM/`
    pub fn raw_dir(&self, date: NaiveDate) -> PathBuf {
        self.partition_dir("raw", date)
    }

    pub fn raw_path(&self, date: NaiveDate) -> PathBuf {
        self.raw_dir(date).join(raw_file_name(date))
    }

    /// `{root}/curated/{category}/year=YYYY/month=MM/day=DD.parquet`
    pub fn curated_path(&self, date: NaiveDate) -> PathBuf {
        self.partition_dir("curated", date)
            .join(format!("day={:02}.{CURATED_FILE_EXT}", date.day()))
    }

    /// Path of the date's file in the legacy directory, if one is configured.
    pub fn existing_path(&self, date: NaiveDate) -> Option<PathBuf> {
        self.existing_dir.as_ref().map(|dir| {
            dir.join(date.format("%Y%m").to_string())
                .join(raw_file_name(date))
        })
    }

    /// Best-effort relative rendering for reports; falls back to the full path.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique sibling temp path: `{name}.tmp-{pid}-{n}`.
///
/// Temp files never share the canonical name, so a reader that only looks at
/// canonical paths never observes a partial write.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp-{}-{n}", std::process::id()))
}

/// Publish `path` atomically: `fill` writes into a fresh temp sibling, which
/// is then renamed over the canonical name. On any error the temp is removed.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<u64, PipelineError>
where
    F: FnOnce(&mut fs::File) -> Result<(), PipelineError>,
{
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::WriteFailure(format!("no parent dir: {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| PipelineError::WriteFailure(format!("create {}: {e}", parent.display())))?;

    let tmp = temp_sibling(path);
    let result = fill_and_rename(&tmp, path, fill);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn fill_and_rename<F>(tmp: &Path, path: &Path, fill: F) -> Result<u64, PipelineError>
where
    F: FnOnce(&mut fs::File) -> Result<(), PipelineError>,
{
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .map_err(|e| PipelineError::WriteFailure(format!("create {}: {e}", tmp.display())))?;
    fill(&mut file)?;
    file.flush()
        .and_then(|_| file.sync_all())
        .map_err(|e| PipelineError::WriteFailure(format!("sync {}: {e}", tmp.display())))?;
    let size = file
        .metadata()
        .map_err(|e| PipelineError::WriteFailure(format!("stat {}: {e}", tmp.display())))?
        .len();
    drop(file);
    fs::rename(tmp, path).map_err(|e| {
        PipelineError::WriteFailure(format!("atomic rename to {}: {e}", path.display()))
    })?;
    Ok(size)
}

/// Atomically write a byte buffer.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<u64, PipelineError> {
    write_atomic(path, |f| {
        f.write_all(bytes)
            .map_err(|e| PipelineError::WriteFailure(format!("write: {e}")))
    })
}

/// Atomically copy `src` to `dst`.
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<u64, PipelineError> {
    let mut input = fs::File::open(src)
        .map_err(|e| PipelineError::WriteFailure(format!("open {}: {e}", src.display())))?;
    write_atomic(dst, |f| {
        std::io::copy(&mut input, f)
            .map(|_| ())
            .map_err(|e| PipelineError::WriteFailure(format!("copy: {e}")))
    })
}

/// Size in bytes, or 0 if the file is missing.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn partition_paths() {
        let layout = StorageLayout::new("/data/out", "cm");
        let date = d(2019, 8, 23);
        assert_eq!(
            layout.raw_path(date),
            PathBuf::from("/data/out/raw/cm/year=2019/month=08/sec_bhavdata_full_23082019.csv")
        );
        assert_eq!(
            layout.curated_path(date),
            PathBuf::from("/data/out/curated/cm/year=2019/month=08/day=23.parquet")
        );
        assert_eq!(layout.existing_path(date), None);
    }

    #[test]
    fn legacy_month_folder() {
        let layout =
            StorageLayout::new("/out", "cm").with_existing_dir(Some(PathBuf::from("/legacy")));
        assert_eq!(
            layout.existing_path(d(2025, 2, 3)),
            Some(PathBuf::from("/legacy/202502/sec_bhavdata_full_03022025.csv"))
        );
    }

    #[test]
    fn date_round_trips_through_file_name() {
        let date = d(2025, 12, 31);
        let name = raw_file_name(date);
        assert_eq!(date_from_raw_file_name(Path::new(&name)), Some(date));
        assert_eq!(date_from_raw_file_name(Path::new("notes.csv")), None);
        assert_eq!(date_from_raw_file_name(Path::new("x_99999999.csv")), None);
    }

    #[test]
    fn atomic_write_leaves_no_temp_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/day=01.parquet");

        let err = write_atomic(&target, |f| {
            f.write_all(b"partial").unwrap();
            Err(PipelineError::WriteFailure("simulated crash".into()))
        })
        .unwrap_err();
        assert_eq!(err.kind(), "write_failure");
        assert!(!target.exists());
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_overwrite_keeps_prior_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("day=02.parquet");
        write_bytes_atomic(&target, b"complete v1").unwrap();

        let _ = write_atomic(&target, |f| {
            f.write_all(b"trunc").unwrap();
            Err(PipelineError::WriteFailure("interrupted".into()))
        });
        assert_eq!(fs::read(&target).unwrap(), b"complete v1");
    }
}
