//! Bhavcopy Core: trading calendar, archive acquisition, Parquet curation, status ledger.
//!
//! This crate holds the per-date engines of the bhavcopy pipeline:
//! - Trading calendar (weekends plus an exchange holiday feed)
//! - Hive-style storage layout with atomic temp-file publishing
//! - Archive sources (NSE reports API over HTTP) behind the `ArchiveSource` seam
//! - Acquisition pipeline with bounded retry and integrity checks
//! - CSV → Parquet curation with schema validation
//! - Append-only status ledger with CSV/JSON run reports

pub mod acquire;
pub mod archive;
pub mod calendar;
pub mod circuit_breaker;
pub mod curate;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod nse;
pub mod record;
pub mod retry;
pub mod source;

pub use acquire::AcquisitionPipeline;
pub use archive::{extract_member, probe_shape, ExtractedMember, Shape};
pub use calendar::{calendar_days, ExclusionReason, HolidayFeed, TradingCalendar};
pub use circuit_breaker::CircuitBreaker;
pub use curate::{read_raw_csv, CurationConverter, DEFAULT_REQUIRED_COLUMNS};
pub use error::PipelineError;
pub use layout::{date_from_raw_file_name, raw_file_name, StorageLayout, RAW_FILE_PREFIX};
pub use ledger::{
    FailureList, LedgerError, LedgerReport, LedgerSummary, RunMetadata, StatusLedger,
};
pub use nse::{NseArchiveSource, NseSourceConfig};
pub use record::{
    AcquisitionOutcome, AcquisitionRecord, CalendarExclusion, CurationOutcome, CurationRecord,
    LedgerEntry, SkipReason,
};
pub use retry::{Retried, RetryPolicy};
pub use source::{AbsentStatuses, ArchiveSource};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across the worker pool is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TradingCalendar>();
        require_sync::<TradingCalendar>();
        require_send::<StorageLayout>();
        require_sync::<StorageLayout>();
        require_send::<StatusLedger>();
        require_sync::<StatusLedger>();
        require_send::<NseArchiveSource>();
        require_sync::<NseArchiveSource>();
        require_send::<CircuitBreaker>();
        require_sync::<CircuitBreaker>();
        require_send::<AcquisitionPipeline<'static>>();
        require_sync::<AcquisitionPipeline<'static>>();
        require_send::<CurationConverter<'static>>();
        require_sync::<CurationConverter<'static>>();
        require_send::<LedgerEntry>();
        require_sync::<LedgerEntry>();
    }

    /// The transport seam stays object-safe.
    #[test]
    fn archive_source_is_object_safe() {
        fn _fetch_through_dyn(
            source: &dyn ArchiveSource,
            date: chrono::NaiveDate,
        ) -> Result<Vec<u8>, PipelineError> {
            source.fetch(date)
        }
    }
}
