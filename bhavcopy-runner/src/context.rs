//! Run-scoped state: configuration, identity, calendar, layout and ledger.
//!
//! One `RunContext` exists per run. It is shared by reference with the date
//! workers and consumed by `finish`, which flushes the ledger.

use std::collections::BTreeMap;
use std::sync::Mutex;

use bhavcopy_core::{
    LedgerEntry, LedgerError, LedgerReport, LedgerSummary, RunMetadata, StatusLedger,
    StorageLayout, TradingCalendar,
};
use chrono::NaiveDate;

use crate::config::PipelineConfig;
use crate::orchestrator::RunError;

pub struct RunContext {
    config: PipelineConfig,
    meta: RunMetadata,
    calendar: TradingCalendar,
    layout: StorageLayout,
    ledger: Mutex<StatusLedger>,
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub report: LedgerReport,
    pub summary: LedgerSummary,
    pub failures: BTreeMap<NaiveDate, String>,
}

impl RunContext {
    /// Validate the config and build a context, loading its holiday feed.
    pub fn new(config: PipelineConfig) -> Result<Self, RunError> {
        config.validate()?;
        let calendar = TradingCalendar::load(&config.holiday_feed());
        Self::with_calendar(config, calendar)
    }

    pub fn with_calendar(
        config: PipelineConfig,
        calendar: TradingCalendar,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let meta = RunMetadata::new(config.log_dir(), config.output_root.clone());
        let layout = StorageLayout::new(config.output_root.clone(), config.category.clone())
            .with_existing_dir(config.existing_dir.clone());
        Ok(Self {
            ledger: Mutex::new(StatusLedger::with_journal(meta.journal_path())),
            config,
            meta,
            calendar,
            layout,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.meta.run_id
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn record(&self, entry: LedgerEntry) {
        // A panicked worker cannot leave an entry half-pushed.
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record(entry);
    }

    pub fn summary(&self) -> LedgerSummary {
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .summary()
    }

    /// Flush the ledger to the log dir and return what it recorded.
    pub fn finish(self) -> Result<RunOutcome, LedgerError> {
        let ledger = self.ledger.into_inner().unwrap_or_else(|p| p.into_inner());
        let report = ledger.flush(&self.meta)?;
        Ok(RunOutcome {
            run_id: self.meta.run_id,
            report,
            summary: ledger.summary(),
            failures: ledger.failures(),
        })
    }
}
