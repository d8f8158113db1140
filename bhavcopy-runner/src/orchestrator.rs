//! Run orchestrator: the date loop.
//!
//! For every calendar date requested the orchestrator records exactly one of:
//! a calendar exclusion, an acquisition record, or an acquisition record
//! followed by a curation record. Curation only runs when acquisition left a
//! usable raw artifact behind.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use bhavcopy_core::{
    calendar_days, date_from_raw_file_name, AcquisitionPipeline, ArchiveSource,
    CalendarExclusion, CurationConverter, LedgerEntry, LedgerError, LedgerReport,
    LedgerSummary, PipelineError,
};

use crate::config::ConfigError;
use crate::context::{RunContext, RunOutcome};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot create output root {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write run reports: {0}")]
    Ledger(#[from] LedgerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Acquire, then curate every date with a usable raw artifact.
    Full,
    AcquireOnly,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub counts: LedgerSummary,
    pub failures: BTreeMap<NaiveDate, String>,
    pub report: LedgerReport,
}

impl RunSummary {
    fn from_outcome(outcome: RunOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            counts: outcome.summary,
            failures: outcome.failures,
            report: outcome.report,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && self.counts.failed() == 0
    }

    /// Process exit status: 1 if any date hard-failed.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }

    /// Emit the end-of-run summary log lines.
    pub fn log(&self) {
        let c = &self.counts;
        info!(
            run_id = %self.run_id,
            acquired = c.acquired,
            acquire_skipped = c.acquire_skipped,
            acquire_failed = c.acquire_failed,
            curated = c.curated,
            curate_skipped = c.curate_skipped,
            curate_failed = c.curate_failed,
            excluded = c.excluded,
            "run finished"
        );
        for (date, reason) in &self.failures {
            warn!(%date, %reason, "date failed");
        }
        info!(path = %self.report.failed_downloads.display(), "failure list");
    }
}

pub struct RunOrchestrator<'a> {
    ctx: RunContext,
    source: &'a dyn ArchiveSource,
    mode: RunMode,
    force: bool,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(ctx: RunContext, source: &'a dyn ArchiveSource) -> Self {
        Self {
            ctx,
            source,
            mode: RunMode::Full,
            force: false,
        }
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Re-acquire and re-curate even when artifacts exist.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Process every calendar date in `[start, end]`.
    pub fn run(self, start: NaiveDate, end: NaiveDate) -> Result<RunSummary, RunError> {
        info!(%start, %end, mode = ?self.mode, "starting run");
        self.run_dates(&calendar_days(start, end))
    }

    /// Process an explicit date list (e.g. a failure list re-run).
    pub fn run_dates(self, dates: &[NaiveDate]) -> Result<RunSummary, RunError> {
        let dates: BTreeSet<NaiveDate> = dates.iter().copied().collect();
        let mut trading = Vec::with_capacity(dates.len());
        for date in dates {
            match self.ctx.calendar().exclusion(date) {
                Some(reason) => {
                    info!(%date, reason = reason.as_str(), "exchange closed");
                    self.ctx
                        .record(LedgerEntry::Excluded(CalendarExclusion { date, reason }));
                }
                None => trading.push(date),
            }
        }

        let this = self.ensure_output_root()?;
        info!(
            run_id = this.ctx.run_id(),
            trading_days = trading.len(),
            workers = this.ctx.config().workers,
            degraded_calendar = this.ctx.calendar().is_degraded(),
            "processing dates"
        );
        this.for_each_parallel(&trading, |date| this.process(*date))?;
        this.finish()
    }

    /// Curate already-downloaded raw files (standalone curation).
    ///
    /// Each input is dated from its file name; undatable inputs become error rows.
    pub fn curate_inputs(self, inputs: &[PathBuf]) -> Result<RunSummary, RunError> {
        let this = self.ensure_output_root()?;
        info!(run_id = this.ctx.run_id(), inputs = inputs.len(), "curating inputs");
        let config = this.ctx.config();
        let converter =
            CurationConverter::new(this.ctx.layout(), config.curation.required_columns.clone());

        this.for_each_parallel(inputs, |input| {
            let record = match date_from_raw_file_name(input) {
                Some(date) => converter.curate(date, input, this.force),
                None => converter.reject(
                    input,
                    PipelineError::SchemaMismatch(format!(
                        "cannot parse date from file name {}",
                        input.display()
                    )),
                ),
            };
            this.ctx.record(LedgerEntry::Curation(record));
        })?;
        this.finish()
    }

    /// Create the output root, or flush what the ledger holds and abort.
    fn ensure_output_root(self) -> Result<Self, RunError> {
        let root = self.ctx.layout().root().to_path_buf();
        match fs::create_dir_all(&root) {
            Ok(()) => Ok(self),
            Err(source) => {
                if let Err(e) = self.ctx.finish() {
                    warn!(error = %e, "could not flush ledger after output root failure");
                }
                Err(RunError::OutputRoot { path: root, source })
            }
        }
    }

    /// Run `f` over `items`, on a bounded pool when more than one worker is configured.
    fn for_each_parallel<T, F>(&self, items: &[T], f: F) -> Result<(), RunError>
    where
        T: Sync,
        F: Fn(&T) + Send + Sync,
    {
        let workers = self.ctx.config().workers;
        if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| RunError::WorkerPool(e.to_string()))?;
            pool.install(|| items.par_iter().for_each(&f));
        } else {
            items.iter().for_each(&f);
        }
        Ok(())
    }

    fn finish(self) -> Result<RunSummary, RunError> {
        let summary = RunSummary::from_outcome(self.ctx.finish()?);
        summary.log();
        Ok(summary)
    }

    /// Acquire (and curate) one trading date, recording each stage.
    fn process(&self, date: NaiveDate) {
        let config = self.ctx.config();
        let layout = self.ctx.layout();

        let acquisition = AcquisitionPipeline::new(self.source, layout, config.retry.clone())
            .acquire(date, self.force);
        let touched_network = acquisition.touched_network();
        let raw = acquisition.usable_raw().map(|p| p.to_path_buf());
        self.ctx.record(LedgerEntry::Acquisition(acquisition));

        if self.mode == RunMode::Full {
            if let Some(raw) = raw {
                let converter =
                    CurationConverter::new(layout, config.curation.required_columns.clone());
                let record = converter.curate(date, &raw, self.force);
                self.ctx.record(LedgerEntry::Curation(record));
            }
        }

        if touched_network && config.request_interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(config.request_interval_ms));
        }
    }
}
