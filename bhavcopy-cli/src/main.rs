//! Bhavcopy CLI: download, curate and audit NSE daily bhavcopy archives.
//!
//! Commands:
//! - `download`: fetch raw archives for a date range
//! - `run`: fetch and convert each trading day to Parquet
//! - `curate`: convert already-downloaded raw CSVs found under a directory
//! - `retry-failed`: re-run the dates listed in a `failed_downloads-*.json`
//! - `calendar`: list trading days and exclusions for a range

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use bhavcopy_core::{
    calendar_days, ArchiveSource, CircuitBreaker, FailureList, NseArchiveSource, TradingCalendar,
};
use bhavcopy_runner::{
    discover_inputs, PipelineConfig, RunContext, RunMode, RunOrchestrator, RunSummary,
};

/// The archive does not go further back than this.
const EARLIEST_ARCHIVE_DATE: (i32, u32, u32) = (2010, 2, 1);

#[derive(Parser)]
#[command(
    name = "bhavcopy",
    about = "NSE bhavcopy downloader and Parquet curation pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the commands that build a run.
#[derive(Args)]
struct RunArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output root for raw/ and curated/ trees.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Legacy download directory ({dir}/{YYYYMM}/sec_bhavdata_full_DDMMYYYY.csv).
    #[arg(long)]
    existing_dir: Option<PathBuf>,

    /// Holiday list: a file or an http(s) URL with one YYYY-MM-DD per line.
    #[arg(long)]
    holidays: Option<String>,

    /// Worker threads (1 = strictly sequential).
    #[arg(long)]
    workers: Option<usize>,

    /// Re-fetch and re-convert even if artifacts exist.
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download raw bhavcopy archives for a date range.
    Download {
        /// Start date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Download and convert each trading day to Parquet.
    Run {
        /// Start date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Convert raw CSVs found under RAW_ROOT into OUTPUT_ROOT's curated tree.
    Curate {
        /// Root folder containing raw CSV files.
        raw_root: PathBuf,

        /// Root folder for the raw/ and curated/ trees.
        output_root: PathBuf,

        /// Filename glob. Defaults to sec_bhavdata_full_*.csv.
        #[arg(long)]
        pattern: Option<String>,

        /// Overwrite existing copies and Parquet files.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Re-run the dates listed in a failure list.
    RetryFailed {
        /// A failed_downloads-*.json written by a previous run.
        failures: PathBuf,

        /// Only download; skip Parquet conversion.
        #[arg(long, default_value_t = false)]
        acquire_only: bool,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Print trading days and exclusions for a date range.
    Calendar {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Holiday list file or URL.
        #[arg(long)]
        holidays: Option<String>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let summary = match cli.command {
        Commands::Download { start, end, run } => {
            run_range(start, end, run, RunMode::AcquireOnly)?
        }
        Commands::Run { start, end, run } => run_range(start, end, run, RunMode::Full)?,
        Commands::Curate {
            raw_root,
            output_root,
            pattern,
            force,
            config,
        } => run_curate(raw_root, output_root, pattern, force, config)?,
        Commands::RetryFailed {
            failures,
            acquire_only,
            run,
        } => {
            let mode = if acquire_only {
                RunMode::AcquireOnly
            } else {
                RunMode::Full
            };
            run_retry_failed(failures, run, mode)?
        }
        Commands::Calendar {
            start,
            end,
            holidays,
        } => return run_calendar(&start, &end, holidays),
    };

    if summary.exit_code() != 0 {
        std::process::exit(summary.exit_code());
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new("bhavcopy=info,bhavcopy_core=info,bhavcopy_runner=info")
        });

    if std::env::var("BHAVCOPY_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

/// Resolve and sanity-check `[start, end]`.
fn date_range(start: Option<String>, end: Option<String>) -> Result<(NaiveDate, NaiveDate)> {
    let today = chrono::Local::now().date_naive();
    let start = start.as_deref().map(parse_date).transpose()?.unwrap_or(today);
    let end = end.as_deref().map(parse_date).transpose()?.unwrap_or(today);

    let (y, m, d) = EARLIEST_ARCHIVE_DATE;
    let earliest = NaiveDate::from_ymd_opt(y, m, d).context("earliest archive date")?;
    if start > end {
        bail!("start date {start} is after end date {end}");
    }
    if end > today {
        bail!("end date {end} is in the future");
    }
    if start < earliest {
        bail!("start date must be on or after {earliest}");
    }
    Ok((start, end))
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(dir) = &args.output_dir {
        config.output_root = dir.clone();
    }
    if let Some(dir) = &args.existing_dir {
        config.existing_dir = Some(dir.clone());
    }
    if let Some(feed) = &args.holidays {
        config.holiday_feed = feed.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
}

fn build_source(config: &PipelineConfig) -> Result<NseArchiveSource> {
    let breaker = Arc::new(CircuitBreaker::for_archive());
    NseArchiveSource::new(config.fetch.clone(), breaker).context("building NSE client")
}

fn run_range(
    start: Option<String>,
    end: Option<String>,
    args: RunArgs,
    mode: RunMode,
) -> Result<RunSummary> {
    let (start, end) = date_range(start, end)?;
    let mut config = load_config(args.config.as_ref())?;
    apply_overrides(&mut config, &args);

    let source = build_source(&config)?;
    let ctx = RunContext::new(config)?;
    let summary = RunOrchestrator::new(ctx, &source as &dyn ArchiveSource)
        .mode(mode)
        .force(args.force)
        .run(start, end)?;
    Ok(summary)
}

fn run_retry_failed(failures: PathBuf, args: RunArgs, mode: RunMode) -> Result<RunSummary> {
    let list = FailureList::load(&failures)?;
    if list.is_empty() {
        tracing::info!(path = %failures.display(), "failure list is empty, nothing to retry");
    }
    let mut config = load_config(args.config.as_ref())?;
    apply_overrides(&mut config, &args);

    let source = build_source(&config)?;
    let ctx = RunContext::new(config)?;
    let summary = RunOrchestrator::new(ctx, &source)
        .mode(mode)
        .force(args.force)
        .run_dates(&list.dates())?;
    Ok(summary)
}

fn run_curate(
    raw_root: PathBuf,
    output_root: PathBuf,
    pattern: Option<String>,
    force: bool,
    config_path: Option<PathBuf>,
) -> Result<RunSummary> {
    let mut config = load_config(config_path.as_ref())?;
    config.output_root = output_root;
    if let Some(p) = pattern {
        config.curation.pattern = p;
    }

    let inputs = discover_inputs(&raw_root, &config.curation.pattern)?;
    if inputs.is_empty() {
        tracing::warn!(
            root = %raw_root.display(),
            pattern = %config.curation.pattern,
            "no matching CSV files found"
        );
    } else {
        tracing::info!(root = %raw_root.display(), count = inputs.len(), "found CSV files");
    }

    // Curation never fetches; the source is only there to satisfy the orchestrator.
    let source = build_source(&config)?;
    let ctx = RunContext::with_calendar(config, TradingCalendar::recurring_only())?;
    let summary = RunOrchestrator::new(ctx, &source)
        .force(force)
        .curate_inputs(&inputs)?;
    Ok(summary)
}

fn run_calendar(start: &str, end: &str, holidays: Option<String>) -> Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if start > end {
        bail!("start date {start} is after end date {end}");
    }
    let feed = bhavcopy_core::HolidayFeed::parse(holidays.as_deref().unwrap_or_default());
    let calendar = TradingCalendar::load(&feed);

    let mut trading = 0;
    for date in calendar_days(start, end) {
        match calendar.exclusion(date) {
            None => {
                trading += 1;
                println!("{date}  {:<9}  trading", date.format("%A"));
            }
            Some(reason) => println!("{date}  {:<9}  {}", date.format("%A"), reason.as_str()),
        }
    }
    println!(
        "{trading} trading days{}",
        if calendar.is_degraded() {
            " (recurring holidays only)"
        } else {
            ""
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_dates() {
        assert_eq!(
            parse_date("2025-01-02").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
        );
        let err = parse_date("02-01-2025").unwrap_err();
        assert!(err.to_string().contains("expected YYYY-MM-DD"));
    }

    #[test]
    fn date_range_bounds() {
        let (start, end) =
            date_range(Some("2025-01-01".into()), Some("2025-01-07".into())).unwrap();
        assert!(start < end);
        assert!(date_range(Some("2025-01-07".into()), Some("2025-01-01".into())).is_err());
        assert!(date_range(Some("2009-12-31".into()), Some("2010-03-01".into())).is_err());
        assert!(date_range(Some("2025-01-01".into()), Some("9999-01-01".into())).is_err());
    }
}
