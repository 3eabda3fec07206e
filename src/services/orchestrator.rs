use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::{CursorScope, DbError, WeatherStore};
use crate::fetch_error::FetchError;
use crate::fetcher::FeedFetcher;
use crate::parsing::{ReadingConventions, TimeNormalizer};
use crate::services::backfill_planner::{BackfillPlanner, PlannedWindow};
use crate::services::import_service::{ImportError, ImportService, TargetOutcome, TargetReport};
use crate::services::observation_writer::ObservationWriter;
use crate::services::station_reconciler::{CatalogSyncReport, StationReconciler};
use crate::source::{DateRange, FeedRequest, SourceFamily};
use crate::station_directory::{DirectoryError, StationDirectoryResolver};

pub const HOURS_PER_YEAR: u64 = 8760;
pub const HOURS_PER_DAY: u64 = 24;

/// Run-level failure: nothing (more) can be done
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Storage failure: {source}")]
    Storage {
        #[source]
        source: DbError,
        /// Counts accumulated before the failure
        statistics: Box<RunStatistics>,
    },

    #[error("Invalid window: {0}")]
    InvalidWindow(String),
}

impl From<DbError> for RunError {
    fn from(source: DbError) -> Self {
        RunError::Storage {
            source,
            statistics: Box::default(),
        }
    }
}

impl From<FetchError> for RunError {
    fn from(e: FetchError) -> Self {
        RunError::Setup(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationSelector {
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// Dates (daily feeds) or the years they span (yearly feeds)
    Explicit(DateRange),
    /// Configured historical start through yesterday (or the current year)
    Historical,
    /// Day after the stored cursor through yesterday
    Incremental,
    /// The last N complete days
    RecentDays(u32),
    /// Dates covering the last N hours
    HoursBack(u32),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: SourceFamily,
    pub stations: StationSelector,
    pub window: WindowSpec,
    pub dry_run: bool,
    pub skip_existing: bool,
    /// Cap on stations (per-station feeds) or dates (daily feeds)
    pub limit: Option<usize>,
    /// Reference "now"; defaults to the wall clock
    pub as_of: Option<DateTime<Utc>>,
}

impl RunOptions {
    pub fn new(source: SourceFamily, window: WindowSpec) -> Self {
        Self {
            source,
            stations: StationSelector::All,
            window,
            dry_run: false,
            skip_existing: false,
            limit: None,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunEstimate {
    pub stations: usize,
    /// Days (daily feeds) or years (yearly feeds)
    pub periods: usize,
    pub targets: usize,
    pub projected_records: u64,
    pub projected_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetFailure {
    pub target: String,
    pub message: String,
}

/// Counters for one run, owned by the orchestrator and returned at the end
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub targets_total: usize,
    pub targets_succeeded: usize,
    pub targets_no_data: usize,
    pub targets_failed: usize,
    pub records_imported: u64,
    pub records_skipped: u64,
    pub rows_dropped: u64,
    pub stations_created: usize,
    pub stations_updated: usize,
    pub stations_excluded: usize,
    pub failures: Vec<TargetFailure>,
    pub elapsed: Duration,
    pub window: Option<String>,
    pub up_to_date: bool,
    pub estimate: Option<DryRunEstimate>,
}

impl RunStatistics {
    pub fn is_success(&self) -> bool {
        self.targets_failed == 0
    }

    fn record_import(&mut self, report: TargetReport) {
        self.targets_succeeded += 1;
        self.records_imported += report.inserted;
        self.records_skipped += report.skipped;
        self.rows_dropped += report.dropped;
        self.stations_created += report.stations_created;
        self.stations_updated += report.stations_updated;
    }

    fn record_failure(&mut self, target: &FeedRequest, error: &ImportError) {
        self.targets_failed += 1;
        self.failures.push(TargetFailure {
            target: target.to_string(),
            message: error.to_string(),
        });
    }
}

/// Drives a run: discovery, planning, then each target in turn
pub struct BatchOrchestrator {
    store: Arc<dyn WeatherStore>,
    directory: StationDirectoryResolver,
    importer: ImportService,
    reconciler: StationReconciler,
    config: Config,
    show_progress: bool,
}

impl BatchOrchestrator {
    pub fn new(config: Config, store: Arc<dyn WeatherStore>) -> Result<Self, RunError> {
        let fetcher = FeedFetcher::new(&config)?;
        let lst_offset = config
            .eccc_lst_offset()
            .map_err(|e| RunError::Setup(e.to_string()))?;
        let conventions = ReadingConventions::new(
            TimeNormalizer::new(config.region_timezone, lst_offset),
            &config.region_code,
        )
        .with_eccc_wind_in_degrees(config.eccc_wind_in_degrees);
        let reconciler = StationReconciler::new(store.clone());

        Ok(Self {
            directory: StationDirectoryResolver::new(fetcher.clone(), &config),
            importer: ImportService::new(fetcher, reconciler.clone(), conventions),
            reconciler,
            store,
            config,
            show_progress: false,
        })
    }

    /// Draw a terminal progress bar while targets are processed
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Reconcile the station registry against the station feed
    #[instrument(skip(self))]
    pub async fn sync_stations(&self, dry_run: bool) -> Result<CatalogSyncReport, RunError> {
        let catalog = self.directory.fetch_station_catalog().await?;
        let report = self
            .reconciler
            .reconcile_catalog(SourceFamily::Bcws, &catalog, &self.config.region_code, dry_run)
            .await?;

        info!(
            "Station sync: {} created, {} updated, {} unchanged, {} skipped",
            report.created, report.updated, report.unchanged, report.skipped
        );
        Ok(report)
    }

    #[instrument(skip(self, options), fields(source = %options.source, dry_run = options.dry_run))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunStatistics, RunError> {
        let started = Instant::now();
        let mut stats = RunStatistics::default();

        let planner = BackfillPlanner::new(
            self.config.region_timezone,
            options.as_of.unwrap_or_else(Utc::now),
        );

        let range = match self.resolve_window(&planner, options).await? {
            PlannedWindow::Range(range) => range,
            PlannedWindow::UpToDate => {
                info!("Nothing to import for {}: already up to date", options.source);
                stats.up_to_date = true;
                stats.elapsed = started.elapsed();
                return Ok(stats);
            }
        };
        stats.window = Some(range.to_string());

        let targets = match options.source {
            SourceFamily::Eccc => self.plan_station_years(options, range, &mut stats).await?,
            SourceFamily::Bcws => self.plan_days(options, range, &mut stats).await?,
        };
        stats.targets_total = targets.len();

        if options.dry_run {
            stats.elapsed = started.elapsed();
            return Ok(stats);
        }

        info!("Processing {} targets for {}", targets.len(), range);
        let progress = self.progress_bar(targets.len());
        let mut writer = ObservationWriter::new(self.store.clone(), self.config.write_batch_size);

        for (index, target) in targets.iter().enumerate() {
            progress.set_message(target.to_string());

            match self.importer.import(target, &mut writer).await {
                Ok(TargetOutcome::Imported(report)) => stats.record_import(report),
                Ok(TargetOutcome::NoData) => stats.targets_no_data += 1,
                Err(ImportError::Storage(source)) => {
                    error!("Storage failure on {}, aborting run: {}", target, source);
                    progress.abandon_with_message("aborted");
                    if let Err(e) = writer.stamp_touched_stations().await {
                        warn!("Could not mark committed stations as updated: {}", e);
                    }
                    stats.elapsed = started.elapsed();
                    return Err(RunError::Storage {
                        source,
                        statistics: Box::new(stats),
                    });
                }
                Err(e) => {
                    warn!("Target {} failed: {}", target, e);
                    stats.record_failure(target, &e);
                }
            }

            progress.inc(1);
            self.report_progress(index + 1, targets.len(), started.elapsed());
        }

        if let Err(source) = writer.finish().await {
            stats.elapsed = started.elapsed();
            return Err(RunError::Storage {
                source,
                statistics: Box::new(stats),
            });
        }

        progress.finish_with_message("done");
        stats.elapsed = started.elapsed();
        info!(
            "Run finished: {} succeeded, {} without data, {} failed, {} records imported in {:.1}s",
            stats.targets_succeeded,
            stats.targets_no_data,
            stats.targets_failed,
            stats.records_imported,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    async fn resolve_window(
        &self,
        planner: &BackfillPlanner,
        options: &RunOptions,
    ) -> Result<PlannedWindow, RunError> {
        let historical_start = self.historical_start(options.source)?;

        Ok(match options.window {
            WindowSpec::Explicit(range) => PlannedWindow::Range(range),
            WindowSpec::Historical => match options.source {
                SourceFamily::Bcws => planner.historical(historical_start),
                SourceFamily::Eccc => {
                    let years = DateRange::years(self.config.eccc_start_year, planner.current_year())
                        .ok_or_else(|| {
                            RunError::InvalidWindow(format!(
                                "start year {} is after {}",
                                self.config.eccc_start_year,
                                planner.current_year()
                            ))
                        })?;
                    PlannedWindow::Range(years)
                }
            },
            WindowSpec::Incremental => {
                planner
                    .next_window(
                        self.store.as_ref(),
                        &CursorScope::Source(options.source),
                        historical_start,
                    )
                    .await?
            }
            WindowSpec::RecentDays(days) => planner.trailing_days(days).ok_or_else(|| {
                RunError::InvalidWindow(format!("{days} days back is out of range"))
            })?,
            WindowSpec::HoursBack(hours) => planner.hourly_refresh(hours).ok_or_else(|| {
                RunError::InvalidWindow(format!("{hours} hours back is out of range"))
            })?,
        })
    }

    fn historical_start(&self, source: SourceFamily) -> Result<NaiveDate, RunError> {
        match source {
            SourceFamily::Bcws => Ok(self.config.bcws_start_date),
            SourceFamily::Eccc => NaiveDate::from_ymd_opt(self.config.eccc_start_year, 1, 1)
                .ok_or_else(|| {
                    RunError::InvalidWindow(format!(
                        "invalid start year {}",
                        self.config.eccc_start_year
                    ))
                }),
        }
    }

    /// Daily feeds: one target per date, every station in each document
    async fn plan_days(
        &self,
        options: &RunOptions,
        range: DateRange,
        stats: &mut RunStatistics,
    ) -> Result<Vec<FeedRequest>, RunError> {
        if options.stations != StationSelector::All {
            warn!("{} documents cover every station; station selection is ignored", options.source);
        }
        if options.skip_existing {
            warn!("skip-existing applies to per-station feeds only; ignored for {}", options.source);
        }

        let dates: Vec<NaiveDate> = range
            .days()
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        if options.dry_run {
            let stations = self.directory.list_stations(options.source).await?.len();
            let days = dates.len();
            stats.estimate = Some(DryRunEstimate {
                stations,
                periods: days,
                targets: days,
                projected_records: (stations * days) as u64 * HOURS_PER_DAY,
                projected_duration: self.unit_cost(days),
            });
            log_estimate(stats);
        }

        Ok(dates
            .into_iter()
            .map(|date| FeedRequest::daily(options.source, date))
            .collect())
    }

    /// Per-station feeds: one target per station per year
    async fn plan_station_years(
        &self,
        options: &RunOptions,
        range: DateRange,
        stats: &mut RunStatistics,
    ) -> Result<Vec<FeedRequest>, RunError> {
        let mut stations = match &options.stations {
            StationSelector::Only(codes) => codes.clone(),
            StationSelector::All => self.directory.list_stations(options.source).await?,
        };

        if options.skip_existing {
            let before = stations.len();
            let mut remaining = Vec::with_capacity(before);
            for code in stations {
                if !self.store.has_any_observation(options.source, &code).await? {
                    remaining.push(code);
                }
            }
            stats.stations_excluded = before - remaining.len();
            info!("Skipping {} stations that already have data", stats.stations_excluded);
            stations = remaining;
        }

        if let Some(limit) = options.limit {
            stations.truncate(limit);
        }

        let years: Vec<i32> = range.year_span().collect();

        if options.dry_run {
            let units = stations.len() * years.len();
            stats.estimate = Some(DryRunEstimate {
                stations: stations.len(),
                periods: years.len(),
                targets: units,
                projected_records: units as u64 * HOURS_PER_YEAR,
                projected_duration: self.unit_cost(units),
            });
            log_estimate(stats);
        }

        Ok(stations
            .iter()
            .flat_map(|code| {
                years
                    .iter()
                    .map(move |year| FeedRequest::station_year(options.source, code.clone(), *year))
            })
            .collect())
    }

    fn unit_cost(&self, units: usize) -> Duration {
        Duration::try_from_secs_f64(units as f64 * self.config.estimate_seconds_per_unit.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar
    }

    fn report_progress(&self, completed: usize, total: usize, elapsed: Duration) {
        let interval = self.config.progress_interval.max(1);
        if completed % interval != 0 || completed == total {
            return;
        }

        let per_target = elapsed.as_secs_f64() / completed as f64;
        let remaining = Duration::from_secs_f64(per_target * (total - completed) as f64);
        info!(
            "Progress: {}/{} targets ({:.1}%), elapsed {:.0}s, ~{:.0}s remaining",
            completed,
            total,
            completed as f64 * 100.0 / total as f64,
            elapsed.as_secs_f64(),
            remaining.as_secs_f64()
        );
    }
}

fn log_estimate(stats: &RunStatistics) {
    if let Some(estimate) = &stats.estimate {
        info!(
            "Dry run: {} stations x {} periods = {} targets, ~{} records, ~{:.1} hours",
            estimate.stations,
            estimate.periods,
            estimate.targets,
            estimate.projected_records,
            estimate.projected_duration.as_secs_f64() / 3600.0
        );
    }
}
