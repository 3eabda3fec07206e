use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use fire_weather_ingest::config::Config;
use fire_weather_ingest::db::PgWeatherStore;
use fire_weather_ingest::fetcher::FeedFetcher;
use fire_weather_ingest::services::{
    BackfillPlanner, BatchOrchestrator, CatalogSyncReport, RunError, RunOptions, RunStatistics,
    StationSelector, WindowSpec,
};
use fire_weather_ingest::source::{DateRange, SourceFamily};
use fire_weather_ingest::station_directory::StationDirectoryResolver;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Daily fire-weather files, every station per file
    Bcws,
    /// Hourly climate files, one per station per year
    Eccc,
    /// Scheduled update of recent or missing data
    Update,
    /// Reconcile the station registry with the station feed
    SyncStations,
    /// Print the stations a source publishes
    ListStations,
}

#[derive(Parser)]
#[command(name = "weather-import")]
#[command(about = "Import fire-weather and hourly weather observations", long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env)]
    database_url: Option<String>,

    #[arg(value_enum)]
    mode: Mode,

    /// Single date to import (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last date of the range (YYYY-MM-DD), defaults to yesterday
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Station to import (repeatable); defaults to every discovered station
    #[arg(long = "station-id")]
    station_ids: Vec<String>,

    /// Single year to import
    #[arg(long)]
    year: Option<i32>,

    #[arg(long)]
    start_year: Option<i32>,

    /// Defaults to the current year
    #[arg(long)]
    end_year: Option<i32>,

    /// Discover and estimate only; nothing is fetched or written
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of stations (eccc) or dates (bcws) to process
    #[arg(long)]
    limit: Option<usize>,

    /// Skip stations that already have observations
    #[arg(long)]
    skip_existing: bool,

    /// Source for update and list-stations modes
    #[arg(long, default_value = "bcws")]
    source: SourceFamily,

    /// Update mode: number of recent days to refresh
    #[arg(long, default_value_t = 7)]
    days_back: u32,

    /// Update mode: fill everything from the latest stored observation to yesterday
    #[arg(long)]
    backfill: bool,

    /// Update mode: refresh the dates covering the last N hours
    #[arg(long)]
    hours_back: Option<u32>,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,

    /// Apply pending database migrations first
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (ignore errors if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    if cli.mode == Mode::ListStations {
        let directory = StationDirectoryResolver::new(FeedFetcher::new(&config)?, &config);
        let stations = directory.list_stations(cli.source).await?;
        println!("{} stations published by {}:", stations.len(), cli.source);
        for station in &stations {
            println!("  {station}");
        }
        return Ok(());
    }

    let database_url = cli
        .database_url
        .as_deref()
        .ok_or("--database-url (or DATABASE_URL) is required for this mode")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    if cli.migrate {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let planner = BackfillPlanner::new(config.region_timezone, Utc::now());
    let store = Arc::new(PgWeatherStore::new(pool));
    let orchestrator = BatchOrchestrator::new(config.clone(), store)?.with_progress_bar(true);

    if cli.mode == Mode::SyncStations {
        let report = orchestrator.sync_stations(cli.dry_run).await?;
        print_sync_report(&report, cli.dry_run);
        return Ok(());
    }

    let options = run_options(&cli, &config, &planner)?;

    if needs_confirmation(&cli) {
        println!("\n⚠️  This will import {} observations into the database.", options.source);
        println!("Window: {}", describe_window(&options.window));
        if let StationSelector::Only(codes) = &options.stations {
            println!("Stations: {}", codes.join(", "));
        }
        println!("\nContinue? [y/N]: ");

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Import cancelled.");
            return Ok(());
        }
    }

    match orchestrator.run(&options).await {
        Ok(stats) => {
            print_summary(&options, &stats);
            if !stats.is_success() {
                return Err(format!("{} targets failed", stats.targets_failed).into());
            }
        }
        Err(RunError::Storage { source, statistics }) => {
            print_summary(&options, &statistics);
            error!("Run aborted by storage failure: {}", source);
            return Err(source.into());
        }
        Err(e) => {
            error!("Run failed: {}", e);
            return Err(e.into());
        }
    }

    info!("Import completed successfully!");
    Ok(())
}

fn run_options(
    cli: &Cli,
    config: &Config,
    planner: &BackfillPlanner,
) -> Result<RunOptions, Box<dyn std::error::Error>> {
    let (source, window) = match cli.mode {
        Mode::Bcws => (SourceFamily::Bcws, bcws_window(cli, config, planner)?),
        Mode::Eccc => (SourceFamily::Eccc, eccc_window(cli, config, planner)?),
        Mode::Update => {
            let window = if cli.backfill {
                WindowSpec::Incremental
            } else if let Some(hours) = cli.hours_back {
                WindowSpec::HoursBack(hours)
            } else {
                WindowSpec::RecentDays(cli.days_back)
            };
            (cli.source, window)
        }
        Mode::SyncStations | Mode::ListStations => {
            return Err(format!("{:?} is not an import mode", cli.mode).into())
        }
    };

    let mut options = RunOptions::new(source, window);
    options.dry_run = cli.dry_run;
    options.skip_existing = cli.skip_existing;
    options.limit = cli.limit;
    if !cli.station_ids.is_empty() {
        options.stations = StationSelector::Only(cli.station_ids.clone());
    }
    Ok(options)
}

fn bcws_window(
    cli: &Cli,
    config: &Config,
    planner: &BackfillPlanner,
) -> Result<WindowSpec, Box<dyn std::error::Error>> {
    if let Some(date) = cli.date {
        return Ok(WindowSpec::Explicit(DateRange::single(date)));
    }
    if cli.start_date.is_none() && cli.end_date.is_none() {
        return Ok(WindowSpec::Historical);
    }

    let start = cli.start_date.unwrap_or(config.bcws_start_date);
    let end = cli.end_date.unwrap_or_else(|| planner.yesterday());
    let range = DateRange::new(start, end)
        .ok_or_else(|| format!("start date {start} is after end date {end}"))?;
    Ok(WindowSpec::Explicit(range))
}

fn eccc_window(
    cli: &Cli,
    config: &Config,
    planner: &BackfillPlanner,
) -> Result<WindowSpec, Box<dyn std::error::Error>> {
    let (start, end) = match cli.year {
        Some(year) => (year, year),
        None if cli.start_year.is_none() && cli.end_year.is_none() => {
            return Ok(WindowSpec::Historical)
        }
        None => (
            cli.start_year.unwrap_or(config.eccc_start_year),
            cli.end_year.unwrap_or_else(|| planner.current_year()),
        ),
    };

    let range = DateRange::years(start, end)
        .ok_or_else(|| format!("start year {start} is after end year {end}"))?;
    Ok(WindowSpec::Explicit(range))
}

fn needs_confirmation(cli: &Cli) -> bool {
    !cli.yes && !cli.dry_run && matches!(cli.mode, Mode::Bcws | Mode::Eccc)
}

fn describe_window(window: &WindowSpec) -> String {
    match window {
        WindowSpec::Explicit(range) => range.to_string(),
        WindowSpec::Historical => "historical start through latest".to_string(),
        WindowSpec::Incremental => "day after latest stored observation through yesterday".to_string(),
        WindowSpec::RecentDays(days) => format!("last {days} days"),
        WindowSpec::HoursBack(hours) => format!("last {hours} hours"),
    }
}

fn print_summary(options: &RunOptions, stats: &RunStatistics) {
    println!("\n{}", "=".repeat(60));
    if options.dry_run {
        println!("Dry Run Estimate ({})", options.source);
    } else {
        println!("Import Summary ({})", options.source);
    }
    println!("{}", "=".repeat(60));

    if stats.up_to_date {
        println!("Data is already up to date.");
        println!("{}", "=".repeat(60));
        return;
    }

    if let Some(window) = &stats.window {
        println!("Window:             {window}");
    }

    if let Some(estimate) = &stats.estimate {
        println!("Stations:           {}", estimate.stations);
        println!("Periods:            {}", estimate.periods);
        println!("Targets:            {}", estimate.targets);
        if stats.stations_excluded > 0 {
            println!("Already imported:   {} stations", stats.stations_excluded);
        }
        println!("Projected Records:  {}", estimate.projected_records);
        println!(
            "Projected Time:     {:.1}h",
            estimate.projected_duration.as_secs_f64() / 3600.0
        );
        println!("{}", "=".repeat(60));
        return;
    }

    println!("Targets:            {}", stats.targets_total);
    println!("Succeeded:          {}", stats.targets_succeeded);
    println!("No Data:            {}", stats.targets_no_data);
    println!("Failed:             {}", stats.targets_failed);
    println!("{}", "-".repeat(60));
    println!("Imported:           {}", stats.records_imported);
    println!("Duplicates:         {}", stats.records_skipped);
    println!("Rows Dropped:       {}", stats.rows_dropped);
    println!("Stations Created:   {}", stats.stations_created);
    println!("Stations Updated:   {}", stats.stations_updated);
    println!("{}", "-".repeat(60));
    println!("Total Time:         {:.2}s", stats.elapsed.as_secs_f64());
    if stats.records_imported > 0 && stats.elapsed.as_secs_f64() > 0.0 {
        println!(
            "Throughput:         {:.0} records/sec",
            stats.records_imported as f64 / stats.elapsed.as_secs_f64()
        );
    }
    println!("{}", "=".repeat(60));

    if !stats.failures.is_empty() {
        println!("\nFailed targets:");
        for failure in &stats.failures {
            println!("  ✗ {}: {}", failure.target, failure.message);
        }
    }
}

fn print_sync_report(report: &CatalogSyncReport, dry_run: bool) {
    println!("\n{}", "=".repeat(60));
    if dry_run {
        println!("Station Sync (dry run)");
    } else {
        println!("Station Sync Complete");
    }
    println!("{}", "=".repeat(60));
    println!("Created:            {}", report.created);
    println!("Updated:            {}", report.updated);
    println!("Unchanged:          {}", report.unchanged);
    println!("Skipped:            {}", report.skipped);
    println!("{}", "=".repeat(60));

    if let Some(coverage) = report.coverage {
        let percent = if coverage.total > 0 {
            coverage.with_coordinates as f64 * 100.0 / coverage.total as f64
        } else {
            0.0
        };
        println!(
            "Stations with coordinates: {}/{} ({:.1}%)",
            coverage.with_coordinates, coverage.total, percent
        );
    }
}
