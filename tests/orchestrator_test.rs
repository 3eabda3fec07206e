// End-to-end runs of BatchOrchestrator against a mocked upstream and the in-memory store

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use fire_weather_ingest::config::Config;
use fire_weather_ingest::db::{
    Measurements, MemoryStore, NewObservation, StationMetadata, WeatherStore,
};
use fire_weather_ingest::services::{
    BatchOrchestrator, RunError, RunOptions, StationSelector, WindowSpec,
};
use fire_weather_ingest::source::{DateRange, SourceFamily};
use mockito::{Matcher, Server, ServerGuard};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn orchestrator<S: WeatherStore + 'static>(server: &ServerGuard, store: &Arc<S>) -> BatchOrchestrator {
    BatchOrchestrator::new(common::mock_config(&server.url()), store.clone()).unwrap()
}

fn two_bcws_days() -> RunOptions {
    RunOptions::new(
        SourceFamily::Bcws,
        WindowSpec::Explicit(DateRange::new(date(2025, 11, 6), date(2025, 11, 7)).unwrap()),
    )
}

fn bcws_day(source_date: NaiveDate) -> RunOptions {
    RunOptions::new(
        SourceFamily::Bcws,
        WindowSpec::Explicit(DateRange::single(source_date)),
    )
}

async fn seed_observation(store: &MemoryStore, source: SourceFamily, code: &str, hour_utc: chrono::DateTime<Utc>) {
    let station = store
        .upsert_station(source, code, &StationMetadata::default())
        .await
        .unwrap();
    store
        .insert_observations_ignoring_duplicates(&[NewObservation {
            station_id: station.id,
            observed_at: hour_utc,
            measurements: Measurements::default(),
        }])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_daily_import_skips_existing_instants() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    // Local midnight on 2025-11-07 is 08:00 UTC
    seed_observation(&store, SourceFamily::Bcws, "67", Utc.with_ymd_and_hms(2025, 11, 7, 8, 0, 0).unwrap()).await;
    seed_observation(&store, SourceFamily::Bcws, "67", Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 0).unwrap()).await;

    let mut lines = vec![common::BCWS_HEADER.to_string()];
    for hour in 0..24 {
        lines.push(common::bcws_row("67", "ASHNOLA", &format!("20251107{hour:02}")));
    }
    for hour in 0..23 {
        lines.push(common::bcws_row("68", "AUGUST LAKE", &format!("20251107{hour:02}")));
    }
    for bad in ["2025-11-07", "20251107", "banana"] {
        lines.push(common::bcws_row("68", "AUGUST LAKE", bad));
    }

    let mock = server
        .mock("GET", "/bcws/2025/2025-11-07.csv")
        .with_status(200)
        .with_body(lines.join("\n"))
        .create_async()
        .await;

    let stats = orchestrator(&server, &store)
        .run(&bcws_day(date(2025, 11, 7)))
        .await
        .unwrap();

    assert!(stats.is_success());
    assert_eq!(stats.targets_total, 1);
    assert_eq!(stats.targets_succeeded, 1);
    assert_eq!(stats.records_imported, 45);
    assert_eq!(stats.records_skipped, 2);
    assert_eq!(stats.rows_dropped, 3);
    assert_eq!(stats.stations_created, 1);
    assert_eq!(store.observation_count(), 47);

    let stations = store.stations();
    assert_eq!(stations.len(), 2);
    assert!(stations.iter().all(|s| s.last_updated.is_some()));
    assert_eq!(stations[0].name, "ASHNOLA");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_document_counts_as_no_data() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let mock = server
        .mock("GET", "/bcws/2099/2099-01-01.csv")
        .with_status(404)
        .create_async()
        .await;

    let stats = orchestrator(&server, &store)
        .run(&bcws_day(date(2099, 1, 1)))
        .await
        .unwrap();

    assert!(stats.is_success());
    assert_eq!(stats.targets_no_data, 1);
    assert_eq!(stats.records_imported, 0);
    assert_eq!(store.observation_count(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_target_does_not_stop_run() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let _failing = server
        .mock("GET", "/bcws/2025/2025-11-06.csv")
        .with_status(500)
        .create_async()
        .await;
    let _working = server
        .mock("GET", "/bcws/2025/2025-11-07.csv")
        .with_status(200)
        .with_body(format!(
            "{}\n{}\n",
            common::BCWS_HEADER,
            common::bcws_row("67", "ASHNOLA", "2025110712")
        ))
        .create_async()
        .await;

    let options = RunOptions::new(
        SourceFamily::Bcws,
        WindowSpec::Explicit(DateRange::new(date(2025, 11, 6), date(2025, 11, 7)).unwrap()),
    );
    let stats = orchestrator(&server, &store).run(&options).await.unwrap();

    assert!(!stats.is_success());
    assert_eq!(stats.targets_failed, 1);
    assert_eq!(stats.targets_succeeded, 1);
    assert_eq!(stats.records_imported, 1);
    assert_eq!(stats.failures.len(), 1);
    assert!(stats.failures[0].target.contains("2025-11-06"));
}

#[tokio::test]
async fn test_storage_failure_aborts_run() {
    let mut server = Server::new_async().await;
    let store = Arc::new(common::FlakyStore::failing_from(1));

    let _first = server
        .mock("GET", "/bcws/2025/2025-11-06.csv")
        .with_status(200)
        .with_body(format!(
            "{}\n{}\n",
            common::BCWS_HEADER,
            common::bcws_row("67", "ASHNOLA", "2025110612")
        ))
        .create_async()
        .await;
    let second = server
        .mock("GET", "/bcws/2025/2025-11-07.csv")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let result = orchestrator(&server, &store).run(&two_bcws_days()).await;

    match result {
        Err(RunError::Storage { statistics, .. }) => {
            assert_eq!(statistics.targets_total, 2);
            assert_eq!(statistics.records_imported, 0);
        }
        other => panic!("Expected storage failure, got {other:?}"),
    }
    assert_eq!(store.inner.observation_count(), 0);
    assert!(store.station("67").unwrap().last_updated.is_none());
    second.assert_async().await;
}

#[tokio::test]
async fn test_storage_abort_stamps_committed_stations() {
    let mut server = Server::new_async().await;
    let store = Arc::new(common::FlakyStore::failing_from(2));

    let _first = server
        .mock("GET", "/bcws/2025/2025-11-06.csv")
        .with_status(200)
        .with_body(format!(
            "{}\n{}\n",
            common::BCWS_HEADER,
            common::bcws_row("67", "ASHNOLA", "2025110612")
        ))
        .create_async()
        .await;
    let _second = server
        .mock("GET", "/bcws/2025/2025-11-07.csv")
        .with_status(200)
        .with_body(format!(
            "{}\n{}\n",
            common::BCWS_HEADER,
            common::bcws_row("68", "AUGUST LAKE", "2025110712")
        ))
        .create_async()
        .await;

    let result = orchestrator(&server, &store).run(&two_bcws_days()).await;

    match result {
        Err(RunError::Storage { statistics, .. }) => {
            assert_eq!(statistics.targets_succeeded, 1);
            assert_eq!(statistics.records_imported, 1);
        }
        other => panic!("Expected storage failure, got {other:?}"),
    }
    assert_eq!(store.insert_calls(), 2);
    assert_eq!(store.inner.observation_count(), 1);
    assert!(store.station("67").unwrap().last_updated.is_some());
    assert!(store.station("68").unwrap().last_updated.is_none());
}

#[tokio::test]
async fn test_blank_document_is_an_empty_import() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let mock = server
        .mock("GET", "/bcws/2025/2025-11-07.csv")
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let stats = orchestrator(&server, &store)
        .run(&bcws_day(date(2025, 11, 7)))
        .await
        .unwrap();

    assert!(stats.is_success());
    assert_eq!(stats.targets_succeeded, 1);
    assert_eq!(stats.targets_failed, 0);
    assert_eq!(stats.records_imported, 0);
    assert!(store.stations().is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_dry_run_estimates_without_fetching() {
    let mut server = Server::new_async().await;
    let store = Arc::new(common::FlakyStore::new());

    let listing: String = ["1012475", "1108395", "1108447", "1100030", "114B1F0"]
        .iter()
        .map(|id| format!("<a href=\"climate_hourly_BC_{id}_2024_P1H.csv\">x</a>\n"))
        .collect();

    let _listing = server
        .mock("GET", "/eccc/")
        .with_status(200)
        .with_body(listing)
        .create_async()
        .await;
    let documents = server
        .mock("GET", Matcher::Regex(r"^/eccc/climate_hourly_.*\.csv$".to_string()))
        .expect(0)
        .create_async()
        .await;

    let mut options = RunOptions::new(
        SourceFamily::Eccc,
        WindowSpec::Explicit(DateRange::years(2023, 2024).unwrap()),
    );
    options.dry_run = true;

    let stats = orchestrator(&server, &store).run(&options).await.unwrap();
    let estimate = stats.estimate.expect("dry run produces an estimate");

    assert_eq!(estimate.stations, 5);
    assert_eq!(estimate.periods, 2);
    assert_eq!(estimate.targets, 10);
    assert_eq!(estimate.projected_records, 87_600);
    assert_eq!(estimate.projected_duration, Duration::from_secs(20));
    assert_eq!(store.insert_calls(), 0);
    documents.assert_async().await;
}

#[tokio::test]
async fn test_unbounded_estimate_saturates() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let _listing = server
        .mock("GET", "/eccc/")
        .with_status(200)
        .with_body("<a href=\"climate_hourly_BC_1108395_2024_P1H.csv\">x</a>\n")
        .create_async()
        .await;

    let config = Config {
        estimate_seconds_per_unit: f64::INFINITY,
        ..common::mock_config(&server.url())
    };
    let mut options = RunOptions::new(
        SourceFamily::Eccc,
        WindowSpec::Explicit(DateRange::years(2024, 2024).unwrap()),
    );
    options.dry_run = true;

    let stats = BatchOrchestrator::new(config, store)
        .unwrap()
        .run(&options)
        .await
        .unwrap();
    assert_eq!(stats.estimate.unwrap().projected_duration, Duration::MAX);
}

#[tokio::test]
async fn test_lookback_out_of_range_is_invalid_window() {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&server, &store);

    for window in [WindowSpec::RecentDays(u32::MAX), WindowSpec::HoursBack(u32::MAX)] {
        let result = orchestrator
            .run(&RunOptions::new(SourceFamily::Bcws, window))
            .await;
        assert!(matches!(result, Err(RunError::InvalidWindow(_))));
    }
}

#[tokio::test]
async fn test_missing_directory_listing_fails_run() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let _listing = server
        .mock("GET", "/eccc/")
        .with_status(404)
        .create_async()
        .await;

    let options = RunOptions::new(
        SourceFamily::Eccc,
        WindowSpec::Explicit(DateRange::years(2024, 2024).unwrap()),
    );
    let result = orchestrator(&server, &store).run(&options).await;

    assert!(matches!(result, Err(RunError::Directory(_))));
}

#[tokio::test]
async fn test_station_year_import_then_skip_existing() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let body = [
        common::ECCC_HEADER.to_string(),
        common::eccc_row("1108395", "2024-01-15 13:00"),
        common::eccc_row("1108395", "2024-01-15 14:00"),
    ]
    .join("\n");

    let _document = server
        .mock("GET", "/eccc/climate_hourly_BC_1108395_2024_P1H.csv")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut options = RunOptions::new(
        SourceFamily::Eccc,
        WindowSpec::Explicit(DateRange::years(2024, 2024).unwrap()),
    );
    options.stations = StationSelector::Only(vec!["1108395".to_string()]);

    let orchestrator = orchestrator(&server, &store);
    let stats = orchestrator.run(&options).await.unwrap();
    assert_eq!(stats.records_imported, 2);
    assert_eq!(stats.stations_created, 1);

    let station = &store.stations()[0];
    let measurements = store
        .measurements(station.id, Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap())
        .expect("observation stored");
    assert_eq!(measurements.temperature, Some(-2.5));
    assert_eq!(measurements.wind_direction, Some(90));
    assert_eq!(measurements.weather_description, None);

    options.stations =
        StationSelector::Only(vec!["1108395".to_string(), "1012475".to_string()]);
    options.skip_existing = true;
    options.dry_run = true;

    let rerun = orchestrator.run(&options).await.unwrap();
    assert_eq!(rerun.stations_excluded, 1);
    assert_eq!(rerun.targets_total, 1);
}

#[tokio::test]
async fn test_incremental_window_starts_after_cursor() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    // 06:00 UTC on the 12th is still the 11th in Vancouver
    seed_observation(&store, SourceFamily::Bcws, "67", Utc.with_ymd_and_hms(2025, 6, 12, 6, 0, 0).unwrap()).await;

    let documents = server
        .mock("GET", Matcher::Regex(r"^/bcws/2025/2025-06-1[234]\.csv$".to_string()))
        .with_status(404)
        .expect(3)
        .create_async()
        .await;

    let mut options = RunOptions::new(SourceFamily::Bcws, WindowSpec::Incremental);
    options.as_of = Some(Utc.with_ymd_and_hms(2025, 6, 15, 19, 0, 0).unwrap());

    let stats = orchestrator(&server, &store).run(&options).await.unwrap();

    assert_eq!(stats.targets_total, 3);
    assert_eq!(stats.targets_no_data, 3);
    assert_eq!(stats.window.as_deref(), Some("2025-06-12 to 2025-06-14"));
    documents.assert_async().await;
}

#[tokio::test]
async fn test_incremental_run_when_up_to_date() {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    // Last hour of the 14th in Vancouver
    seed_observation(&store, SourceFamily::Bcws, "67", Utc.with_ymd_and_hms(2025, 6, 15, 6, 0, 0).unwrap()).await;

    let mut options = RunOptions::new(SourceFamily::Bcws, WindowSpec::Incremental);
    options.as_of = Some(Utc.with_ymd_and_hms(2025, 6, 15, 19, 0, 0).unwrap());

    let stats = orchestrator(&server, &store).run(&options).await.unwrap();

    assert!(stats.up_to_date);
    assert_eq!(stats.targets_total, 0);
    assert!(stats.is_success());
}

#[tokio::test]
async fn test_sync_stations_from_feed() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());

    let feed = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-120.1, 49.1]},
             "properties": {"STATION_CODE": 67, "STATION_NAME": "ASHNOLA"}},
            {"type": "Feature", "geometry": null,
             "properties": {"STATION_CODE": 68, "STATION_NAME": "AUGUST LAKE"}},
            {"type": "Feature", "properties": {"STATION_NAME": "NO CODE"}}
        ]
    }"#;

    let _feed = server
        .mock("GET", "/wfs")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(feed)
        .create_async()
        .await;

    let orchestrator = orchestrator(&server, &store);

    let preview = orchestrator.sync_stations(true).await.unwrap();
    assert_eq!(preview.created, 2);
    assert_eq!(preview.skipped, 1);
    assert!(preview.coverage.is_none());
    assert!(store.stations().is_empty());

    let report = orchestrator.sync_stations(false).await.unwrap();
    assert_eq!(report.created, 2);
    let coverage = report.coverage.expect("coverage after a real sync");
    assert_eq!(coverage.total, 2);
    assert_eq!(coverage.with_coordinates, 1);

    let again = orchestrator.sync_stations(false).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.unchanged, 2);
}
