use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::db::{DbError, NewObservation, StationMetadata};
use crate::fetch_error::FetchError;
use crate::fetcher::{FeedFetcher, FetchOutcome};
use crate::parsing::record_normalizer::normalize_document;
use crate::parsing::{DocumentParseError, NormalizedRow, ReadingConventions};
use crate::services::observation_writer::ObservationWriter;
use crate::services::station_reconciler::{StationChange, StationReconciler};
use crate::source::FeedRequest;

/// Failure of a single target. Only `Storage` ends the run.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse failed: {0}")]
    Parse(#[from] DocumentParseError),

    #[error("Storage failure: {0}")]
    Storage(#[from] DbError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub inserted: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub stations_seen: usize,
    pub stations_created: usize,
    pub stations_updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Imported(TargetReport),
    NoData,
}

/// Fetch, normalize and persist one upstream document
#[derive(Clone)]
pub struct ImportService {
    fetcher: FeedFetcher,
    reconciler: StationReconciler,
    conventions: ReadingConventions,
}

impl ImportService {
    pub fn new(
        fetcher: FeedFetcher,
        reconciler: StationReconciler,
        conventions: ReadingConventions,
    ) -> Self {
        Self {
            fetcher,
            reconciler,
            conventions,
        }
    }

    /// Import one target. Rows are flushed before returning, so the report is final.
    #[instrument(skip(self, writer), fields(target = %request))]
    pub async fn import(
        &self,
        request: &FeedRequest,
        writer: &mut ObservationWriter,
    ) -> Result<TargetOutcome, ImportError> {
        let text = match self.fetcher.fetch(request).await? {
            FetchOutcome::Document(text) => text,
            FetchOutcome::NoData => {
                info!("No data available for {}", request);
                return Ok(TargetOutcome::NoData);
            }
        };

        let fixed_station = if request.source.is_per_station() {
            request.station.as_deref()
        } else {
            None
        };
        let document = normalize_document(request.source, &text, fixed_station, &self.conventions)?;

        let mut report = TargetReport {
            dropped: document.dropped as u64,
            ..TargetReport::default()
        };

        let station_ids = self.reconcile_stations(request, &document.rows, &mut report).await?;

        for row in document.rows {
            let Some(&station_id) = station_ids.get(&row.station_code) else {
                continue;
            };
            let written = writer
                .push(NewObservation {
                    station_id,
                    observed_at: row.observed_at,
                    measurements: row.measurements,
                })
                .await?;
            report.inserted += written.inserted;
            report.skipped += written.skipped;
        }

        let written = writer.flush().await?;
        report.inserted += written.inserted;
        report.skipped += written.skipped;

        info!(
            "{}: imported {}, skipped {} duplicates, dropped {} rows",
            request, report.inserted, report.skipped, report.dropped
        );
        Ok(TargetOutcome::Imported(report))
    }

    /// Reconcile each station in the document once, with the first value seen for each field
    async fn reconcile_stations(
        &self,
        request: &FeedRequest,
        rows: &[NormalizedRow],
        report: &mut TargetReport,
    ) -> Result<HashMap<String, i64>, ImportError> {
        let mut proposed: Vec<(String, StationMetadata)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for row in rows {
            match positions.get(row.station_code.as_str()) {
                Some(&position) => merge_missing(&mut proposed[position].1, &row.metadata),
                None => {
                    positions.insert(&row.station_code, proposed.len());
                    proposed.push((row.station_code.clone(), row.metadata.clone()));
                }
            }
        }

        let mut station_ids = HashMap::with_capacity(proposed.len());
        for (code, metadata) in proposed {
            let outcome = self
                .reconciler
                .reconcile(request.source, &code, &metadata)
                .await?;
            match outcome.change {
                StationChange::Created => report.stations_created += 1,
                StationChange::Updated => report.stations_updated += 1,
                StationChange::Unchanged => {}
            }
            station_ids.insert(code, outcome.station.id);
        }

        report.stations_seen = station_ids.len();
        if station_ids.is_empty() {
            warn!("{} contained no usable rows", request);
        } else {
            debug!("{} references {} stations", request, station_ids.len());
        }
        Ok(station_ids)
    }
}

fn merge_missing(target: &mut StationMetadata, source: &StationMetadata) {
    if target.name.is_none() {
        target.name = source.name.clone();
    }
    if target.province.is_none() {
        target.province = source.province.clone();
    }
    target.latitude = target.latitude.or(source.latitude);
    target.longitude = target.longitude.or(source.longitude);
    target.elevation = target.elevation.or(source.elevation);
}
