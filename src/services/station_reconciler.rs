use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::db::{DbError, Station, StationCoverage, StationMetadata, WeatherStore};
use crate::source::SourceFamily;
use crate::station_directory::{DiscoveredStation, StationCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StationChange {
    Created,
    Updated,
    Unchanged,
}

impl StationChange {
    pub fn label(&self) -> &'static str {
        match self {
            StationChange::Created => "CREATE",
            StationChange::Updated => "UPDATE",
            StationChange::Unchanged => "UNCHANGED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub station: Station,
    pub change: StationChange,
}

/// Result of reconciling the registry against the station feed
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogSyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Registry coordinate coverage after the sync; `None` on a dry run
    pub coverage: Option<StationCoverage>,
}

impl CatalogSyncReport {
    fn record(&mut self, change: StationChange) {
        match change {
            StationChange::Created => self.created += 1,
            StationChange::Updated => self.updated += 1,
            StationChange::Unchanged => self.unchanged += 1,
        }
    }
}

/// Fields of `proposed` that are present and differ from what is stored.
///
/// `is_active` only ever appears as `Some(true)`.
pub fn metadata_diff(stored: &Station, proposed: &StationMetadata) -> StationMetadata {
    fn changed<T: PartialEq + Clone>(stored: Option<&T>, proposed: &Option<T>) -> Option<T> {
        match proposed {
            Some(value) if stored != Some(value) => Some(value.clone()),
            _ => None,
        }
    }

    StationMetadata {
        name: changed(Some(&stored.name), &proposed.name),
        province: changed(stored.province.as_ref(), &proposed.province),
        latitude: changed(stored.latitude.as_ref(), &proposed.latitude),
        longitude: changed(stored.longitude.as_ref(), &proposed.longitude),
        elevation: changed(stored.elevation.as_ref(), &proposed.elevation),
        is_active: (proposed.is_active == Some(true) && !stored.is_active).then_some(true),
    }
}

/// Creates stations on first sighting and writes metadata changes field by field
#[derive(Clone)]
pub struct StationReconciler {
    store: Arc<dyn WeatherStore>,
}

impl StationReconciler {
    pub fn new(store: Arc<dyn WeatherStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, proposed))]
    pub async fn reconcile(
        &self,
        source: SourceFamily,
        station_code: &str,
        proposed: &StationMetadata,
    ) -> Result<ReconcileOutcome, DbError> {
        let Some(stored) = self.store.find_station(source, station_code).await? else {
            let station = self
                .store
                .upsert_station(source, station_code, proposed)
                .await?;
            info!("Created station {}/{} ({})", source, station_code, station.name);
            return Ok(ReconcileOutcome {
                station,
                change: StationChange::Created,
            });
        };

        let diff = metadata_diff(&stored, proposed);
        if diff.is_empty() {
            return Ok(ReconcileOutcome {
                station: stored,
                change: StationChange::Unchanged,
            });
        }

        debug!("Updating station {}/{}: {:?}", source, station_code, diff);
        let station = self
            .store
            .upsert_station(source, station_code, &diff)
            .await?;

        Ok(ReconcileOutcome {
            station,
            change: StationChange::Updated,
        })
    }

    /// Decide what `reconcile` would do, without writing
    pub async fn preview(
        &self,
        source: SourceFamily,
        station_code: &str,
        proposed: &StationMetadata,
    ) -> Result<StationChange, DbError> {
        Ok(match self.store.find_station(source, station_code).await? {
            None => StationChange::Created,
            Some(stored) if metadata_diff(&stored, proposed).is_empty() => {
                StationChange::Unchanged
            }
            Some(_) => StationChange::Updated,
        })
    }

    /// Reconcile every station of a feed catalog
    #[instrument(skip(self, catalog), fields(stations = catalog.stations.len()))]
    pub async fn reconcile_catalog(
        &self,
        source: SourceFamily,
        catalog: &StationCatalog,
        region_code: &str,
        dry_run: bool,
    ) -> Result<CatalogSyncReport, DbError> {
        let mut report = CatalogSyncReport {
            skipped: catalog.skipped,
            ..CatalogSyncReport::default()
        };

        for discovered in &catalog.stations {
            let proposed = catalog_metadata(discovered, region_code);

            let change = if dry_run {
                self.preview(source, &discovered.station_code, &proposed)
                    .await?
            } else {
                self.reconcile(source, &discovered.station_code, &proposed)
                    .await?
                    .change
            };

            info!(
                "{}: {} {}",
                change.label(),
                discovered.station_code,
                discovered.name.as_deref().unwrap_or("")
            );
            report.record(change);
        }

        if !dry_run {
            report.coverage = Some(self.store.station_coverage().await?);
        }

        Ok(report)
    }
}

/// Metadata the station feed asserts for a station; listed stations are active
fn catalog_metadata(discovered: &DiscoveredStation, region_code: &str) -> StationMetadata {
    StationMetadata {
        name: discovered.name.clone(),
        province: Some(region_code.to_string()),
        latitude: discovered.latitude,
        longitude: discovered.longitude,
        elevation: discovered.elevation,
        is_active: Some(true),
    }
}
