use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::{
    DbError, NewObservation, ObservationRepository, Station, StationCoverage, StationMetadata,
    StationRepository,
};
use crate::source::SourceFamily;

/// Which stored observations a backfill cursor is taken over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorScope {
    All,
    Source(SourceFamily),
    Station {
        source: SourceFamily,
        station_code: String,
    },
}

/// Write/lookup contract the ingestion pipeline needs from storage
#[async_trait]
pub trait WeatherStore: Send + Sync {
    async fn find_station(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<Option<Station>, DbError>;

    /// Create the station, or write the supplied (`Some`) fields onto the existing one
    async fn upsert_station(
        &self,
        source: SourceFamily,
        station_code: &str,
        metadata: &StationMetadata,
    ) -> Result<Station, DbError>;

    async fn max_observation_instant(
        &self,
        scope: &CursorScope,
    ) -> Result<Option<DateTime<Utc>>, DbError>;

    async fn has_any_observation(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<bool, DbError>;

    /// All-or-nothing insert of a batch; duplicates are skipped. Returns rows inserted.
    async fn insert_observations_ignoring_duplicates(
        &self,
        batch: &[NewObservation],
    ) -> Result<u64, DbError>;

    async fn mark_stations_updated(
        &self,
        station_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    async fn station_coverage(&self) -> Result<StationCoverage, DbError>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgWeatherStore {
    stations: StationRepository,
    observations: ObservationRepository,
}

impl PgWeatherStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            stations: StationRepository::new(pool.clone()),
            observations: ObservationRepository::new(pool),
        }
    }
}

#[async_trait]
impl WeatherStore for PgWeatherStore {
    async fn find_station(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<Option<Station>, DbError> {
        self.stations.find(source, station_code).await
    }

    async fn upsert_station(
        &self,
        source: SourceFamily,
        station_code: &str,
        metadata: &StationMetadata,
    ) -> Result<Station, DbError> {
        self.stations.upsert(source, station_code, metadata).await
    }

    async fn max_observation_instant(
        &self,
        scope: &CursorScope,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        match scope {
            CursorScope::All => self.observations.max_observation_time().await,
            CursorScope::Source(source) => {
                self.observations
                    .max_observation_time_for_source(*source)
                    .await
            }
            CursorScope::Station {
                source,
                station_code,
            } => {
                self.observations
                    .max_observation_time_for_station(*source, station_code)
                    .await
            }
        }
    }

    async fn has_any_observation(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<bool, DbError> {
        self.observations.has_any(source, station_code).await
    }

    async fn insert_observations_ignoring_duplicates(
        &self,
        batch: &[NewObservation],
    ) -> Result<u64, DbError> {
        self.observations.insert_ignoring_duplicates(batch).await
    }

    async fn mark_stations_updated(
        &self,
        station_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.stations.mark_updated(station_ids, at).await?;
        Ok(())
    }

    async fn station_coverage(&self) -> Result<StationCoverage, DbError> {
        self.stations.coverage().await
    }
}
