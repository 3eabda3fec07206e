use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::{DbError, Station, StationCoverage, StationMetadata};
use crate::source::SourceFamily;

const STATION_COLUMNS: &str = "id, source, station_code, name, province, latitude, longitude, \
     elevation, is_active, last_updated, created_at";

#[derive(Clone)]
pub struct StationRepository {
    pool: PgPool,
}

impl StationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn find(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<Option<Station>, DbError> {
        let station = sqlx::query_as::<_, Station>(&format!(
            "SELECT {STATION_COLUMNS} FROM weather_stations WHERE source = $1 AND station_code = $2"
        ))
        .bind(source.as_str())
        .bind(station_code)
        .fetch_optional(&self.pool)
        .await?;

        debug!("Station {}/{} found: {}", source, station_code, station.is_some());
        Ok(station)
    }

    /// Insert a station, or fill in the supplied fields of an existing one.
    ///
    /// `None` fields leave the stored value alone. A new station without a name
    /// gets a provisional `Station {code}` name. `is_active` is only ever raised.
    #[instrument(skip(self, metadata))]
    pub async fn upsert(
        &self,
        source: SourceFamily,
        station_code: &str,
        metadata: &StationMetadata,
    ) -> Result<Station, DbError> {
        let station = sqlx::query_as::<_, Station>(&format!(
            r#"
            INSERT INTO weather_stations (
                source, station_code, name, province, latitude, longitude, elevation, is_active
            )
            VALUES ($1, $2, COALESCE($3, 'Station ' || $2), $4, $5, $6, $7, COALESCE($8::boolean, TRUE))
            ON CONFLICT (source, station_code) DO UPDATE SET
                name = COALESCE($3, weather_stations.name),
                province = COALESCE($4, weather_stations.province),
                latitude = COALESCE($5, weather_stations.latitude),
                longitude = COALESCE($6, weather_stations.longitude),
                elevation = COALESCE($7, weather_stations.elevation),
                is_active = weather_stations.is_active OR COALESCE($8::boolean, FALSE)
            RETURNING {STATION_COLUMNS}
            "#
        ))
        .bind(source.as_str())
        .bind(station_code)
        .bind(&metadata.name)
        .bind(&metadata.province)
        .bind(metadata.latitude)
        .bind(metadata.longitude)
        .bind(metadata.elevation)
        .bind(metadata.is_active)
        .fetch_one(&self.pool)
        .await?;

        info!("Upserted station {}/{} (id {})", source, station_code, station.id);
        Ok(station)
    }

    /// Stamp the last successful update of each station
    #[instrument(skip(self, station_ids), fields(count = station_ids.len()))]
    pub async fn mark_updated(
        &self,
        station_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        if station_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE weather_stations SET last_updated = $2 WHERE id = ANY($1)")
            .bind(station_ids)
            .bind(at)
            .execute(&self.pool)
            .await?;

        debug!("Marked {} stations updated", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn coverage(&self) -> Result<StationCoverage, DbError> {
        let coverage = sqlx::query_as::<_, StationCoverage>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL) AS with_coordinates
            FROM weather_stations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(coverage)
    }
}
