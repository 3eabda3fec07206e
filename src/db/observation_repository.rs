use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use crate::db::{DbError, NewObservation};
use crate::source::SourceFamily;

// 26 bind parameters per row, well under the 65535 parameter cap
const MAX_ROWS_PER_STATEMENT: usize = 2000;

#[derive(Clone)]
pub struct ObservationRepository {
    pool: PgPool,
}

impl ObservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch in one transaction. Rows that collide on
    /// (station, observation time) are left untouched.
    ///
    /// Returns the number of rows actually inserted.
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    pub async fn insert_ignoring_duplicates(
        &self,
        observations: &[NewObservation],
    ) -> Result<u64, DbError> {
        if observations.is_empty() {
            return Ok(0);
        }

        debug!(
            "Beginning transaction to insert {} observations",
            observations.len()
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in observations.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"INSERT INTO hourly_observations (
                    station_id, observation_time, temperature, dew_point, relative_humidity,
                    precipitation, wind_speed, wind_direction, wind_gust, visibility,
                    station_pressure, humidex, wind_chill, weather_description,
                    hourly_ffmc, hourly_isi, hourly_fwi, ffmc, dmc, dc, isi, bui, fwi,
                    danger_rating, snow_depth, solar_radiation
                ) "#,
            );

            builder.push_values(chunk, |mut row, observation| {
                let m = &observation.measurements;
                row.push_bind(observation.station_id)
                    .push_bind(observation.observed_at)
                    .push_bind(m.temperature)
                    .push_bind(m.dew_point)
                    .push_bind(m.relative_humidity)
                    .push_bind(m.precipitation)
                    .push_bind(m.wind_speed)
                    .push_bind(m.wind_direction)
                    .push_bind(m.wind_gust)
                    .push_bind(m.visibility)
                    .push_bind(m.station_pressure)
                    .push_bind(m.humidex)
                    .push_bind(m.wind_chill)
                    .push_bind(m.weather_description.clone())
                    .push_bind(m.hourly_ffmc)
                    .push_bind(m.hourly_isi)
                    .push_bind(m.hourly_fwi)
                    .push_bind(m.ffmc)
                    .push_bind(m.dmc)
                    .push_bind(m.dc)
                    .push_bind(m.isi)
                    .push_bind(m.bui)
                    .push_bind(m.fwi)
                    .push_bind(m.danger_rating.clone())
                    .push_bind(m.snow_depth)
                    .push_bind(m.solar_radiation);
            });
            builder.push(" ON CONFLICT (station_id, observation_time) DO NOTHING");

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        info!(
            "Inserted {} new observations, {} duplicates skipped",
            inserted,
            observations.len() as u64 - inserted
        );
        Ok(inserted)
    }

    /// Latest stored observation time across every station
    #[instrument(skip(self))]
    pub async fn max_observation_time(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(observation_time) FROM hourly_observations",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    #[instrument(skip(self))]
    pub async fn max_observation_time_for_source(
        &self,
        source: SourceFamily,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(o.observation_time)
            FROM hourly_observations o
            JOIN weather_stations s ON s.id = o.station_id
            WHERE s.source = $1
            "#,
        )
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    #[instrument(skip(self))]
    pub async fn max_observation_time_for_station(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(o.observation_time)
            FROM hourly_observations o
            JOIN weather_stations s ON s.id = o.station_id
            WHERE s.source = $1 AND s.station_code = $2
            "#,
        )
        .bind(source.as_str())
        .bind(station_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    #[instrument(skip(self))]
    pub async fn has_any(&self, source: SourceFamily, station_code: &str) -> Result<bool, DbError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM hourly_observations o
                JOIN weather_stations s ON s.id = o.station_id
                WHERE s.source = $1 AND s.station_code = $2
            )
            "#,
        )
        .bind(source.as_str())
        .bind(station_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM hourly_observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
