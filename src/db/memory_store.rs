use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{
    CursorScope, DbError, Measurements, NewObservation, Station, StationCoverage, StationMetadata,
    WeatherStore,
};
use crate::source::SourceFamily;

#[derive(Default)]
struct State {
    stations: Vec<Station>,
    observations: BTreeMap<(i64, DateTime<Utc>), Measurements>,
    #[cfg(test)]
    fail_inserts: bool,
    #[cfg(test)]
    insert_calls: usize,
}

impl State {
    fn station_ids(&self, source: SourceFamily, station_code: Option<&str>) -> Vec<i64> {
        self.stations
            .iter()
            .filter(|s| s.source == source && station_code.map_or(true, |c| s.station_code == c))
            .map(|s| s.id)
            .collect()
    }

    fn latest_for(&self, station_ids: &[i64]) -> Option<DateTime<Utc>> {
        self.observations
            .keys()
            .filter(|(id, _)| station_ids.contains(id))
            .map(|(_, at)| *at)
            .max()
    }
}

/// In-process store with the same semantics as the PostgreSQL schema
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent batch insert fail as a storage fault
    #[cfg(test)]
    pub fn fail_inserts(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_inserts = fail;
        }
    }

    pub fn observation_count(&self) -> usize {
        self.state.lock().map(|s| s.observations.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn insert_calls(&self) -> usize {
        self.state.lock().map(|s| s.insert_calls).unwrap_or(0)
    }

    pub fn stations(&self) -> Vec<Station> {
        self.state
            .lock()
            .map(|s| s.stations.clone())
            .unwrap_or_default()
    }

    pub fn measurements(&self, station_id: i64, at: DateTime<Utc>) -> Option<Measurements> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.observations.get(&(station_id, at)).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DbError> {
        self.state
            .lock()
            .map_err(|_| DbError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl WeatherStore for MemoryStore {
    async fn find_station(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<Option<Station>, DbError> {
        let state = self.lock()?;
        Ok(state
            .stations
            .iter()
            .find(|s| s.source == source && s.station_code == station_code)
            .cloned())
    }

    async fn upsert_station(
        &self,
        source: SourceFamily,
        station_code: &str,
        metadata: &StationMetadata,
    ) -> Result<Station, DbError> {
        let mut state = self.lock()?;

        if let Some(existing) = state
            .stations
            .iter_mut()
            .find(|s| s.source == source && s.station_code == station_code)
        {
            if let Some(name) = &metadata.name {
                existing.name = name.clone();
            }
            if metadata.province.is_some() {
                existing.province = metadata.province.clone();
            }
            existing.latitude = metadata.latitude.or(existing.latitude);
            existing.longitude = metadata.longitude.or(existing.longitude);
            existing.elevation = metadata.elevation.or(existing.elevation);
            existing.is_active = existing.is_active || metadata.is_active.unwrap_or(false);
            return Ok(existing.clone());
        }

        let station = Station {
            id: state.stations.len() as i64 + 1,
            source,
            station_code: station_code.to_string(),
            name: metadata
                .name
                .clone()
                .unwrap_or_else(|| format!("Station {station_code}")),
            province: metadata.province.clone(),
            latitude: metadata.latitude,
            longitude: metadata.longitude,
            elevation: metadata.elevation,
            is_active: metadata.is_active.unwrap_or(true),
            last_updated: None,
            created_at: Utc::now(),
        };
        state.stations.push(station.clone());
        Ok(station)
    }

    async fn max_observation_instant(
        &self,
        scope: &CursorScope,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let state = self.lock()?;
        Ok(match scope {
            CursorScope::All => state.observations.keys().map(|(_, at)| *at).max(),
            CursorScope::Source(source) => state.latest_for(&state.station_ids(*source, None)),
            CursorScope::Station {
                source,
                station_code,
            } => state.latest_for(&state.station_ids(*source, Some(station_code))),
        })
    }

    async fn has_any_observation(
        &self,
        source: SourceFamily,
        station_code: &str,
    ) -> Result<bool, DbError> {
        let state = self.lock()?;
        Ok(state
            .latest_for(&state.station_ids(source, Some(station_code)))
            .is_some())
    }

    async fn insert_observations_ignoring_duplicates(
        &self,
        batch: &[NewObservation],
    ) -> Result<u64, DbError> {
        let mut state = self.lock()?;

        #[cfg(test)]
        {
            state.insert_calls += 1;
            if state.fail_inserts {
                return Err(DbError::Unavailable("connection reset".to_string()));
            }
        }

        let mut inserted = 0;
        for observation in batch {
            let key = (observation.station_id, observation.observed_at);
            if !state.observations.contains_key(&key) {
                state
                    .observations
                    .insert(key, observation.measurements.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn mark_stations_updated(
        &self,
        station_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut state = self.lock()?;
        for station in state
            .stations
            .iter_mut()
            .filter(|s| station_ids.contains(&s.id))
        {
            station.last_updated = Some(at);
        }
        Ok(())
    }

    async fn station_coverage(&self) -> Result<StationCoverage, DbError> {
        let state = self.lock()?;
        Ok(StationCoverage {
            total: state.stations.len() as i64,
            with_coordinates: state
                .stations
                .iter()
                .filter(|s| s.has_coordinates())
                .count() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(station_id: i64, hour: u32) -> NewObservation {
        NewObservation {
            station_id,
            observed_at: Utc.with_ymd_and_hms(2025, 11, 17, hour, 0, 0).unwrap(),
            measurements: Measurements {
                temperature: Some(3.4),
                ..Measurements::default()
            },
        }
    }

    #[tokio::test]
    async fn test_duplicate_instants_are_skipped() {
        let store = MemoryStore::new();
        let batch = vec![observation(1, 0), observation(1, 1), observation(1, 1)];

        assert_eq!(
            store
                .insert_observations_ignoring_duplicates(&batch)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .insert_observations_ignoring_duplicates(&batch)
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.observation_count(), 2);
    }

    #[tokio::test]
    async fn test_upsert_keeps_stored_values_for_absent_fields() {
        let store = MemoryStore::new();
        let created = store
            .upsert_station(
                SourceFamily::Bcws,
                "67",
                &StationMetadata {
                    latitude: Some(49.1),
                    ..StationMetadata::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.name, "Station 67");
        assert!(created.is_active);

        let updated = store
            .upsert_station(
                SourceFamily::Bcws,
                "67",
                &StationMetadata {
                    name: Some("ASHNOLA".to_string()),
                    is_active: Some(false),
                    ..StationMetadata::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "ASHNOLA");
        assert_eq!(updated.latitude, Some(49.1));
        assert!(updated.is_active);
    }

    #[tokio::test]
    async fn test_cursor_scopes() {
        let store = MemoryStore::new();
        let bcws = store
            .upsert_station(SourceFamily::Bcws, "67", &StationMetadata::default())
            .await
            .unwrap();
        let eccc = store
            .upsert_station(SourceFamily::Eccc, "1108395", &StationMetadata::default())
            .await
            .unwrap();
        store
            .insert_observations_ignoring_duplicates(&[observation(bcws.id, 5), observation(eccc.id, 9)])
            .await
            .unwrap();

        let latest = |hour| Some(Utc.with_ymd_and_hms(2025, 11, 17, hour, 0, 0).unwrap());
        assert_eq!(
            store.max_observation_instant(&CursorScope::All).await.unwrap(),
            latest(9)
        );
        assert_eq!(
            store
                .max_observation_instant(&CursorScope::Source(SourceFamily::Bcws))
                .await
                .unwrap(),
            latest(5)
        );
        assert!(store
            .has_any_observation(SourceFamily::Eccc, "1108395")
            .await
            .unwrap());
        assert!(!store
            .has_any_observation(SourceFamily::Eccc, "67")
            .await
            .unwrap());
    }
}
