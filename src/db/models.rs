use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::source::SourceFamily;

// Database entity models
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Station {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub source: SourceFamily,
    pub station_code: String,
    pub name: String,
    pub province: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub is_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Station {
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Station attributes proposed by a feed; `None` means "not supplied"
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StationMetadata {
    pub name: Option<String>,
    pub province: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub is_active: Option<bool>,
}

impl StationMetadata {
    pub fn is_empty(&self) -> bool {
        *self == StationMetadata::default()
    }
}

/// Measurement fields of one observation. Absent means "not reported", never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Measurements {
    pub temperature: Option<f64>,
    pub dew_point: Option<f64>,
    pub relative_humidity: Option<i32>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<i32>,
    pub wind_gust: Option<f64>,
    pub visibility: Option<f64>,
    pub station_pressure: Option<f64>,
    pub humidex: Option<f64>,
    pub wind_chill: Option<f64>,
    pub weather_description: Option<String>,
    // Fire-weather indices
    pub hourly_ffmc: Option<f64>,
    pub hourly_isi: Option<f64>,
    pub hourly_fwi: Option<f64>,
    pub ffmc: Option<f64>,
    pub dmc: Option<f64>,
    pub dc: Option<f64>,
    pub isi: Option<f64>,
    pub bui: Option<f64>,
    pub fwi: Option<f64>,
    pub danger_rating: Option<String>,
    pub snow_depth: Option<f64>,
    pub solar_radiation: Option<f64>,
}

/// Observation ready to be written, bound to a persisted station
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub station_id: i64,
    pub observed_at: DateTime<Utc>,
    pub measurements: Measurements,
}

/// How much of the registry has usable coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct StationCoverage {
    pub total: i64,
    pub with_coordinates: i64,
}
