//! Logical columns and the header variants each source family publishes them under.
//!
//! Headers are resolved once per document; rows are then read by index.

use std::collections::HashMap;

use csv::StringRecord;

use crate::source::SourceFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    StationCode,
    StationName,
    Latitude,
    Longitude,
    Elevation,
    ObservedAt,
    Temperature,
    DewPoint,
    RelativeHumidity,
    Precipitation,
    WindSpeed,
    WindDirection,
    WindGust,
    Visibility,
    StationPressure,
    Humidex,
    WindChill,
    WeatherDescription,
    HourlyFfmc,
    HourlyIsi,
    HourlyFwi,
    Ffmc,
    Dmc,
    Dc,
    Isi,
    Bui,
    Fwi,
    DangerRating,
    SnowDepth,
    SolarRadiation,
}

type AliasTable = &'static [(Column, &'static [&'static str])];

const BCWS_ALIASES: AliasTable = &[
    (Column::StationCode, &["STATION_CODE"]),
    (Column::StationName, &["STATION_NAME"]),
    (Column::Latitude, &["LATITUDE"]),
    (Column::Longitude, &["LONGITUDE"]),
    (Column::Elevation, &["ELEVATION"]),
    (Column::ObservedAt, &["DATE_TIME"]),
    (Column::Temperature, &["HOURLY_TEMPERATURE"]),
    (Column::RelativeHumidity, &["HOURLY_RELATIVE_HUMIDITY"]),
    (Column::Precipitation, &["HOURLY_PRECIPITATION"]),
    (Column::WindSpeed, &["HOURLY_WIND_SPEED"]),
    (Column::WindDirection, &["HOURLY_WIND_DIRECTION"]),
    (Column::WindGust, &["HOURLY_WIND_GUST"]),
    (Column::HourlyFfmc, &["HOURLY_FINE_FUEL_MOISTURE_CODE"]),
    (Column::HourlyIsi, &["HOURLY_INITIAL_SPREAD_INDEX"]),
    (Column::HourlyFwi, &["HOURLY_FIRE_WEATHER_INDEX"]),
    (Column::Ffmc, &["FINE_FUEL_MOISTURE_CODE"]),
    (Column::Dmc, &["DUFF_MOISTURE_CODE"]),
    (Column::Dc, &["DROUGHT_CODE"]),
    (Column::Isi, &["INITIAL_SPREAD_INDEX"]),
    (Column::Bui, &["BUILDUP_INDEX"]),
    (Column::Fwi, &["FIRE_WEATHER_INDEX"]),
    (Column::DangerRating, &["DANGER_RATING"]),
    (Column::SnowDepth, &["SNOW_DEPTH"]),
    (
        Column::SolarRadiation,
        &["SOLAR_RADIATION_LICOR", "SOLAR_RADIATION"],
    ),
];

// The degree sign shows up as U+00B0, as a replacement character after a
// lossy decode, or as the two-character UTF-8-read-as-Latin-1 form
const ECCC_ALIASES: AliasTable = &[
    (Column::StationCode, &["Climate ID"]),
    (Column::StationName, &["Station Name"]),
    (Column::Latitude, &["Latitude (y)"]),
    (Column::Longitude, &["Longitude (x)"]),
    (Column::Elevation, &["Elevation", "Elevation (m)"]),
    (Column::ObservedAt, &["Date/Time (LST)", "Date/Time"]),
    (
        Column::Temperature,
        &["Temp (°C)", "Temp (\u{FFFD}C)", "Temp (Â°C)"],
    ),
    (
        Column::DewPoint,
        &[
            "Dew Point Temp (°C)",
            "Dew Point Temp (\u{FFFD}C)",
            "Dew Point Temp (Â°C)",
        ],
    ),
    (Column::RelativeHumidity, &["Rel Hum (%)"]),
    (Column::Precipitation, &["Precip. Amount (mm)"]),
    (Column::WindDirection, &["Wind Dir (10s deg)"]),
    (Column::WindSpeed, &["Wind Spd (km/h)"]),
    (Column::Visibility, &["Visibility (km)"]),
    (Column::StationPressure, &["Stn Press (kPa)"]),
    (Column::Humidex, &["Hmdx"]),
    (Column::WindChill, &["Wind Chill"]),
    (Column::WeatherDescription, &["Weather"]),
];

pub fn aliases(source: SourceFamily) -> AliasTable {
    match source {
        SourceFamily::Bcws => BCWS_ALIASES,
        SourceFamily::Eccc => ECCC_ALIASES,
    }
}

/// Normalize a raw header cell: surrounding whitespace, a byte-order marker and quotes
pub fn clean_header(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches('\u{FEFF}')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
}

/// Column positions for one document
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    positions: HashMap<Column, usize>,
}

impl ColumnMap {
    /// For each logical column, take the first alias (in table order) present in `headers`
    pub fn resolve(source: SourceFamily, headers: &StringRecord) -> Self {
        let cleaned: Vec<&str> = headers.iter().map(clean_header).collect();

        let positions = aliases(source)
            .iter()
            .filter_map(|(column, variants)| {
                variants
                    .iter()
                    .find_map(|variant| cleaned.iter().position(|header| header == variant))
                    .map(|position| (*column, position))
            })
            .collect();

        Self { positions }
    }

    pub fn contains(&self, column: Column) -> bool {
        self.positions.contains_key(&column)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Raw cell for `column`, `None` when the column is absent or the row is short
    pub fn get<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        self.positions
            .get(&column)
            .and_then(|position| record.get(*position))
    }
}
