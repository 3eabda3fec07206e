use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::db::{Measurements, StationMetadata};
use crate::parsing::columns::{Column, ColumnMap};
use crate::parsing::field_parser::{parse_decimal, parse_integer, parse_token, PLACEHOLDER_TOKENS};
use crate::parsing::timestamp::TimeNormalizer;
use crate::source::SourceFamily;

/// The document as a whole cannot be read; the target fails, the run goes on
#[derive(Debug, thiserror::Error)]
pub enum DocumentParseError {
    #[error("{family} document has no '{column}' column")]
    MissingColumn {
        family: SourceFamily,
        column: &'static str,
    },
    #[error("Unreadable CSV header: {0}")]
    Header(#[from] csv::Error),
}

/// Why a row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingStation,
    MissingTimestamp,
    MalformedTimestamp,
    Unreadable,
}

/// Canonical observation plus the station metadata carried alongside it
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub station_code: String,
    pub observed_at: DateTime<Utc>,
    pub metadata: StationMetadata,
    pub measurements: Measurements,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Normalized(Box<NormalizedRow>),
    Skipped(SkipReason),
}

/// Every usable row of one document and a count of the rows that were not
#[derive(Debug, Default)]
pub struct NormalizedDocument {
    pub rows: Vec<NormalizedRow>,
    pub dropped: usize,
}

/// Settings shared by every document a run reads
#[derive(Debug, Clone)]
pub struct ReadingConventions {
    pub time: TimeNormalizer,
    pub region_code: String,
    /// ECCC publishes wind direction in tens of degrees. When set, it is
    /// stored in degrees; otherwise the published value is kept.
    pub eccc_wind_in_degrees: bool,
}

impl ReadingConventions {
    pub fn new(time: TimeNormalizer, region_code: impl Into<String>) -> Self {
        Self {
            time,
            region_code: region_code.into(),
            eccc_wind_in_degrees: true,
        }
    }

    pub fn with_eccc_wind_in_degrees(mut self, enabled: bool) -> Self {
        self.eccc_wind_in_degrees = enabled;
        self
    }
}

/// Row mapper for one document, built from that document's header
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    source: SourceFamily,
    columns: ColumnMap,
    fixed_station: Option<String>,
    conventions: ReadingConventions,
}

impl RecordNormalizer {
    /// Resolve the header once.
    ///
    /// `fixed_station` attributes every row to one station (per-station
    /// documents); otherwise each row must carry its own station code.
    pub fn for_document(
        source: SourceFamily,
        headers: &StringRecord,
        fixed_station: Option<&str>,
        conventions: &ReadingConventions,
    ) -> Result<Self, DocumentParseError> {
        let columns = ColumnMap::resolve(source, headers);

        if !columns.contains(Column::ObservedAt) {
            return Err(DocumentParseError::MissingColumn {
                family: source,
                column: "timestamp",
            });
        }
        if fixed_station.is_none() && !columns.contains(Column::StationCode) {
            return Err(DocumentParseError::MissingColumn {
                family: source,
                column: "station code",
            });
        }

        debug!("Resolved {} {} columns", columns.len(), source);

        Ok(Self {
            source,
            columns,
            fixed_station: fixed_station.map(str::to_string),
            conventions: conventions.clone(),
        })
    }

    pub fn normalize(&self, record: &StringRecord) -> RowOutcome {
        let station_code = match &self.fixed_station {
            Some(code) => code.clone(),
            None => match self.text(record, Column::StationCode) {
                Some(code) => code,
                None => return RowOutcome::Skipped(SkipReason::MissingStation),
            },
        };

        let raw_time = match self.columns.get(record, Column::ObservedAt) {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return RowOutcome::Skipped(SkipReason::MissingTimestamp),
        };
        let observed_at = match self.conventions.time.normalize(self.source, raw_time) {
            Ok(instant) => instant,
            Err(e) => {
                debug!("Skipping row for station {}: {}", station_code, e);
                return RowOutcome::Skipped(SkipReason::MalformedTimestamp);
            }
        };

        RowOutcome::Normalized(Box::new(NormalizedRow {
            station_code,
            observed_at,
            metadata: self.metadata(record),
            measurements: self.measurements(record),
        }))
    }

    fn metadata(&self, record: &StringRecord) -> StationMetadata {
        StationMetadata {
            name: self.text(record, Column::StationName),
            province: Some(self.conventions.region_code.clone()),
            latitude: self.decimal(record, Column::Latitude),
            longitude: self.decimal(record, Column::Longitude),
            elevation: self.decimal(record, Column::Elevation),
            is_active: None,
        }
    }

    fn measurements(&self, record: &StringRecord) -> Measurements {
        let wind_direction = match self.source {
            SourceFamily::Eccc if self.conventions.eccc_wind_in_degrees => self
                .integer(record, Column::WindDirection)
                .and_then(|tens| tens.checked_mul(10)),
            _ => self.integer(record, Column::WindDirection),
        };

        Measurements {
            temperature: self.decimal(record, Column::Temperature),
            dew_point: self.decimal(record, Column::DewPoint),
            relative_humidity: self.integer(record, Column::RelativeHumidity),
            precipitation: self.decimal(record, Column::Precipitation),
            wind_speed: self.decimal(record, Column::WindSpeed),
            wind_direction,
            wind_gust: self.decimal(record, Column::WindGust),
            visibility: self.decimal(record, Column::Visibility),
            station_pressure: self.decimal(record, Column::StationPressure),
            humidex: self.decimal(record, Column::Humidex),
            wind_chill: self.decimal(record, Column::WindChill),
            weather_description: self
                .columns
                .get(record, Column::WeatherDescription)
                .and_then(|raw| parse_token(raw, PLACEHOLDER_TOKENS)),
            hourly_ffmc: self.decimal(record, Column::HourlyFfmc),
            hourly_isi: self.decimal(record, Column::HourlyIsi),
            hourly_fwi: self.decimal(record, Column::HourlyFwi),
            ffmc: self.decimal(record, Column::Ffmc),
            dmc: self.decimal(record, Column::Dmc),
            dc: self.decimal(record, Column::Dc),
            isi: self.decimal(record, Column::Isi),
            bui: self.decimal(record, Column::Bui),
            fwi: self.decimal(record, Column::Fwi),
            danger_rating: self.text(record, Column::DangerRating),
            snow_depth: self.decimal(record, Column::SnowDepth),
            solar_radiation: self.decimal(record, Column::SolarRadiation),
        }
    }

    fn text(&self, record: &StringRecord, column: Column) -> Option<String> {
        self.columns
            .get(record, column)
            .and_then(|raw| parse_token(raw, &[]))
    }

    fn decimal(&self, record: &StringRecord, column: Column) -> Option<f64> {
        self.columns.get(record, column).and_then(parse_decimal)
    }

    fn integer(&self, record: &StringRecord, column: Column) -> Option<i32> {
        self.columns.get(record, column).and_then(parse_integer)
    }
}

/// Parse a whole CSV document into canonical rows.
///
/// Rows the CSV reader cannot tokenize are dropped and counted like any other
/// unusable row. A blank document has nothing to read and yields no rows.
pub fn normalize_document(
    source: SourceFamily,
    text: &str,
    fixed_station: Option<&str>,
    conventions: &ReadingConventions,
) -> Result<NormalizedDocument, DocumentParseError> {
    if text.trim().is_empty() {
        debug!("Blank {} document", source);
        return Ok(NormalizedDocument::default());
    }

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let normalizer = RecordNormalizer::for_document(source, &headers, fixed_station, conventions)?;

    let mut document = NormalizedDocument::default();
    let mut malformed_times = 0;

    for result in reader.records() {
        let outcome = match result {
            Ok(record) => normalizer.normalize(&record),
            Err(e) => {
                debug!("Unreadable CSV row: {}", e);
                RowOutcome::Skipped(SkipReason::Unreadable)
            }
        };

        match outcome {
            RowOutcome::Normalized(row) => document.rows.push(*row),
            RowOutcome::Skipped(reason) => {
                if reason == SkipReason::MalformedTimestamp {
                    malformed_times += 1;
                }
                document.dropped += 1;
            }
        }
    }

    if document.dropped > 0 {
        warn!(
            "Dropped {} {} rows ({} with malformed timestamps)",
            document.dropped, source, malformed_times
        );
    }
    debug!("Normalized {} {} rows", document.rows.len(), source);

    Ok(document)
}
