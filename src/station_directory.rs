use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::fetch_error::FetchError;
use crate::fetcher::{FeedFetcher, FetchOutcome};
use crate::parsing::field_parser;
use crate::source::SourceFamily;

/// Discovery failed; there is nothing to iterate so the whole run stops
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Station directory unavailable: {0}")]
    Unavailable(String),
    #[error("Station directory unavailable: {0}")]
    Fetch(#[from] FetchError),
}

/// Station as described by the station metadata feed (before being persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredStation {
    pub station_code: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
}

/// Decoded station feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationCatalog {
    pub stations: Vec<DiscoveredStation>,
    /// Features without a station code
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<Value>,
}

fn eccc_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"climate_hourly_BC_([0-9A-Z]+)_\d{4}_P1H\.csv")
            .expect("station file pattern is a valid regex")
    })
}

/// Discovers station identifiers from a directory listing or the station metadata feed
#[derive(Clone)]
pub struct StationDirectoryResolver {
    fetcher: FeedFetcher,
    station_feed_url: String,
    station_feed_type_name: String,
}

impl StationDirectoryResolver {
    pub fn new(fetcher: FeedFetcher, config: &Config) -> Self {
        Self {
            fetcher,
            station_feed_url: config.station_feed_url.clone(),
            station_feed_type_name: config.station_feed_type_name.clone(),
        }
    }

    /// Known station identifiers for `source`, deduplicated and sorted ascending
    #[instrument(skip(self))]
    pub async fn list_stations(&self, source: SourceFamily) -> Result<Vec<String>, DirectoryError> {
        match source {
            SourceFamily::Eccc => self.list_directory_stations().await,
            SourceFamily::Bcws => {
                let codes: Vec<String> = self
                    .fetch_station_catalog()
                    .await?
                    .stations
                    .into_iter()
                    .map(|station| station.station_code)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                Ok(codes)
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_directory_stations(&self) -> Result<Vec<String>, DirectoryError> {
        let url = self.fetcher.eccc_index_url().to_string();
        info!("Fetching station directory listing from {}", url);

        let listing = match self.fetcher.fetch_url(&url, &[]).await? {
            FetchOutcome::Document(text) => text,
            FetchOutcome::NoData => {
                return Err(DirectoryError::Unavailable(format!(
                    "directory listing not found at {url}"
                )))
            }
        };

        let stations = parse_directory_listing(&listing);
        if stations.is_empty() {
            return Err(DirectoryError::Unavailable(format!(
                "no station files matched in listing at {url}"
            )));
        }

        info!("Discovered {} stations in directory listing", stations.len());
        Ok(stations)
    }

    /// Fetch the WFS station feature collection
    #[instrument(skip(self), fields(url = %self.station_feed_url))]
    pub async fn fetch_station_catalog(&self) -> Result<StationCatalog, DirectoryError> {
        let query = [
            ("service", "WFS"),
            ("version", "2.0.0"),
            ("request", "GetFeature"),
            ("typeName", self.station_feed_type_name.as_str()),
            ("outputFormat", "json"),
            ("count", "1000"),
        ];

        let body = match self.fetcher.fetch_url(&self.station_feed_url, &query).await? {
            FetchOutcome::Document(text) => text,
            FetchOutcome::NoData => {
                return Err(DirectoryError::Unavailable(format!(
                    "station feed not found at {}",
                    self.station_feed_url
                )))
            }
        };

        let catalog = parse_station_feed(&body).map_err(|message| {
            DirectoryError::Fetch(FetchError::Decode {
                url: self.station_feed_url.clone(),
                message,
            })
        })?;

        info!(
            "Retrieved {} stations from station feed",
            catalog.stations.len()
        );
        Ok(catalog)
    }
}

/// Extract unique station identifiers from an HTML/text listing of CSV file names
pub fn parse_directory_listing(listing: &str) -> Vec<String> {
    eccc_file_pattern()
        .captures_iter(listing)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Decode a GeoJSON feature collection into stations.
///
/// Features without a station code are skipped and counted.
pub fn parse_station_feed(body: &str) -> Result<StationCatalog, String> {
    let collection: FeatureCollection =
        serde_json::from_str(body).map_err(|e| format!("invalid feature collection: {e}"))?;

    let mut stations = Vec::with_capacity(collection.features.len());
    let mut skipped = 0;

    for feature in collection.features {
        let props = &feature.properties;

        let Some(station_code) = props.get("STATION_CODE").and_then(value_as_text) else {
            skipped += 1;
            continue;
        };

        let (geo_longitude, geo_latitude) = feature
            .geometry
            .as_ref()
            .map(|g| {
                (
                    g.coordinates.first().and_then(value_as_f64),
                    g.coordinates.get(1).and_then(value_as_f64),
                )
            })
            .unwrap_or((None, None));

        stations.push(DiscoveredStation {
            station_code,
            name: props.get("STATION_NAME").and_then(value_as_text),
            latitude: props.get("LATITUDE").and_then(value_as_f64).or(geo_latitude),
            longitude: props.get("LONGITUDE").and_then(value_as_f64).or(geo_longitude),
            elevation: props.get("ELEVATION").and_then(value_as_f64),
        });
    }

    if skipped > 0 {
        warn!("Skipped {} features without a station code", skipped);
    }
    debug!("Parsed {} stations from feature collection", stations.len());

    Ok(StationCatalog { stations, skipped })
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => field_parser::parse_token(s, &[]),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => field_parser::parse_decimal(s),
        _ => None,
    }
}
