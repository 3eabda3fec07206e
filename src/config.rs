use std::env;

use chrono::{FixedOffset, NaiveDate};
use chrono_tz::Tz;

pub const DEFAULT_BCWS_BASE_URL: &str =
    "https://www.for.gov.bc.ca/ftp/HPR/external/!publish/BCWS_DATA_MART/";
pub const DEFAULT_ECCC_BASE_URL: &str =
    "https://dd.weather.gc.ca/today/climate/observations/hourly/csv/BC/";
pub const DEFAULT_STATION_FEED_URL: &str = "https://openmaps.gov.bc.ca/geo/pub/wfs";
pub const DEFAULT_STATION_FEED_TYPE_NAME: &str =
    "pub:WHSE_LAND_AND_NATURAL_RESOURCE.PROT_WEATHER_STATIONS_SP";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bcws_base_url: String,
    pub eccc_base_url: String,
    pub station_feed_url: String,
    pub station_feed_type_name: String,
    pub fetch_timeout_secs: u64,
    pub write_batch_size: usize,
    pub progress_interval: usize,
    pub region_timezone: Tz,
    pub region_code: String,
    /// Offset applied to ECCC "local standard time" stamps; no daylight adjustment
    pub eccc_lst_offset_hours: i32,
    /// Store ECCC wind direction in degrees rather than the published tens of degrees
    pub eccc_wind_in_degrees: bool,
    pub bcws_start_date: NaiveDate,
    pub eccc_start_year: i32,
    pub estimate_seconds_per_unit: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bcws_base_url: DEFAULT_BCWS_BASE_URL.to_string(),
            eccc_base_url: DEFAULT_ECCC_BASE_URL.to_string(),
            station_feed_url: DEFAULT_STATION_FEED_URL.to_string(),
            station_feed_type_name: DEFAULT_STATION_FEED_TYPE_NAME.to_string(),
            fetch_timeout_secs: 30,
            write_batch_size: 1000,
            progress_interval: 10,
            region_timezone: chrono_tz::America::Vancouver,
            region_code: "BC".to_string(),
            eccc_lst_offset_hours: 0,
            eccc_wind_in_degrees: true,
            bcws_start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN),
            eccc_start_year: 2000,
            estimate_seconds_per_unit: 2.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            bcws_base_url: with_trailing_slash(
                env::var("BCWS_BASE_URL").unwrap_or(defaults.bcws_base_url),
            ),
            eccc_base_url: with_trailing_slash(
                env::var("ECCC_BASE_URL").unwrap_or(defaults.eccc_base_url),
            ),
            station_feed_url: env::var("STATION_FEED_URL").unwrap_or(defaults.station_feed_url),
            station_feed_type_name: env::var("STATION_FEED_TYPE_NAME")
                .unwrap_or(defaults.station_feed_type_name),
            fetch_timeout_secs: parse_var("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            write_batch_size: parse_var("WRITE_BATCH_SIZE", defaults.write_batch_size)?.max(1),
            progress_interval: parse_var("PROGRESS_INTERVAL", defaults.progress_interval)?.max(1),
            region_timezone: match env::var("REGION_TIMEZONE") {
                Ok(name) => name.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                    key: "REGION_TIMEZONE",
                    message: e.to_string(),
                })?,
                Err(_) => defaults.region_timezone,
            },
            region_code: env::var("REGION_CODE").unwrap_or(defaults.region_code),
            eccc_lst_offset_hours: parse_var(
                "ECCC_LST_OFFSET_HOURS",
                defaults.eccc_lst_offset_hours,
            )?,
            eccc_wind_in_degrees: parse_var(
                "ECCC_WIND_DIRECTION_DEGREES",
                defaults.eccc_wind_in_degrees,
            )?,
            bcws_start_date: parse_var("BCWS_START_DATE", defaults.bcws_start_date)?,
            eccc_start_year: parse_var("ECCC_START_YEAR", defaults.eccc_start_year)?,
            estimate_seconds_per_unit: non_negative_seconds(
                "ESTIMATE_SECONDS_PER_UNIT",
                parse_var("ESTIMATE_SECONDS_PER_UNIT", defaults.estimate_seconds_per_unit)?,
            )?,
        })
    }

    /// Fixed offset used for ECCC local-standard-time stamps
    pub fn eccc_lst_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.eccc_lst_offset_hours * 3600).ok_or(ConfigError::Invalid {
            key: "ECCC_LST_OFFSET_HOURS",
            message: format!("{} hours is out of range", self.eccc_lst_offset_hours),
        })
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn non_negative_seconds(key: &'static str, seconds: f64) -> Result<f64, ConfigError> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{seconds} is not a finite, non-negative number of seconds"),
        })
    }
}

fn with_trailing_slash(url: String) -> String {
    if url.ends_with('/') {
        url
    } else {
        format!("{url}/")
    }
}
