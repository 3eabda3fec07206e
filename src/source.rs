use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Upstream provider with its own CSV schema and URL convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFamily {
    /// Fire-weather data mart: one CSV per day covering every station
    Bcws,
    /// Climate hourly archive: one CSV per station per year
    Eccc,
}

impl SourceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFamily::Bcws => "bcws",
            SourceFamily::Eccc => "eccc",
        }
    }

    /// Whether each document covers a single station (and so needs one request per station)
    pub fn is_per_station(&self) -> bool {
        matches!(self, SourceFamily::Eccc)
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source family '{0}'")]
pub struct UnknownSourceFamily(pub String);

impl FromStr for SourceFamily {
    type Err = UnknownSourceFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bcws" => Ok(SourceFamily::Bcws),
            "eccc" => Ok(SourceFamily::Eccc),
            other => Err(UnknownSourceFamily(other.to_string())),
        }
    }
}

impl TryFrom<String> for SourceFamily {
    type Error = UnknownSourceFamily;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Closed calendar-date range (both ends inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when the range would be empty (end before start)
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Range covering whole calendar years `start_year..=end_year`
    pub fn years(start_year: i32, end_year: i32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(start_year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(end_year, 12, 31)?;
        Self::new(start, end)
    }

    pub fn day_count(&self) -> u64 {
        ((self.end - self.start).num_days() + 1) as u64
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.day_count()).map(move |offset| start + Duration::days(offset as i64))
    }

    pub fn year_span(&self) -> std::ops::RangeInclusive<i32> {
        self.start.year()..=self.end.year()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Period covered by a single upstream document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Date(NaiveDate),
    Year(i32),
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Date(date) => write!(f, "{date}"),
            Period::Year(year) => write!(f, "{year}"),
        }
    }
}

/// One unit of work: a single document to fetch, normalize and persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub source: SourceFamily,
    /// Station identifier for per-station feeds; `None` for feeds covering all stations
    pub station: Option<String>,
    pub period: Period,
}

impl FeedRequest {
    pub fn daily(source: SourceFamily, date: NaiveDate) -> Self {
        Self {
            source,
            station: None,
            period: Period::Date(date),
        }
    }

    pub fn station_year(source: SourceFamily, station: impl Into<String>, year: i32) -> Self {
        Self {
            source,
            station: Some(station.into()),
            period: Period::Year(year),
        }
    }
}

impl fmt::Display for FeedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.station {
            Some(station) => write!(f, "{} station {} {}", self.source, station, self.period),
            None => write!(f, "{} {}", self.source, self.period),
        }
    }
}
