use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};

use crate::source::SourceFamily;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed {family} timestamp: '{raw}'")]
pub struct MalformedTimestamp {
    pub family: SourceFamily,
    pub raw: String,
}

/// Converts source-specific timestamp text into absolute instants.
///
/// - BCWS `YYYYMMDDHH`: local civil time in the region's zone, honoring its
///   daylight rule. Fall-back hours resolve to standard time; spring-forward
///   gaps are read with the standard offset.
/// - ECCC `YYYY-MM-DD HH:MM`: local standard time at a fixed offset, no
///   daylight adjustment.
#[derive(Debug, Clone, Copy)]
pub struct TimeNormalizer {
    region: Tz,
    standard_time: FixedOffset,
}

impl TimeNormalizer {
    pub fn new(region: Tz, standard_time: FixedOffset) -> Self {
        Self {
            region,
            standard_time,
        }
    }

    pub fn normalize(
        &self,
        source: SourceFamily,
        raw: &str,
    ) -> Result<DateTime<Utc>, MalformedTimestamp> {
        let malformed = || MalformedTimestamp {
            family: source,
            raw: raw.to_string(),
        };

        let text = raw.trim().trim_matches('"');
        match source {
            SourceFamily::Bcws => {
                let naive = parse_compact_hour(text).ok_or_else(malformed)?;
                Ok(self.localize_region(naive))
            }
            SourceFamily::Eccc => {
                let naive =
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M").map_err(|_| malformed())?;
                Ok(self
                    .standard_time
                    .from_utc_datetime(&(naive - self.standard_time))
                    .with_timezone(&Utc))
            }
        }
    }

    fn localize_region(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.region.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            // Repeated hour: the later instant is the one on standard time
            LocalResult::Ambiguous(_, standard) => standard.with_timezone(&Utc),
            LocalResult::None => {
                let standard_offset = self
                    .region
                    .offset_from_utc_datetime(&naive)
                    .base_utc_offset();
                Utc.from_utc_datetime(&(naive - standard_offset))
            }
        }
    }
}

/// Fixed-width `YYYYMMDDHH`
fn parse_compact_hour(text: &str) -> Option<NaiveDateTime> {
    if text.len() != 10 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = text[0..4].parse().ok()?;
    let month: u32 = text[4..6].parse().ok()?;
    let day: u32 = text[6..8].parse().ok()?;
    let hour: u32 = text[8..10].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)
}
