use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::db::{CursorScope, DbError, WeatherStore};
use crate::source::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedWindow {
    Range(DateRange),
    UpToDate,
}

impl PlannedWindow {
    fn between(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange::new(start, end).map_or(PlannedWindow::UpToDate, PlannedWindow::Range)
    }

    pub fn range(&self) -> Option<DateRange> {
        match self {
            PlannedWindow::Range(range) => Some(*range),
            PlannedWindow::UpToDate => None,
        }
    }
}

/// Computes fetch windows in the region's calendar.
///
/// The current day is still accumulating, so cursor-driven windows end yesterday.
#[derive(Debug, Clone, Copy)]
pub struct BackfillPlanner {
    region: Tz,
    now: DateTime<Utc>,
}

impl BackfillPlanner {
    pub fn new(region: Tz, now: DateTime<Utc>) -> Self {
        Self { region, now }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.region).date_naive()
    }

    pub fn yesterday(&self) -> NaiveDate {
        self.today() - Duration::days(1)
    }

    pub fn current_year(&self) -> i32 {
        self.today().year()
    }

    /// Fixed start through yesterday
    pub fn historical(&self, start: NaiveDate) -> PlannedWindow {
        PlannedWindow::between(start, self.yesterday())
    }

    /// Day after the cursor through yesterday; no cursor means the historical default
    pub fn incremental(&self, last: Option<DateTime<Utc>>, fallback_start: NaiveDate) -> PlannedWindow {
        match last {
            Some(last) => {
                let last_date = last.with_timezone(&self.region).date_naive();
                PlannedWindow::between(last_date + Duration::days(1), self.yesterday())
            }
            None => self.historical(fallback_start),
        }
    }

    /// The `days` most recent complete days; `None` when that reaches past the calendar
    pub fn trailing_days(&self, days: u32) -> Option<PlannedWindow> {
        if days == 0 {
            return Some(PlannedWindow::UpToDate);
        }
        let end = self.yesterday();
        let start = end.checked_sub_signed(Duration::days(i64::from(days) - 1))?;
        Some(PlannedWindow::between(start, end))
    }

    /// Calendar dates covering the last `hours` hours up to now, ignoring any cursor
    pub fn hourly_refresh(&self, hours: u32) -> Option<PlannedWindow> {
        let start = self
            .now
            .checked_sub_signed(Duration::hours(i64::from(hours)))?
            .with_timezone(&self.region)
            .date_naive();
        Some(PlannedWindow::between(start, self.today()))
    }

    /// Incremental window from the store's cursor for `scope`
    #[instrument(skip(self, store))]
    pub async fn next_window(
        &self,
        store: &dyn WeatherStore,
        scope: &CursorScope,
        fallback_start: NaiveDate,
    ) -> Result<PlannedWindow, DbError> {
        let last = store.max_observation_instant(scope).await?;
        let window = self.incremental(last, fallback_start);

        match (last, window) {
            (Some(last), PlannedWindow::UpToDate) => {
                info!("Data is already up to date, latest observation {}", last)
            }
            (Some(last), PlannedWindow::Range(range)) => info!(
                "Latest observation {}, missing {} ({} days)",
                last,
                range,
                range.day_count()
            ),
            (None, _) => debug!(
                "No stored observations, using historical start {}",
                fallback_start
            ),
        }

        Ok(window)
    }
}
