use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::store::models::SchedulerConfig;

/// The fetch window is a league rule, not a presentation concern:
/// admission is always evaluated in Eastern Time no matter where the
/// process runs. Stored timestamps stay UTC.
pub(crate) const SCHEDULER_TZ: Tz = New_York;

/// Weekday/hour admission gate for one season's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchWindow {
    /// Active weekdays, 0=Monday..6=Sunday.
    days_of_week: Vec<i32>,
    start_hour: i32,
    /// Exclusive upper bound, 1..=24.
    end_hour: i32,
}

impl FetchWindow {
    pub(crate) fn new(days_of_week: Vec<i32>, start_hour: i32, end_hour: i32) -> Self {
        Self {
            days_of_week,
            start_hour,
            end_hour,
        }
    }

    pub(crate) fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.days_of_week.clone(),
            config.start_hour,
            config.end_hour,
        )
    }

    /// Whether a tick at `now` is admitted.
    ///
    /// DST transitions fall out of the zone database: a moment inside a
    /// skipped or repeated civil hour is tested like any other moment.
    pub(crate) fn admits(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&SCHEDULER_TZ);
        let weekday = local.weekday().num_days_from_monday() as i32;
        let hour = local.hour() as i32;

        self.days_of_week.contains(&weekday)
            && hour >= self.start_hour
            && hour < self.end_hour
    }
}
