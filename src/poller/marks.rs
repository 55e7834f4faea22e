//! Half-hour boundary arithmetic and the startup fetch decision.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

/// Spacing between aligned polls.
pub const HALF_HOUR_MINUTES: i64 = 30;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Most recent :00 or :30 boundary at or before `now`.
pub fn most_recent_half_hour_mark<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let into_half = i64::from(now.minute()) % HALF_HOUR_MINUTES;
    now.clone()
        - Duration::minutes(into_half)
        - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()))
}

/// The boundary following the most recent one.
pub fn next_half_hour_mark<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    most_recent_half_hour_mark(now) + Duration::minutes(HALF_HOUR_MINUTES)
}

/// What to do when the scheduler starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupDecision {
    /// The current boundary has not been served yet.
    FetchNow { mark: DateTime<Utc> },
    /// Cached data covers the current boundary; wait for the next one.
    WaitForBoundary {
        next_mark: DateTime<Utc>,
        delay: Duration,
    },
}

/// Decide between fetching immediately and waiting, given the persisted
/// last-updated mark.
pub fn decide_startup(now: DateTime<Utc>, last_updated: Option<DateTime<Utc>>) -> StartupDecision {
    let mark = most_recent_half_hour_mark(&now);
    match last_updated {
        Some(updated) if updated >= mark => {
            let next_mark = next_half_hour_mark(&now);
            StartupDecision::WaitForBoundary {
                next_mark,
                delay: next_mark - now,
            }
        }
        _ => StartupDecision::FetchNow { mark },
    }
}
