//! Dashboard aggregation: summary metrics and per-day series.
//!
//! Everything here is pure. Callers pass `today` explicitly so the series can
//! be computed for any reference day.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use crate::record::EventRecord;
use crate::window::Window;

/// Headline numbers shown above the charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DashboardMetrics {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub appointments_booked: usize,
    pub messages_per_booking: u64,
}

/// Raw tallies for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DayCount {
    pub messages: usize,
    pub bookings: usize,
}

/// Series aligned to a fixed list of days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySeries {
    pub days: Vec<NaiveDate>,
    /// Running total of messages up to and including each day.
    pub cumulative_messages: Vec<usize>,
    /// Bookings on each day, not accumulated.
    pub daily_bookings: Vec<usize>,
}

impl DailySeries {
    /// Chart labels such as `Jan 5`.
    pub fn labels(&self) -> Vec<String> {
        self.days.iter().map(|d| display_label(*d)).collect()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Everything the rendering layer needs for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub window: Window,
    pub metrics: DashboardMetrics,
    pub series: DailySeries,
    pub generated_at: DateTime<Utc>,
    pub from_cache: bool,
}

pub fn display_label(day: NaiveDate) -> String {
    day.format("%b %-d").to_string()
}

/// Compute the summary metrics for a set of valid records.
pub fn summarize(records: &[EventRecord]) -> DashboardMetrics {
    let mut sessions: HashSet<&str> = HashSet::new();
    let mut booked_sessions: HashSet<&str> = HashSet::new();

    for record in records {
        sessions.insert(record.session_id.as_str());
        if record.appointment_booked {
            booked_sessions.insert(record.session_id.as_str());
        }
    }

    let total_messages = records.len();
    let appointments_booked = booked_sessions.len();
    let messages_per_booking = if appointments_booked > 0 {
        (total_messages as f64 / appointments_booked as f64).round() as u64
    } else {
        0
    };

    DashboardMetrics {
        total_messages,
        total_sessions: sessions.len(),
        appointments_booked,
        messages_per_booking,
    }
}

/// Per-day message and booking tallies, keyed by calendar day.
///
/// Records without a parseable day are skipped.
pub fn daily_counts(records: &[EventRecord]) -> BTreeMap<NaiveDate, DayCount> {
    let mut by_day: BTreeMap<NaiveDate, DayCount> = BTreeMap::new();
    for record in records {
        let Some(day) = record.day() else {
            continue;
        };
        let entry = by_day.entry(day).or_default();
        entry.messages += 1;
        if record.appointment_booked {
            entry.bookings += 1;
        }
    }
    by_day
}

/// Align records to the days of `window` ending at `today`.
pub fn build_daily_series(records: &[EventRecord], window: Window, today: NaiveDate) -> DailySeries {
    let days = window.day_range(today);
    let mut messages = vec![0usize; days.len()];
    let mut bookings = vec![0usize; days.len()];

    let first = days[0];
    for (day, count) in daily_counts(records).range(first..=today) {
        let slot = (*day - first).num_days() as usize;
        messages[slot] = count.messages;
        bookings[slot] = count.bookings;
    }

    let mut running = 0;
    for slot in messages.iter_mut() {
        running += *slot;
        *slot = running;
    }

    DailySeries {
        days,
        cumulative_messages: messages,
        daily_bookings: bookings,
    }
}

/// Y-axis ceiling for a chart: 10% headroom over the peak, at least 1.
pub fn suggested_max(values: &[usize]) -> usize {
    let peak = values.iter().copied().max().unwrap_or(0).max(1);
    (peak * 11).div_ceil(10)
}

/// Bundle metrics and series for publication. Days are bucketed against the
/// local calendar date of `now`.
pub fn build_snapshot(
    records: &[EventRecord],
    window: Window,
    now: DateTime<Utc>,
    from_cache: bool,
) -> DashboardSnapshot {
    let today = now.with_timezone(&Local).date_naive();
    DashboardSnapshot {
        window,
        metrics: summarize(records),
        series: build_daily_series(records, window, today),
        generated_at: now,
        from_cache,
    }
}
