//! Text and JSON rendering of dashboard snapshots.

use std::fmt::Write;

use crate::aggregator::{suggested_max, DashboardSnapshot};

/// Output format: table | json
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

pub fn render(snapshot: &DashboardSnapshot, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Table => Ok(render_table(snapshot)),
    }
}

fn render_table(snapshot: &DashboardSnapshot) -> String {
    let metrics = &snapshot.metrics;
    let series = &snapshot.series;
    let mut out = String::new();

    let source = if snapshot.from_cache { "cached" } else { "live" };
    let _ = writeln!(
        out,
        "📊 Dashboard ({}, {} data, {})",
        snapshot.window,
        source,
        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "  Appointments booked:  {}", metrics.appointments_booked);
    let _ = writeln!(out, "  Total messages:       {}", metrics.total_messages);
    let _ = writeln!(out, "  Messages per booking: {}", metrics.messages_per_booking);
    let _ = writeln!(out, "  Sessions:             {}", metrics.total_sessions);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {:<8} {:>10} {:>10}   (axis max {} / {})",
        "Day",
        "Messages",
        "Bookings",
        suggested_max(&series.cumulative_messages),
        suggested_max(&series.daily_bookings)
    );
    for ((label, messages), bookings) in series
        .labels()
        .iter()
        .zip(&series.cumulative_messages)
        .zip(&series.daily_bookings)
    {
        let _ = writeln!(out, "  {:<8} {:>10} {:>10}", label, messages, bookings);
    }
    out
}
