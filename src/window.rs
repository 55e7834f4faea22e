//! Trailing day windows selectable on the dashboard

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Trailing window over which metrics and series are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Window {
    #[default]
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::SevenDays, Window::ThirtyDays, Window::NinetyDays];

    /// Parse a window identifier, falling back to `7d` for anything unknown.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn days(self) -> i64 {
        match self {
            Window::SevenDays => 7,
            Window::ThirtyDays => 30,
            Window::NinetyDays => 90,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Window::SevenDays => "7d",
            Window::ThirtyDays => "30d",
            Window::NinetyDays => "90d",
        }
    }

    pub fn duration(self) -> Duration {
        Duration::days(self.days())
    }

    /// Every calendar day from `today - days` to `today`, inclusive.
    pub fn day_range(self, today: NaiveDate) -> Vec<NaiveDate> {
        let start = today - self.duration();
        start.iter_days().take(self.days() as usize + 1).collect()
    }
}

impl FromStr for Window {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "7d" => Ok(Window::SevenDays),
            "30d" => Ok(Window::ThirtyDays),
            "90d" => Ok(Window::NinetyDays),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown window '{}', expected one of 7d, 30d, 90d",
                other
            ))),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_identifiers() {
        assert_eq!("7d".parse::<Window>().unwrap(), Window::SevenDays);
        assert_eq!("30d".parse::<Window>().unwrap(), Window::ThirtyDays);
        assert_eq!(" 90d ".parse::<Window>().unwrap(), Window::NinetyDays);
        assert!("24h".parse::<Window>().is_err());
    }

    #[test]
    fn unknown_or_missing_defaults_to_seven_days() {
        assert_eq!(Window::parse_or_default(None), Window::SevenDays);
        assert_eq!(Window::parse_or_default(Some("24h")), Window::SevenDays);
        assert_eq!(Window::parse_or_default(Some("")), Window::SevenDays);
        assert_eq!(Window::parse_or_default(Some("30d")), Window::ThirtyDays);
    }

    #[test]
    fn day_range_is_inclusive_of_both_ends() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        for window in Window::ALL {
            let days = window.day_range(today);
            assert_eq!(days.len() as i64, window.days() + 1);
            assert_eq!(*days.last().unwrap(), today);
            assert_eq!(days[0], today - Duration::days(window.days()));
        }
    }

    #[test]
    fn day_range_crosses_year_boundary() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let days = Window::SevenDays.day_range(today);
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2023, 12, 27).unwrap());
        assert!(days.windows(2).all(|w| w[1] - w[0] == Duration::days(1)));
    }

    #[test]
    fn serde_uses_identifiers() {
        assert_eq!(serde_json::to_string(&Window::ThirtyDays).unwrap(), "\"30d\"");
        let w: Window = serde_json::from_str("\"90d\"").unwrap();
        assert_eq!(w, Window::NinetyDays);
    }
}
