//! Time-of-day quiet window, evaluated in a configured IANA timezone.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use hermes_core::error::{BridgeError, Result};

/// Raw quiet-hours section of the policy file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuietHoursConfig {
    pub start: String,
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub exempt: Vec<String>,
}

fn default_timezone() -> String {
    "UTC".into()
}

/// Compiled window. `start > end` wraps past midnight; `start == end` is empty.
#[derive(Debug, Clone)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
    exempt: BTreeSet<String>,
}

impl QuietHours {
    pub fn compile(cfg: &QuietHoursConfig) -> Result<Self> {
        let start = parse_hhmm(&cfg.start, "quiet_hours.start")?;
        let end = parse_hhmm(&cfg.end, "quiet_hours.end")?;
        let tz: Tz = cfg.timezone.parse().map_err(|_| {
            BridgeError::BadRequest(format!("quiet_hours.timezone: unknown zone {}", cfg.timezone))
        })?;
        Ok(Self { start, end, tz, exempt: cfg.exempt.iter().cloned().collect() })
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let t = now.with_timezone(&self.tz).time();
        if self.start == self.end {
            false
        } else if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    pub fn is_exempt(&self, caller_id: &str) -> bool {
        self.exempt.contains(caller_id)
    }
}

fn parse_hhmm(s: &str, field: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| BridgeError::BadRequest(format!("{field} must be HH:MM (got {s:?})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start: &str, end: &str, tz: &str) -> QuietHours {
        let cfg = QuietHoursConfig {
            start: start.into(),
            end: end.into(),
            timezone: tz.into(),
            exempt: vec!["coordinator".into()],
        };
        match QuietHours::compile(&cfg) {
            Ok(q) => q,
            Err(e) => panic!("compile failed: {e}"),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).single().unwrap_or_else(Utc::now)
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let q = window("23:00", "08:00", "UTC");
        assert!(q.contains(at(2, 0)));
        assert!(q.contains(at(23, 0)));
        assert!(!q.contains(at(8, 0)));
        assert!(!q.contains(at(12, 30)));
    }

    #[test]
    fn daytime_window_is_half_open() {
        let q = window("12:00", "13:00", "UTC");
        assert!(q.contains(at(12, 0)));
        assert!(q.contains(at(12, 59)));
        assert!(!q.contains(at(13, 0)));
    }

    #[test]
    fn equal_bounds_disable_the_window() {
        let q = window("00:00", "00:00", "UTC");
        assert!(!q.contains(at(0, 0)));
        assert!(!q.contains(at(15, 0)));
    }

    #[test]
    fn evaluated_in_configured_zone() {
        // 02:00 UTC is 03:00 in Berlin (winter): still inside 23:00-08:00.
        let q = window("23:00", "08:00", "Europe/Berlin");
        assert!(q.contains(at(2, 0)));
        // 07:30 UTC is 08:30 in Berlin: outside.
        assert!(!q.contains(at(7, 30)));
    }

    #[test]
    fn rejects_bad_bounds_and_zones() {
        let bad = QuietHoursConfig {
            start: "25:00".into(),
            end: "08:00".into(),
            timezone: "UTC".into(),
            exempt: vec![],
        };
        assert!(QuietHours::compile(&bad).is_err());
        let bad_tz = QuietHoursConfig { timezone: "Mars/Olympus".into(), start: "23:00".into(), ..bad };
        assert!(QuietHours::compile(&bad_tz).is_err());
    }

    #[test]
    fn exempt_list_is_exact_match() {
        let q = window("23:00", "08:00", "UTC");
        assert!(q.is_exempt("coordinator"));
        assert!(!q.is_exempt("coordinator2"));
    }
}
