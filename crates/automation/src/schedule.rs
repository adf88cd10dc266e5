//! When snapshots are taken.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use eduvision_common::error::{EduvisionError, EduvisionResult};
use serde::{Deserialize, Serialize};

/// A recurring trigger in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every hour at `minute`.
    Hourly { minute: u32 },
    /// Every day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// Every week on `weekday` at `hour:minute`.
    Weekly {
        #[serde(alias = "day_of_week")]
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// Every `minutes` minutes, counted from the previous run.
    Interval { minutes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Hourly,
    Daily,
    Weekly,
    Interval,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Interval => "interval",
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Schedule {
    pub fn kind(&self) -> ScheduleKind {
        match self {
            Self::Hourly { .. } => ScheduleKind::Hourly,
            Self::Daily { .. } => ScheduleKind::Daily,
            Self::Weekly { .. } => ScheduleKind::Weekly,
            Self::Interval { .. } => ScheduleKind::Interval,
        }
    }

    /// Reject out-of-range fields.
    pub fn validate(&self) -> EduvisionResult<()> {
        let (hour, minute) = match *self {
            Self::Hourly { minute } => (0, minute),
            Self::Daily { hour, minute } | Self::Weekly { hour, minute, .. } => (hour, minute),
            Self::Interval { minutes } => {
                if minutes == 0 {
                    return Err(EduvisionError::automation(
                        "Interval must be at least one minute",
                    ));
                }
                return Ok(());
            }
        };
        if hour > 23 {
            return Err(EduvisionError::automation(format!(
                "Hour {hour} out of range (0-23)"
            )));
        }
        if minute > 59 {
            return Err(EduvisionError::automation(format!(
                "Minute {minute} out of range (0-59)"
            )));
        }
        Ok(())
    }

    /// First trigger strictly after `anchor`.
    pub fn next_after(&self, anchor: NaiveDateTime) -> NaiveDateTime {
        let midnight = anchor.date().and_time(NaiveTime::MIN);
        match *self {
            Self::Hourly { minute } => {
                let hour_start = midnight + Duration::hours(i64::from(anchor.hour()));
                let candidate = hour_start + Duration::minutes(i64::from(minute));
                if candidate > anchor {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Self::Daily { hour, minute } => {
                let candidate = midnight + time_of_day(hour, minute);
                if candidate > anchor {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let today = anchor.weekday().num_days_from_monday();
                let target = weekday.num_days_from_monday();
                let days_ahead = (target + 7 - today) % 7;
                let candidate =
                    midnight + Duration::days(i64::from(days_ahead)) + time_of_day(hour, minute);
                if candidate > anchor {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
            Self::Interval { minutes } => anchor + Duration::minutes(i64::from(minutes.max(1))),
        }
    }

    /// Short human description, e.g. `daily at 09:00`.
    pub fn describe(&self) -> String {
        match *self {
            Self::Hourly { minute } => format!("hourly at :{minute:02}"),
            Self::Daily { hour, minute } => format!("daily at {hour:02}:{minute:02}"),
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => format!("weekly on {weekday} at {hour:02}:{minute:02}"),
            Self::Interval { minutes } => format!("every {minutes} min"),
        }
    }
}

fn time_of_day(hour: u32, minute: u32) -> Duration {
    Duration::hours(i64::from(hour)) + Duration::minutes(i64::from(minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn hourly_later_this_hour_or_next() {
        let s = Schedule::Hourly { minute: 30 };
        assert_eq!(s.next_after(at(2026, 3, 2, 10, 15, 0)), at(2026, 3, 2, 10, 30, 0));
        assert_eq!(s.next_after(at(2026, 3, 2, 10, 30, 0)), at(2026, 3, 2, 11, 30, 0));
        assert_eq!(s.next_after(at(2026, 3, 2, 23, 45, 0)), at(2026, 3, 3, 0, 30, 0));
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_passed() {
        let s = Schedule::Daily { hour: 9, minute: 0 };
        assert_eq!(s.next_after(at(2026, 3, 2, 8, 59, 59)), at(2026, 3, 2, 9, 0, 0));
        assert_eq!(s.next_after(at(2026, 3, 2, 9, 0, 1)), at(2026, 3, 3, 9, 0, 0));
    }

    #[test]
    fn weekly_finds_next_matching_weekday() {
        // 2026-03-02 is a Monday.
        let s = Schedule::Weekly {
            weekday: Weekday::Wed,
            hour: 8,
            minute: 0,
        };
        assert_eq!(s.next_after(at(2026, 3, 2, 12, 0, 0)), at(2026, 3, 4, 8, 0, 0));
        assert_eq!(s.next_after(at(2026, 3, 4, 8, 0, 0)), at(2026, 3, 11, 8, 0, 0));
        assert_eq!(s.next_after(at(2026, 3, 4, 7, 0, 0)), at(2026, 3, 4, 8, 0, 0));
    }

    #[test]
    fn interval_counts_from_anchor() {
        let s = Schedule::Interval { minutes: 5 };
        assert_eq!(s.next_after(at(2026, 3, 2, 10, 58, 30)), at(2026, 3, 2, 11, 3, 30));
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        assert!(Schedule::Hourly { minute: 60 }.validate().is_err());
        assert!(Schedule::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(Schedule::Interval { minutes: 0 }.validate().is_err());
        assert!(Schedule::Weekly {
            weekday: Weekday::Sun,
            hour: 23,
            minute: 59
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Schedule::Daily { hour: 9, minute: 15 }).unwrap();
        assert_eq!(json["type"], "daily");
        assert_eq!(json["hour"], 9);

        let weekly: Schedule = serde_json::from_str(
            r#"{"type":"weekly","day_of_week":"monday","hour":8,"minute":0}"#,
        )
        .unwrap();
        assert_eq!(weekly.kind(), ScheduleKind::Weekly);
        assert_eq!(
            weekly,
            Schedule::Weekly {
                weekday: Weekday::Mon,
                hour: 8,
                minute: 0
            }
        );
    }
}
