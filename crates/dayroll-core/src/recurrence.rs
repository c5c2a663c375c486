//! Recurrence patterns and the matcher deciding which recurring
//! definitions are due on a given local date.
//!
//! Wire format: a recurring task carries `recurrencePattern` plus a flat
//! `recurrenceDays` list whose meaning depends on the pattern (weekday
//! indices with Sunday = 0, days of month, or `month * 100 + day` for
//! yearly). [`Recurrence`] decodes that pair into one variant per pattern
//! so each encoding is only ever read under its own tag.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::DayBoundaryClock;
use crate::error::RecurrenceError;
use crate::task::{DayStart, RecurringTask};

const BIWEEKLY_GAP_DAYS: i64 = 14;

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekdays,
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
    Manual,
}

impl FromStr for RecurrencePattern {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekdays" => Ok(Self::Weekdays),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "manual" => Ok(Self::Manual),
            other => Err(RecurrenceError::UnknownPattern(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Result<Self, RecurrenceError> {
        let max_day = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => 29,
            _ => return Err(invalid_month_day(month, day)),
        };
        if day == 0 || day > max_day {
            return Err(invalid_month_day(month, day));
        }
        Ok(Self { month, day })
    }

    pub fn encode(&self) -> u32 {
        self.month * 100 + self.day
    }

    pub fn decode(encoded: u32) -> Result<Self, RecurrenceError> {
        Self::new(encoded / 100, encoded % 100)
    }
}

// user input can be arbitrarily large
fn invalid_month_day(month: u32, day: u32) -> RecurrenceError {
    RecurrenceError::InvalidMonthDay(month.saturating_mul(100).saturating_add(day))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecurrenceWire", into = "RecurrenceWire")]
pub enum Recurrence {
    Daily,
    Weekdays,
    /// Weekday indices, Sunday = 0.
    Weekly(BTreeSet<u32>),
    Biweekly(BTreeSet<u32>),
    /// Days of month, 1..=31.
    Monthly(BTreeSet<u32>),
    Yearly(Option<MonthDay>),
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecurrenceWire {
    recurrence_pattern: RecurrencePattern,
    #[serde(default)]
    recurrence_days: Vec<u32>,
}

impl TryFrom<RecurrenceWire> for Recurrence {
    type Error = RecurrenceError;

    fn try_from(wire: RecurrenceWire) -> Result<Self, Self::Error> {
        Recurrence::from_parts(wire.recurrence_pattern, &wire.recurrence_days)
    }
}

impl From<Recurrence> for RecurrenceWire {
    fn from(value: Recurrence) -> Self {
        Self {
            recurrence_pattern: value.pattern(),
            recurrence_days: value.days(),
        }
    }
}

impl Recurrence {
    /// Build a recurrence from a pattern and its raw day list, validating the
    /// day encoding for that pattern. Day lists are ignored for patterns that
    /// do not use them.
    pub fn from_parts(pattern: RecurrencePattern, days: &[u32]) -> Result<Self, RecurrenceError> {
        match pattern {
            RecurrencePattern::Daily => Ok(Self::Daily),
            RecurrencePattern::Weekdays => Ok(Self::Weekdays),
            RecurrencePattern::Manual => Ok(Self::Manual),
            RecurrencePattern::Weekly => Ok(Self::Weekly(weekday_set(days)?)),
            RecurrencePattern::Biweekly => Ok(Self::Biweekly(weekday_set(days)?)),
            RecurrencePattern::Monthly => {
                let mut set = BTreeSet::new();
                for &day in days {
                    if !(1..=31).contains(&day) {
                        return Err(RecurrenceError::InvalidMonthDayIndex(day));
                    }
                    set.insert(day);
                }
                Ok(Self::Monthly(set))
            }
            RecurrencePattern::Yearly => match days {
                [] => Ok(Self::Yearly(None)),
                [encoded] => Ok(Self::Yearly(Some(MonthDay::decode(*encoded)?))),
                _ => Err(RecurrenceError::TooManyYearlyDates(days.len())),
            },
        }
    }

    pub fn pattern(&self) -> RecurrencePattern {
        match self {
            Self::Daily => RecurrencePattern::Daily,
            Self::Weekdays => RecurrencePattern::Weekdays,
            Self::Weekly(_) => RecurrencePattern::Weekly,
            Self::Biweekly(_) => RecurrencePattern::Biweekly,
            Self::Monthly(_) => RecurrencePattern::Monthly,
            Self::Yearly(_) => RecurrencePattern::Yearly,
            Self::Manual => RecurrencePattern::Manual,
        }
    }

    pub fn days(&self) -> Vec<u32> {
        match self {
            Self::Weekly(days) | Self::Biweekly(days) | Self::Monthly(days) => {
                days.iter().copied().collect()
            }
            Self::Yearly(Some(date)) => vec![date.encode()],
            Self::Yearly(None) | Self::Daily | Self::Weekdays | Self::Manual => vec![],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Daily => "Daily".to_string(),
            Self::Weekdays => "Weekdays".to_string(),
            Self::Weekly(days) if days.is_empty() => "Weekly".to_string(),
            Self::Weekly(days) if days.len() == 7 => "Daily".to_string(),
            Self::Weekly(days) => format!("Every {}", weekday_names(days)),
            Self::Biweekly(days) if days.is_empty() => "Biweekly".to_string(),
            Self::Biweekly(days) => format!("Every other {}", weekday_names(days)),
            Self::Monthly(days) if days.is_empty() => "Monthly".to_string(),
            Self::Monthly(days) => {
                let ordinals: Vec<String> = days.iter().map(|d| ordinal(*d)).collect();
                format!("{} of each month", ordinals.join(", "))
            }
            Self::Yearly(None) => "Yearly".to_string(),
            Self::Yearly(Some(date)) => {
                let month = MONTH_NAMES
                    .get(date.month.saturating_sub(1) as usize)
                    .copied()
                    .unwrap_or("?");
                format!("Every {month} {}", date.day)
            }
            Self::Manual => "Manual".to_string(),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn weekday_set(days: &[u32]) -> Result<BTreeSet<u32>, RecurrenceError> {
    let mut set = BTreeSet::new();
    for &day in days {
        if day > 6 {
            return Err(RecurrenceError::InvalidWeekday(day));
        }
        set.insert(day);
    }
    Ok(set)
}

fn weekday_names(days: &BTreeSet<u32>) -> String {
    days.iter()
        .filter_map(|d| WEEKDAY_NAMES.get(*d as usize).copied())
        .collect::<Vec<_>>()
        .join(", ")
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Parse a weekday name or abbreviation into its Sunday = 0 index.
pub fn parse_weekday_index(token: &str) -> Option<u32> {
    let weekday = match token.trim().to_ascii_lowercase().as_str() {
        "sunday" | "sun" => Weekday::Sun,
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        _ => return None,
    };
    Some(weekday.num_days_from_sunday())
}

/// Pure pattern check against the local calendar date of `now`.
///
/// The "already added in this day window" guard is not applied here; see
/// [`get_ready_definitions`].
pub fn is_due(definition: &RecurringTask, now: &DateTime<Tz>) -> bool {
    match &definition.recurrence {
        Recurrence::Daily => true,
        Recurrence::Weekdays => !matches!(now.weekday(), Weekday::Sat | Weekday::Sun),
        Recurrence::Weekly(days) => days.contains(&now.weekday().num_days_from_sunday()),
        Recurrence::Biweekly(days) => {
            if !days.contains(&now.weekday().num_days_from_sunday()) {
                return false;
            }
            let anchor = definition
                .last_added_to_today
                .map_or(definition.core.created_at, |last| {
                    last.max(definition.core.created_at)
                });
            now.with_timezone(&Utc) - anchor >= Duration::days(BIWEEKLY_GAP_DAYS)
        }
        Recurrence::Monthly(days) => days.contains(&now.day()),
        Recurrence::Yearly(Some(date)) => now.month() == date.month && now.day() == date.day,
        Recurrence::Yearly(None) | Recurrence::Manual => false,
    }
}

/// Definitions that are due now and were not already surfaced since the
/// most recent day boundary. Input order is preserved.
pub fn get_ready_definitions<'a>(
    definitions: &'a [RecurringTask],
    now: DateTime<Utc>,
    day_start: DayStart,
    clock: &DayBoundaryClock,
) -> Vec<&'a RecurringTask> {
    let boundary = clock.most_recent_boundary(now, day_start);
    let local_now = clock.local(now);

    definitions
        .iter()
        .filter(|definition| {
            if let Some(last) = definition.last_added_to_today
                && last >= boundary
            {
                trace!(id = %definition.core.id, "recurring task already added this day");
                return false;
            }
            is_due(definition, &local_now)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::task::TaskCore;

    fn definition(recurrence: Recurrence, created_at: DateTime<Utc>) -> RecurringTask {
        RecurringTask {
            core: TaskCore::new("water plants".to_string(), created_at),
            recurrence,
            last_added_to_today: None,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Tz> {
        chrono_tz::UTC
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid local time")
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid time")
    }

    #[test]
    fn huge_month_day_input_is_rejected_without_overflow() {
        let err = MonthDay::new(99_999_999, 1).unwrap_err();
        assert!(matches!(err, RecurrenceError::InvalidMonthDay(u32::MAX)));
        let err = MonthDay::new(12, u32::MAX).unwrap_err();
        assert!(matches!(err, RecurrenceError::InvalidMonthDay(u32::MAX)));
        assert!(matches!(
            MonthDay::new(13, 1),
            Err(RecurrenceError::InvalidMonthDay(1301))
        ));
    }

    #[test]
    fn weekly_matches_member_days_in_any_order() {
        // 2026-03-04 is a Wednesday, 2026-03-05 a Thursday.
        let forward = Recurrence::from_parts(RecurrencePattern::Weekly, &[1, 3, 5]).expect("days");
        let shuffled = Recurrence::from_parts(RecurrencePattern::Weekly, &[5, 1, 3]).expect("days");
        for rec in [forward, shuffled] {
            let def = definition(rec, created());
            assert!(is_due(&def, &at(2026, 3, 4, 9)));
            assert!(!is_due(&def, &at(2026, 3, 5, 9)));
        }
    }

    #[test]
    fn empty_day_lists_are_never_due() {
        let weekly = definition(Recurrence::Weekly(BTreeSet::new()), created());
        let monthly = definition(Recurrence::Monthly(BTreeSet::new()), created());
        for day in 1..=28 {
            assert!(!is_due(&weekly, &at(2026, 2, day, 12)));
            assert!(!is_due(&monthly, &at(2026, 2, day, 12)));
        }
    }

    #[test]
    fn weekdays_skip_the_weekend() {
        let def = definition(Recurrence::Weekdays, created());
        // 2026-03-06 Friday, 2026-03-07 Saturday, 2026-03-08 Sunday.
        assert!(is_due(&def, &at(2026, 3, 6, 8)));
        assert!(!is_due(&def, &at(2026, 3, 7, 8)));
        assert!(!is_due(&def, &at(2026, 3, 8, 8)));
    }

    #[test]
    fn biweekly_needs_fourteen_days_since_last_add() {
        // 2026-03-02 and 2026-03-16 are Mondays; 2026-02-20 is 10 days before
        // 2026-03-02.
        let rec = Recurrence::from_parts(RecurrencePattern::Biweekly, &[1]).expect("days");
        let mut def = definition(rec, created());
        def.last_added_to_today = Some(Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0).unwrap());
        assert!(!is_due(&def, &at(2026, 3, 2, 9)));

        def.last_added_to_today = Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        assert!(!is_due(&def, &at(2026, 3, 9, 9)));
        assert!(is_due(&def, &at(2026, 3, 16, 9)));
    }

    #[test]
    fn biweekly_anchors_on_creation_when_never_added() {
        let rec = Recurrence::from_parts(RecurrencePattern::Biweekly, &[1]).expect("days");
        let def = definition(rec, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert!(!is_due(&def, &at(2026, 3, 9, 9)));
        assert!(is_due(&def, &at(2026, 3, 16, 9)));
    }

    #[test]
    fn monthly_matches_day_of_month() {
        let rec = Recurrence::from_parts(RecurrencePattern::Monthly, &[1, 15]).expect("days");
        let def = definition(rec, created());
        assert!(is_due(&def, &at(2026, 4, 15, 9)));
        assert!(is_due(&def, &at(2026, 5, 1, 9)));
        assert!(!is_due(&def, &at(2026, 5, 2, 9)));
    }

    #[test]
    fn yearly_only_on_its_date() {
        let rec = Recurrence::from_parts(RecurrencePattern::Yearly, &[1225]).expect("days");
        let def = definition(rec, created());
        assert!(is_due(&def, &at(2026, 12, 25, 9)));
        assert!(is_due(&def, &at(2031, 12, 25, 23)));
        assert!(!is_due(&def, &at(2026, 12, 24, 9)));
        assert!(!is_due(&def, &at(2026, 11, 25, 9)));
    }

    #[test]
    fn manual_never_surfaces() {
        let def = definition(Recurrence::Manual, created());
        assert!(!is_due(&def, &at(2026, 6, 1, 9)));
    }

    #[test]
    fn rejects_day_lists_outside_the_pattern_range() {
        assert!(Recurrence::from_parts(RecurrencePattern::Weekly, &[7]).is_err());
        assert!(Recurrence::from_parts(RecurrencePattern::Monthly, &[0]).is_err());
        assert!(Recurrence::from_parts(RecurrencePattern::Yearly, &[1332]).is_err());
        assert!(Recurrence::from_parts(RecurrencePattern::Yearly, &[101, 202]).is_err());
    }

    #[test]
    fn ready_definitions_respect_the_day_window_guard() {
        let clock = DayBoundaryClock::new(chrono_tz::UTC);
        let day_start: DayStart = "05:00".parse().expect("day start");
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();

        let mut added_today = definition(Recurrence::Daily, created());
        added_today.last_added_to_today = Some(Utc.with_ymd_and_hms(2026, 3, 4, 6, 0, 0).unwrap());
        let mut added_yesterday = definition(Recurrence::Daily, created());
        added_yesterday.last_added_to_today =
            Some(Utc.with_ymd_and_hms(2026, 3, 4, 4, 59, 0).unwrap());
        let never = definition(Recurrence::Manual, created());

        let defs = vec![added_today, added_yesterday.clone(), never];
        let ready = get_ready_definitions(&defs, now, day_start, &clock);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].core.id, added_yesterday.core.id);
    }

    #[test]
    fn wire_format_round_trips_pattern_and_days() {
        let rec = Recurrence::from_parts(RecurrencePattern::Yearly, &[1225]).expect("days");
        let def = definition(rec, created());
        let value = serde_json::to_value(&def).expect("serialize");
        assert_eq!(value["recurrencePattern"], "yearly");
        assert_eq!(value["recurrenceDays"], serde_json::json!([1225]));
        let back: RecurringTask = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, def);
    }

    #[test]
    fn describes_patterns_for_people() {
        let weekly = Recurrence::from_parts(RecurrencePattern::Weekly, &[3, 1]).expect("days");
        assert_eq!(weekly.describe(), "Every Monday, Wednesday");
        let monthly = Recurrence::from_parts(RecurrencePattern::Monthly, &[1, 22]).expect("days");
        assert_eq!(monthly.describe(), "1st, 22nd of each month");
        let yearly = Recurrence::from_parts(RecurrencePattern::Yearly, &[1225]).expect("days");
        assert_eq!(yearly.describe(), "Every December 25");
    }
}
