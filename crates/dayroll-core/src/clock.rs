use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::task::DayStart;

/// Maps wall-clock instants onto logical days that begin at a configured
/// time of day in a fixed timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundaryClock {
    tz: Tz,
}

impl DayBoundaryClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.tz)
    }

    /// The latest instant `<= now` at which the local clock read `day_start`.
    pub fn most_recent_boundary(&self, now: DateTime<Utc>, day_start: DayStart) -> DateTime<Utc> {
        let today = self.local(now).date_naive();
        let candidate = self.boundary_on(today, day_start);
        if now >= candidate {
            return candidate;
        }

        match today.pred_opt() {
            Some(yesterday) => self.boundary_on(yesterday, day_start),
            None => candidate - Duration::days(1),
        }
    }

    fn boundary_on(&self, date: NaiveDate, day_start: DayStart) -> DateTime<Utc> {
        let naive = date.and_time(day_start.time());
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(first, second) => first.min(second).with_timezone(&Utc),
            LocalResult::None => {
                // Clocks jumped over the day start; the day begins where they resume.
                let resumed = naive + Duration::hours(1);
                match self.tz.from_local_datetime(&resumed).earliest() {
                    Some(local) => local.with_timezone(&Utc),
                    None => {
                        warn!(%naive, tz = %self.tz, "day start unresolvable in timezone; using UTC");
                        Utc.from_utc_datetime(&naive)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn day_start(raw: &str) -> DayStart {
        raw.parse().expect("valid day start")
    }

    #[test]
    fn boundary_is_today_after_day_start() {
        let clock = DayBoundaryClock::new(chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 30, 0).unwrap();
        let boundary = clock.most_recent_boundary(now, day_start("05:00"));
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 2, 17, 5, 0, 0).unwrap());
    }

    #[test]
    fn boundary_is_yesterday_before_day_start() {
        let clock = DayBoundaryClock::new(chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 4, 59, 0).unwrap();
        let boundary = clock.most_recent_boundary(now, day_start("05:00"));
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 2, 28, 5, 0, 0).unwrap());
    }

    #[test]
    fn boundary_at_exact_day_start_is_now() {
        let clock = DayBoundaryClock::new(chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap();
        assert_eq!(clock.most_recent_boundary(now, day_start("05:00")), now);
    }

    #[test]
    fn boundary_never_exceeds_now_and_is_stable() {
        let clock = DayBoundaryClock::new(chrono_tz::Europe::Berlin);
        let start = Utc.with_ymd_and_hms(2026, 3, 27, 0, 0, 0).unwrap();
        for step in 0..(4 * 24 * 4) {
            let now = start + Duration::minutes(15 * step);
            for raw in ["00:00", "02:30", "05:00", "23:45"] {
                let first = clock.most_recent_boundary(now, day_start(raw));
                let second = clock.most_recent_boundary(now, day_start(raw));
                assert!(first <= now, "{first} > {now} for {raw}");
                assert!(now - first < Duration::hours(25), "{first} too far from {now}");
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn boundary_uses_local_wall_clock() {
        let clock = DayBoundaryClock::new(chrono_tz::America::Mexico_City);
        // 10:00 UTC is 04:00 in Mexico City (UTC-6): still yesterday's day.
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 10, 0, 0).unwrap();
        let boundary = clock.most_recent_boundary(now, day_start("05:00"));
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 2, 16, 11, 0, 0).unwrap());
    }

    #[test]
    fn day_start_inside_dst_gap_resolves_after_the_jump() {
        // Berlin skips 02:00-03:00 local on 2026-03-29.
        let clock = DayBoundaryClock::new(chrono_tz::Europe::Berlin);
        let now = Utc.with_ymd_and_hms(2026, 3, 29, 12, 0, 0).unwrap();
        let boundary = clock.most_recent_boundary(now, day_start("02:30"));
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 3, 29, 1, 30, 0).unwrap());
    }
}
