//! Cron trigger compilation.
//!
//! Dataset schedules are 7-field Quartz-style expressions
//! (`sec min hour dom month dow year?`, `?` permitted in the day fields).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A compiled cron expression plus its next pending fire time.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    schedule: Schedule,
    next_at: Option<DateTime<Utc>>,
}

impl CronTrigger {
    /// Compile `expression` and prime the first fire strictly after `now`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed expression.
    pub fn new(expression: &str, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| anyhow::anyhow!("invalid cron expression '{expression}': {e}"))?;
        let next_at = schedule.after(&now).next();
        Ok(Self { schedule, next_at })
    }

    /// The next pending fire time, if the schedule has one.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_at
    }

    /// Whether the trigger is due at `now`; a due trigger advances to its
    /// following occurrence so one tick fires at most once.
    pub fn fire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_at {
            Some(at) if at <= now => {
                self.next_at = self.schedule.after(&now).next();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn the_reference_expressions_parse() {
        let now = at(2024, 1, 15, 0, 0, 0);
        for expr in [
            "0 0 2 * * ?",
            "0 */15 * * * ?",
            "0 0 6 ? * MON-FRI",
            "0 0 0 1 * ?",
            "0/5 * * * * ?",
        ] {
            assert!(CronTrigger::new(expr, now).is_ok(), "should parse: {expr}");
        }
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        let now = at(2024, 1, 15, 0, 0, 0);
        assert!(CronTrigger::new("not cron", now).is_err());
        assert!(CronTrigger::new("99 99 99 * * ?", now).is_err());
    }

    #[test]
    fn nightly_schedule_fires_at_two() {
        let now = at(2024, 1, 15, 0, 0, 0);
        let trigger = CronTrigger::new("0 0 2 * * ?", now).unwrap();
        assert_eq!(trigger.next_fire(), Some(at(2024, 1, 15, 2, 0, 0)));
    }

    #[test]
    fn weekday_schedule_skips_the_weekend() {
        // 2024-01-13 is a Saturday.
        let now = at(2024, 1, 13, 0, 0, 0);
        let trigger = CronTrigger::new("0 0 6 ? * MON-FRI", now).unwrap();
        assert_eq!(trigger.next_fire(), Some(at(2024, 1, 15, 6, 0, 0)));
    }

    #[test]
    fn due_trigger_fires_once_then_advances() {
        let start = at(2024, 1, 15, 0, 0, 0);
        let mut trigger = CronTrigger::new("0/5 * * * * ?", start).unwrap();
        let first = trigger.next_fire().unwrap();

        assert!(!trigger.fire_if_due(start));
        assert!(trigger.fire_if_due(first));
        // Same instant again: already advanced, nothing due.
        assert!(!trigger.fire_if_due(first));
        assert!(trigger.next_fire().unwrap() > first);
    }

    #[test]
    fn never_firing_schedule_in_window_stays_pending() {
        let now = at(2024, 1, 15, 0, 0, 0);
        let mut trigger = CronTrigger::new("0 0 2 * * ?", now).unwrap();
        // Ten one-second ticks before 02:00: nothing fires.
        for tick in 0..10 {
            let t = at(2024, 1, 15, 0, 0, tick + 1);
            assert!(!trigger.fire_if_due(t));
        }
    }
}
