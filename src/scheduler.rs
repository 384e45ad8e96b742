//! Alarm evaluation
//!
//! [`AlarmScheduler::tick`] runs once per tick interval. It converts "now"
//! into each alarm's own timezone and compares the local hour and minute with
//! the alarm time. There is no catch-up: a tick that never lands in the
//! target minute means the alarm does not fire that day.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Days, Duration, TimeZone, Timelike, Utc};
use tracing::{debug, trace};

use crate::alarm::{Alarm, AlarmId};
use crate::ringer::AlarmRinger;
use crate::store::AlarmBook;

/// Default de-duplication window
pub const DEFAULT_DEDUP_WINDOW: StdDuration = StdDuration::from_secs(60);

/// Decides once per tick which alarms are due
#[derive(Debug, Clone)]
pub struct AlarmScheduler {
    dedup_window: Duration,
    tick_interval: StdDuration,
}

impl AlarmScheduler {
    /// Create a scheduler
    ///
    /// The de-duplication window is raised to the tick interval if it is
    /// shorter, so two consecutive ticks in the same minute cannot both fire.
    pub fn new(tick_interval: StdDuration, dedup_window: StdDuration) -> Self {
        let window = dedup_window.max(tick_interval);
        if window != dedup_window {
            debug!(
                requested_ms = dedup_window.as_millis() as u64,
                tick_ms = tick_interval.as_millis() as u64,
                "De-duplication window raised to the tick interval"
            );
        }
        Self {
            dedup_window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
            tick_interval,
        }
    }

    pub fn tick_interval(&self) -> StdDuration {
        self.tick_interval
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    /// Whether `alarm` must fire at `now`
    pub fn is_due(&self, alarm: &Alarm, now: DateTime<Utc>) -> bool {
        if !alarm.enabled {
            return false;
        }

        let local = now.with_timezone(&alarm.timezone);
        if !alarm.time.matches(local.hour(), local.minute()) {
            return false;
        }

        if let Some(last) = alarm.last_triggered {
            if now - last < self.dedup_window {
                trace!(alarm_id = %alarm.id, "Already fired in this window");
                return false;
            }
        }

        alarm.repeat.allows(local.weekday())
    }

    /// Ids of every alarm due at `now`, in book order
    pub fn due_alarms(&self, now: DateTime<Utc>, alarms: &[Alarm]) -> Vec<AlarmId> {
        alarms
            .iter()
            .filter(|alarm| self.is_due(alarm, now))
            .map(|alarm| alarm.id.clone())
            .collect()
    }

    /// Evaluate every alarm and trigger the due ones
    ///
    /// Returns how many triggers the ringer accepted.
    pub fn tick(&self, now: DateTime<Utc>, book: &mut AlarmBook, ringer: &mut AlarmRinger) -> usize {
        let mut fired = 0;
        for id in self.due_alarms(now, book.alarms()) {
            let Some(alarm) = book.get(&id).cloned() else {
                continue;
            };
            debug!(alarm_id = %id, name = %alarm.name, "Alarm due");
            if ringer.trigger(alarm, book, now) {
                fired += 1;
            }
        }
        fired
    }
}

impl Default for AlarmScheduler {
    fn default() -> Self {
        Self::new(StdDuration::from_secs(1), DEFAULT_DEDUP_WINDOW)
    }
}

/// Next instant strictly after `now` at which `alarm` would fire
///
/// Local times that do not exist because of a DST gap are skipped; for
/// ambiguous local times the earlier instant is used. Disabled alarms have no
/// next occurrence.
pub fn next_occurrence(alarm: &Alarm, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !alarm.enabled {
        return None;
    }

    let tz = alarm.timezone;
    let today = now.with_timezone(&tz).date_naive();

    // A week plus one day covers every repeat rule
    (0..=7u64).find_map(|offset| {
        let date = today.checked_add_days(Days::new(offset))?;
        if !alarm.repeat.allows(date.weekday()) {
            return None;
        }
        let naive = date.and_hms_opt(alarm.time.hour(), alarm.time.minute(), 0)?;
        let at = tz.from_local_datetime(&naive).earliest()?.with_timezone(&Utc);
        (at > now).then_some(at)
    })
}
