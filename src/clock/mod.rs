// World clock view - one formatted line per configured timezone

use chrono::{DateTime, Offset, Utc};
use chrono_tz::Tz;
use std::fmt;

/// A formatted clock for one timezone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockLine {
    pub city: String,
    pub time: String,
    pub date: String,
    pub offset: String,
}

impl fmt::Display for ClockLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {:>11}  {:<16} {}",
            self.city, self.time, self.date, self.offset
        )
    }
}

/// World clock board
pub struct ClockBoard {
    zones: Vec<Tz>,
    twelve_hour: bool,
    show_seconds: bool,
    last_rendered: Option<String>,
}

impl ClockBoard {
    pub fn new(zones: Vec<Tz>, twelve_hour: bool, show_seconds: bool) -> Self {
        Self {
            zones,
            twelve_hour,
            show_seconds,
            last_rendered: None,
        }
    }

    pub fn zones(&self) -> &[Tz] {
        &self.zones
    }

    /// Format every clock at `now`
    pub fn lines(&self, now: DateTime<Utc>) -> Vec<ClockLine> {
        self.zones
            .iter()
            .map(|tz| {
                let local = now.with_timezone(tz);
                ClockLine {
                    city: city_name(tz),
                    time: local.format(self.time_format()).to_string(),
                    date: local.format("%a, %b %-d").to_string(),
                    offset: format_offset(local.offset().fix().local_minus_utc()),
                }
            })
            .collect()
    }

    /// Render the board as text
    pub fn render(&self, now: DateTime<Utc>) -> String {
        self.lines(now)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render only if the output differs from the previous refresh
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Option<String> {
        let rendered = self.render(now);
        if self.last_rendered.as_deref() == Some(rendered.as_str()) {
            return None;
        }
        self.last_rendered = Some(rendered.clone());
        Some(rendered)
    }

    fn time_format(&self) -> &'static str {
        match (self.twelve_hour, self.show_seconds) {
            (true, true) => "%-I:%M:%S %p",
            (true, false) => "%-I:%M %p",
            (false, true) => "%H:%M:%S",
            (false, false) => "%H:%M",
        }
    }
}

/// City part of an IANA name: `America/Mexico_City` -> `Mexico City`
pub fn city_name(tz: &Tz) -> String {
    let name = tz.name();
    name.rsplit('/').next().unwrap_or(name).replace('_', " ")
}

/// `UTC`, `UTC+9`, `UTC-3:30` style offset label
pub fn format_offset(offset_secs: i32) -> String {
    if offset_secs == 0 {
        return "UTC".to_string();
    }
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let total_minutes = offset_secs.unsigned_abs() / 60;
    let (hours, minutes) = (total_minutes / 60, total_minutes % 60);
    if minutes == 0 {
        format!("UTC{}{}", sign, hours)
    } else {
        format!("UTC{}{}:{:02}", sign, hours, minutes)
    }
}
