//! Alarm definitions
//!
//! An alarm is a wall-clock time in a specific IANA timezone plus a repeat
//! rule. The types here are plain data; evaluation happens in
//! [`crate::scheduler`] and ringing in [`crate::ringer`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AlarmParseError;

/// Opaque alarm identifier, immutable after creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(String);

impl AlarmId {
    /// Generate a fresh id: base-36 millisecond timestamp plus a random suffix
    pub fn generate(now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        let suffix: u64 = rand::thread_rng().gen_range(0..36u64.pow(8));
        Self(format!("{}{}", to_base36(millis), to_base36(suffix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Target wall-clock time, minute granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmTime {
    hour: u32,
    minute: u32,
}

impl AlarmTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, AlarmParseError> {
        if hour > 23 || minute > 59 {
            return Err(AlarmParseError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Whether a local hour/minute pair hits this target
    pub fn matches(&self, hour: u32, minute: u32) -> bool {
        self.hour == hour && self.minute == minute
    }
}

impl FromStr for AlarmTime {
    type Err = AlarmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AlarmParseError::InvalidTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour = h.parse::<u32>().map_err(|_| invalid())?;
        let minute = m.parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for AlarmTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlarmTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which days an alarm is allowed to fire on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    /// Fires once, then is disabled and removed when stopped
    #[default]
    Once,
    Daily,
    /// Monday through Friday in the alarm's timezone
    Weekdays,
    /// Saturday and Sunday in the alarm's timezone
    Weekends,
}

impl Repeat {
    /// Whether the repeat rule permits firing on the given local weekday
    pub fn allows(&self, day: Weekday) -> bool {
        let weekend = matches!(day, Weekday::Sat | Weekday::Sun);
        match self {
            Repeat::Once | Repeat::Daily => true,
            Repeat::Weekdays => !weekend,
            Repeat::Weekends => weekend,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Repeat::Once => "Once",
            Repeat::Daily => "Daily",
            Repeat::Weekdays => "Weekdays",
            Repeat::Weekends => "Weekends",
        }
    }
}

impl FromStr for Repeat {
    type Err = AlarmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Repeat::Once),
            "daily" => Ok(Repeat::Daily),
            "weekdays" => Ok(Repeat::Weekdays),
            "weekends" => Ok(Repeat::Weekends),
            other => Err(AlarmParseError::UnknownRepeat(other.to_string())),
        }
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A user-defined alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub name: String,
    pub time: AlarmTime,
    pub timezone: Tz,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Alarm {
    /// Create a new enabled alarm with a freshly generated id
    pub fn new(
        name: &str,
        time: AlarmTime,
        timezone: Tz,
        repeat: Repeat,
        now: DateTime<Utc>,
    ) -> Result<Self, AlarmParseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AlarmParseError::EmptyName);
        }
        Ok(Self {
            id: AlarmId::generate(now),
            name: name.to_string(),
            time,
            timezone,
            repeat,
            enabled: true,
            last_triggered: None,
            created_at: now,
        })
    }

    /// Notification tag used so repeat firings replace instead of stacking
    pub fn notification_tag(&self) -> String {
        format!("alarm-{}", self.id)
    }

    /// Local weekday of `now` in the alarm's timezone
    pub fn local_weekday(&self, now: DateTime<Utc>) -> Weekday {
        now.with_timezone(&self.timezone).weekday()
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, AlarmParseError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| AlarmParseError::UnknownTimezone(name.to_string()))
}
