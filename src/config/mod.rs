// Configuration management

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::alarm::parse_timezone;
use crate::audio::SoundKind;
use crate::error::{ConfigError, ConfigResult};

/// Do-not-disturb mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DndMode {
    #[default]
    Off,
    /// Quiet from 22:00 until 07:00 local time
    Night,
}

impl DndMode {
    /// Whether alarms are suppressed at local `hour`
    pub fn is_quiet_hour(&self, hour: u32) -> bool {
        match self {
            DndMode::Off => false,
            DndMode::Night => hour >= 22 || hour < 7,
        }
    }

    /// Whether alarms are suppressed at `now`, judged in `zone` or the
    /// system local zone
    pub fn is_quiet(&self, now: DateTime<Utc>, zone: Option<Tz>) -> bool {
        if *self == DndMode::Off {
            return false;
        }
        let hour = match zone {
            Some(tz) => now.with_timezone(&tz).hour(),
            None => now.with_timezone(&Local).hour(),
        };
        self.is_quiet_hour(hour)
    }
}

/// Clock display format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HourFormat {
    /// 24 hour unless the locale says otherwise
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "12")]
    H12,
    #[serde(rename = "24")]
    H24,
}

impl HourFormat {
    /// Whether times are shown with AM/PM
    pub fn is_12h(&self) -> bool {
        match self {
            HourFormat::H12 => true,
            HourFormat::H24 => false,
            HourFormat::Auto => std::env::var("LC_TIME")
                .or_else(|_| std::env::var("LANG"))
                .map(|lang| lang.starts_with("en_US"))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sound played when an alarm rings
    pub alarm_sound: SoundKind,

    /// Vibrate on trigger and on every repeat
    pub vibration_enabled: bool,

    /// Show a desktop notification on trigger
    pub notifications_enabled: bool,

    /// Do-not-disturb mode
    pub dnd_mode: DndMode,

    /// IANA timezone used for DND and as the first clock; system local if unset
    pub home_timezone: Option<String>,

    /// World clocks shown by the clock view
    pub clocks: Vec<String>,

    /// Show seconds in the clock view
    pub show_seconds: bool,

    /// Clock format: "auto", "12" or "24"
    pub hour_format: HourFormat,

    /// Synchronize with a network time API
    pub sync_enabled: bool,

    /// Time API endpoint
    pub sync_url: String,

    /// Sync interval in seconds
    pub sync_interval_secs: u64,

    /// Sync request timeout in seconds
    pub sync_timeout_secs: u64,

    /// Alarm evaluation interval in milliseconds
    pub tick_interval_ms: u64,

    /// Window after a firing during which the same alarm is not fired again
    pub dedup_window_secs: u64,

    /// Interval between repeated alarm sounds in milliseconds
    pub repeat_interval_ms: u64,

    /// Delay between a stop and accepting audio again, in milliseconds
    pub settle_delay_ms: u64,

    /// Where alarms are stored; defaults to the user data directory
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alarm_sound: SoundKind::Digital,
            vibration_enabled: true,
            notifications_enabled: true,
            dnd_mode: DndMode::Off,
            home_timezone: None,
            clocks: vec![
                "America/New_York".to_string(),
                "Europe/London".to_string(),
                "Asia/Tokyo".to_string(),
            ],
            show_seconds: true,
            hour_format: HourFormat::Auto,
            sync_enabled: true,
            sync_url: "https://worldtimeapi.org/api/ip".to_string(),
            sync_interval_secs: 60,
            sync_timeout_secs: 5,
            tick_interval_ms: 1000,
            dedup_window_secs: 60,
            repeat_interval_ms: 2000,
            settle_delay_ms: 1000,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
            config
        } else {
            info!(path = %path.display(), "No config file, writing defaults");
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;

        Ok(config_dir.join("world-alarm").join("config.toml"))
    }

    /// Directory holding the alarm file
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("world-alarm"))
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        let intervals = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("repeat_interval_ms", self.repeat_interval_ms),
            ("sync_interval_secs", self.sync_interval_secs),
            ("sync_timeout_secs", self.sync_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", name)));
            }
        }

        if let Some(zone) = &self.home_timezone {
            parse_timezone(zone).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        for zone in &self.clocks {
            parse_timezone(zone).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        Ok(())
    }

    /// Home timezone, if configured and valid
    pub fn home_zone(&self) -> Option<Tz> {
        let name = self.home_timezone.as_deref()?;
        match parse_timezone(name) {
            Ok(tz) => Some(tz),
            Err(e) => {
                warn!(error = %e, "Ignoring home timezone");
                None
            }
        }
    }

    /// Clock zones in display order, home first; invalid names are skipped
    pub fn clock_zones(&self) -> Vec<Tz> {
        let mut zones: Vec<Tz> = self.home_zone().into_iter().collect();
        for name in &self.clocks {
            match parse_timezone(name) {
                Ok(tz) if !zones.contains(&tz) => zones.push(tz),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping clock"),
            }
        }
        zones
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}
