//! World Alarm Library
//!
//! World clocks plus alarms that fire at a wall-clock time in any IANA
//! timezone. The core is the alarm state machine: the scheduler decides once
//! per tick which alarms are due, the ringer sounds them through the audio
//! engine, and a stop tears everything down before audio is allowed again.

pub mod alarm;
pub mod audio;
pub mod clock;
pub mod command;
pub mod config;
pub mod config_watcher;
pub mod error;
pub mod feedback;
pub mod ringer;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod time;

// Re-export commonly used types
pub use alarm::{Alarm, AlarmId, AlarmTime, Repeat};
pub use audio::{AudioEngine, ContextState, SoundKind, StopReport};
pub use clock::ClockBoard;
pub use config::{Config, DndMode, HourFormat};
pub use config_watcher::{ConfigReloadEvent, ConfigWatcher};
pub use error::{AlarmParseError, AppError, ConfigError, StoreError, SyncError};
pub use ringer::{AlarmRinger, FeedbackSettings, RingerPhase};
pub use runtime::Runtime;
pub use scheduler::{next_occurrence, AlarmScheduler};
pub use store::{AlarmBook, AlarmStore, MemoryStore, TomlAlarmStore};
pub use time::TimeSource;
