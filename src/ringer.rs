//! Alarm ringing state machine
//!
//! ```text
//!          trigger                stop               settle
//!   Idle ----------> Ringing ------------> Stopping ---------> Idle
//!                      ^  |                   |
//!                      |  | trigger           | trigger (loop armed,
//!                      +--+ (replaces)        |  first shot held back)
//!                                             +---- settle ---> Ringing
//! ```
//!
//! The ringer owns the [`AudioEngine`] and the feedback channels. It is the
//! only writer of the engine's stopping guard: [`AlarmRinger::stop`] raises
//! it and [`AlarmRinger::settle`] lowers it.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::alarm::{Alarm, Repeat};
use crate::audio::{AudioEngine, LoopHandle, SoundKind, StopReport};
use crate::config::{Config, DndMode};
use crate::feedback::{self, Notification, Notifier, Vibrator, ALARM_VIBRATION};
use crate::store::AlarmBook;

/// Freedesktop icon name used for alarm notifications
pub const NOTIFICATION_ICON: &str = "alarm-clock";

/// Phase of the ringer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingerPhase {
    Idle,
    Ringing,
    /// A stop happened and audio is blocked until the ringer settles
    Stopping,
}

/// User preferences that shape how an alarm is delivered
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSettings {
    pub sound: SoundKind,
    pub vibration: bool,
    pub notifications: bool,
    pub dnd: DndMode,
    /// Zone for the DND check; system local when `None`
    pub home_zone: Option<Tz>,
}

impl FeedbackSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sound: config.alarm_sound,
            vibration: config.vibration_enabled,
            notifications: config.notifications_enabled,
            dnd: config.dnd_mode,
            home_zone: config.home_zone(),
        }
    }
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct AlarmRinger {
    engine: AudioEngine,
    notifier: Box<dyn Notifier>,
    vibrator: Box<dyn Vibrator>,
    settings: FeedbackSettings,
    phase: RingerPhase,
    current: Option<Alarm>,
}

impl AlarmRinger {
    pub fn new(
        engine: AudioEngine,
        notifier: Box<dyn Notifier>,
        vibrator: Box<dyn Vibrator>,
        settings: FeedbackSettings,
    ) -> Self {
        Self {
            engine,
            notifier,
            vibrator,
            settings,
            phase: RingerPhase::Idle,
            current: None,
        }
    }

    pub fn phase(&self) -> RingerPhase {
        self.phase
    }

    pub fn current_alarm(&self) -> Option<&Alarm> {
        self.current.as_ref()
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// Handle of the repeat loop the event loop should be ticking
    pub fn loop_handle(&self) -> Option<LoopHandle> {
        self.engine.loop_handle()
    }

    /// Replace feedback settings; an alarm already ringing keeps its sound
    pub fn apply_settings(&mut self, settings: FeedbackSettings) {
        if settings != self.settings {
            info!(
                sound = %settings.sound,
                vibration = settings.vibration,
                notifications = settings.notifications,
                dnd = ?settings.dnd,
                "Alarm feedback settings updated"
            );
            self.settings = settings;
        }
    }

    /// Start ringing `alarm`
    ///
    /// Returns `false` without side effects when do-not-disturb is active.
    /// The alarm record is stamped and written through to `book`; a
    /// one-time alarm is disabled but kept until the user stops it.
    pub fn trigger(&mut self, mut alarm: Alarm, book: &mut AlarmBook, now: DateTime<Utc>) -> bool {
        if self.settings.dnd.is_quiet(now, self.settings.home_zone) {
            debug!(alarm_id = %alarm.id, "Do not disturb active, alarm suppressed");
            return false;
        }

        if let Some(previous) = self.current.take() {
            if previous.id != alarm.id && previous.repeat == Repeat::Once {
                // No stop will reach the superseded one-time alarm
                info!(alarm_id = %previous.id, "One-time alarm superseded, removing");
                book.remove(&previous.id);
            }
        }

        alarm.last_triggered = Some(now);
        if alarm.repeat == Repeat::Once {
            alarm.enabled = false;
        }
        book.upsert(alarm.clone());

        info!(alarm_id = %alarm.id, name = %alarm.name, repeat = %alarm.repeat, "Alarm triggered");

        if self.settings.sound != SoundKind::None {
            self.engine.start_loop(self.settings.sound);
        } else if !self.engine.cancel_loop().is_noop() {
            // Sound was switched off while an earlier alarm rang
            debug!(alarm_id = %alarm.id, "Earlier alarm sound cancelled");
        }

        if self.settings.vibration {
            self.vibrator.vibrate(&ALARM_VIBRATION);
        }

        if self.settings.notifications {
            let notification = Notification {
                title: format!("⏰ {}", alarm.name),
                body: format!("Time for: {}", alarm.name),
                tag: alarm.notification_tag(),
                icon: NOTIFICATION_ICON.to_string(),
                require_interaction: true,
            };
            feedback::deliver(self.notifier.as_mut(), &notification);
        }

        self.current = Some(alarm);
        if self.phase != RingerPhase::Stopping {
            self.phase = RingerPhase::Ringing;
        }
        true
    }

    /// One repetition of the alarm sound
    ///
    /// Vibrates along with the shot when it actually played.
    pub fn loop_tick(&mut self, handle: LoopHandle) -> bool {
        let played = self.engine.loop_tick(handle);
        if played && self.settings.vibration {
            self.vibrator.vibrate(&ALARM_VIBRATION);
        }
        played
    }

    /// Stop everything that is ringing
    ///
    /// Safe to call at any time; with nothing active it changes nothing. A
    /// one-time alarm is deleted from the book, a repeating one stays.
    pub fn stop(&mut self, book: &mut AlarmBook) -> StopReport {
        let nothing_active = self.current.is_none()
            && self.engine.active_voice_count() == 0
            && self.engine.loop_handle().is_none();
        if nothing_active {
            debug!(phase = ?self.phase, "Stop requested with nothing ringing");
            return StopReport::default();
        }

        let report = self.engine.stop_all();
        self.vibrator.cancel();

        if let Some(alarm) = self.current.take() {
            if alarm.repeat == Repeat::Once {
                book.remove(&alarm.id);
                info!(alarm_id = %alarm.id, "One-time alarm stopped and removed");
            } else {
                info!(alarm_id = %alarm.id, "Alarm stopped");
            }
        }

        self.phase = RingerPhase::Stopping;
        debug!(
            released = report.released,
            stuck = report.stuck,
            failures = report.failures.len(),
            "Stop sequence finished"
        );
        report
    }

    /// Silence everything without dismissing the alarm
    ///
    /// Used on shutdown. A ringing one-time alarm keeps the record the
    /// trigger left behind, disabled but present.
    pub fn silence(&mut self) -> StopReport {
        let report = self.engine.stop_all();
        self.vibrator.cancel();
        if let Some(alarm) = self.current.take() {
            info!(alarm_id = %alarm.id, "Alarm silenced, record kept");
        }
        self.engine.finish_stop();
        self.phase = RingerPhase::Idle;
        report
    }

    /// Leave the stopping phase
    ///
    /// Called once the settle delay after a stop has passed. The audio
    /// context stays suspended until something plays again.
    pub fn settle(&mut self) {
        self.engine.finish_stop();
        self.phase = if self.current.is_some() {
            RingerPhase::Ringing
        } else {
            RingerPhase::Idle
        };
        debug!(phase = ?self.phase, "Ringer settled");
    }

    /// Any user input: a chance to resume audio the platform suspended
    pub fn on_user_interaction(&mut self) {
        self.engine.on_user_interaction();
    }
}

impl std::fmt::Debug for AlarmRinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmRinger")
            .field("phase", &self.phase)
            .field("current", &self.current.as_ref().map(|a| &a.id))
            .field("engine", &self.engine)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
