// Event loop driving the alarm daemon
//
// Everything runs on one calloop loop: the clock refresh and alarm tick
// timers, the sound repeat timer (registered only while a loop is armed),
// the one-shot settle timer after a stop, stdin commands, time sync status
// and config reloads. Callbacks never overlap, so the state needs no locks.

use anyhow::{Context, Result};
use calloop::channel::{self, Channel};
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal, RegistrationToken};
use std::fmt::Write as _;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alarm::Alarm;
use crate::audio::{AudioEngine, LoopHandle as SoundLoop};
use crate::clock::ClockBoard;
use crate::command::{Command, HELP};
use crate::config::Config;
use crate::config_watcher::ConfigWatcher;
use crate::feedback::{DesktopNotifier, LogVibrator};
use crate::ringer::{AlarmRinger, FeedbackSettings, RingerPhase};
use crate::scheduler::{next_occurrence, AlarmScheduler};
use crate::store::{AlarmBook, TomlAlarmStore};
use crate::time::{SyncStatus, TimeSource, TimeSyncService};

/// Clock refresh cadence
const CLOCK_REFRESH: Duration = Duration::from_secs(1);

/// State shared by every event loop callback
pub struct AppState {
    pub book: AlarmBook,
    pub ringer: AlarmRinger,
    pub scheduler: AlarmScheduler,
    pub time: TimeSource,
    clocks: Option<ClockBoard>,
    repeat_interval: Duration,
    settle_delay: Duration,
    repeat_timer: Option<(SoundLoop, RegistrationToken)>,
    settle_timer: Option<RegistrationToken>,
    handle: LoopHandle<'static, AppState>,
    signal: LoopSignal,
}

impl AppState {
    /// Run one alarm evaluation at the current adjusted time
    pub fn tick(&mut self) -> usize {
        let now = self.time.now();
        let fired = self.scheduler.tick(now, &mut self.book, &mut self.ringer);
        if fired > 0 {
            self.sync_repeat_timer();
        }
        fired
    }

    /// Handle one line of user input and return the reply
    pub fn handle_line(&mut self, line: &str) -> String {
        self.ringer.on_user_interaction();

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => return format!("{}\n{}", e, HELP),
        };
        match command {
            Command::Nothing => String::new(),
            Command::Help => HELP.to_string(),
            Command::Stop => self.stop(),
            Command::List => self.list(),
            Command::Add {
                time,
                timezone,
                repeat,
                name,
            } => match Alarm::new(&name, time, timezone, repeat, self.time.now()) {
                Ok(alarm) => {
                    let reply = format!("added {} {} {} {} ({})", alarm.id, alarm.time, alarm.timezone, alarm.name, alarm.repeat);
                    tracing::info!(alarm_id = %alarm.id, name = %alarm.name, "Alarm added");
                    self.book.upsert(alarm);
                    reply
                }
                Err(e) => e.to_string(),
            },
            Command::Remove(id) => match self.book.remove(&id) {
                Some(alarm) => {
                    tracing::info!(alarm_id = %id, "Alarm removed");
                    format!("removed {} {}", alarm.id, alarm.name)
                }
                None => format!("no alarm with id {}", id),
            },
        }
    }

    /// User stop: run the stop sequence and arm the settle timer
    pub fn stop(&mut self) -> String {
        let report = self.ringer.stop(&mut self.book);
        self.sync_repeat_timer();
        if self.ringer.phase() == RingerPhase::Stopping {
            self.arm_settle_timer();
        }

        if report.is_noop() {
            "nothing ringing".to_string()
        } else if report.stuck > 0 {
            format!("stopped ({} voices could not be released)", report.stuck)
        } else {
            "stopped".to_string()
        }
    }

    fn list(&self) -> String {
        if self.book.is_empty() {
            return "no alarms".to_string();
        }
        let now = self.time.now();
        let mut out = String::new();
        for alarm in self.book.alarms() {
            let next = next_occurrence(alarm, now)
                .map(|at| at.with_timezone(&alarm.timezone).format("%a %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{}  {}  {:<24} {:<9} {:<4} next: {:<10} {}",
                alarm.id,
                alarm.time,
                alarm.timezone.name(),
                alarm.repeat,
                if alarm.enabled { "on" } else { "off" },
                next,
                alarm.name
            );
        }
        out.trim_end().to_string()
    }

    /// Match the repeat timer to the loop the engine has armed
    fn sync_repeat_timer(&mut self) {
        let wanted = self.ringer.loop_handle();
        if self.repeat_timer.map(|(armed, _)| armed) == wanted {
            return;
        }

        if let Some((_, token)) = self.repeat_timer.take() {
            self.handle.remove(token);
        }

        let Some(sound_loop) = wanted else {
            return;
        };
        let interval = self.repeat_interval;
        let timer = Timer::from_duration(interval);
        match self.handle.insert_source(timer, move |_deadline, _, state| {
            if state.ringer.loop_handle() != Some(sound_loop) {
                if state.repeat_timer.map(|(armed, _)| armed) == Some(sound_loop) {
                    state.repeat_timer = None;
                }
                return TimeoutAction::Drop;
            }
            state.ringer.loop_tick(sound_loop);
            TimeoutAction::ToDuration(interval)
        }) {
            Ok(token) => {
                tracing::debug!(loop_id = sound_loop.id(), "Repeat timer armed");
                self.repeat_timer = Some((sound_loop, token));
            }
            Err(e) => tracing::error!(error = ?e, "Failed to insert repeat timer"),
        }
    }

    fn arm_settle_timer(&mut self) {
        if let Some(token) = self.settle_timer.take() {
            self.handle.remove(token);
        }
        let timer = Timer::from_duration(self.settle_delay);
        match self.handle.insert_source(timer, |_deadline, _, state| {
            state.settle_timer = None;
            state.ringer.settle();
            state.sync_repeat_timer();
            TimeoutAction::Drop
        }) {
            Ok(token) => self.settle_timer = Some(token),
            Err(e) => {
                // Never leave the guard up
                tracing::error!(error = ?e, "Failed to insert settle timer, settling now");
                self.ringer.settle();
            }
        }
    }

    /// Re-read the config file and apply what can change without a restart
    pub fn reload_config(&mut self, path: &Path) {
        match Config::load_from(path) {
            Ok(config) => {
                self.ringer.apply_settings(FeedbackSettings::from_config(&config));
                if let Some(board) = self.clocks.as_mut() {
                    *board = ClockBoard::new(
                        config.clock_zones(),
                        config.hour_format.is_12h(),
                        config.show_seconds,
                    );
                }
                tracing::info!("Configuration reloaded");
            }
            Err(e) => tracing::warn!(error = %e, "Config reload failed, keeping previous settings"),
        }
    }

    /// Pick up alarms another process wrote to the alarm file
    pub fn reload_alarms(&mut self) -> bool {
        self.book.reload()
    }

    fn refresh_clocks(&mut self) {
        let now = self.time.now();
        if let Some(text) = self.clocks.as_mut().and_then(|board| board.refresh(now)) {
            println!("{}\n", text);
        }
    }

    /// Silence the ringer and ask the loop to exit
    ///
    /// Unlike a user stop, nothing is dismissed: a ringing one-time alarm
    /// stays in the book.
    pub fn shutdown(&mut self) {
        self.ringer.silence();
        self.sync_repeat_timer();
        if let Some(token) = self.settle_timer.take() {
            self.handle.remove(token);
        }
        self.signal.stop();
    }
}

/// The alarm daemon: an event loop plus its state
pub struct Runtime {
    event_loop: EventLoop<'static, AppState>,
    state: AppState,
    config: Config,
    config_path: Option<PathBuf>,
    alarms_path: Option<PathBuf>,
    watchers: Vec<ConfigWatcher>,
}

impl Runtime {
    /// Build the daemon from configuration with the default backends
    pub fn from_config(config: Config, config_path: Option<PathBuf>, show_clocks: bool) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let alarms_path = TomlAlarmStore::default_path(&data_dir);
        let store = TomlAlarmStore::open(&alarms_path).context("Failed to open alarm store")?;
        let book = AlarmBook::load(Box::new(store));

        let ringer = AlarmRinger::new(
            AudioEngine::with_default_backend(),
            Box::new(DesktopNotifier::new("World Alarm")),
            Box::new(LogVibrator),
            FeedbackSettings::from_config(&config),
        );

        let mut runtime = Self::with_parts(config, book, ringer, TimeSource::new(), show_clocks)?;
        runtime.config_path = config_path;
        runtime.alarms_path = Some(alarms_path);
        Ok(runtime)
    }

    /// Build the daemon around explicit parts
    pub fn with_parts(
        config: Config,
        book: AlarmBook,
        ringer: AlarmRinger,
        time: TimeSource,
        show_clocks: bool,
    ) -> Result<Self> {
        config.validate()?;
        let event_loop: EventLoop<'static, AppState> =
            EventLoop::try_new().context("Failed to create event loop")?;

        let clocks = show_clocks.then(|| {
            ClockBoard::new(
                config.clock_zones(),
                config.hour_format.is_12h(),
                config.show_seconds,
            )
        });

        let state = AppState {
            book,
            ringer,
            scheduler: AlarmScheduler::new(config.tick_interval(), config.dedup_window()),
            time,
            clocks,
            repeat_interval: config.repeat_interval(),
            settle_delay: config.settle_delay(),
            repeat_timer: None,
            settle_timer: None,
            handle: event_loop.handle(),
            signal: event_loop.get_signal(),
        };

        Ok(Self {
            event_loop,
            state,
            config,
            config_path: None,
            alarms_path: None,
            watchers: Vec::new(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    /// Process pending events, waiting at most `timeout`
    pub fn dispatch(&mut self, timeout: Duration) -> Result<()> {
        self.event_loop
            .dispatch(Some(timeout), &mut self.state)
            .context("Event loop dispatch failed")
    }

    /// Register the periodic timers
    pub fn install_timers(&mut self) -> Result<()> {
        let handle = self.event_loop.handle();

        let tick_interval = self.state.scheduler.tick_interval();
        handle
            .insert_source(Timer::immediate(), move |_deadline, _, state| {
                state.tick();
                TimeoutAction::ToDuration(tick_interval)
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert alarm timer: {:?}", e))?;

        if self.state.clocks.is_some() {
            handle
                .insert_source(Timer::immediate(), |_deadline, _, state| {
                    state.refresh_clocks();
                    TimeoutAction::ToDuration(CLOCK_REFRESH)
                })
                .map_err(|e| anyhow::anyhow!("Failed to insert clock timer: {:?}", e))?;
        }
        Ok(())
    }

    /// Feed lines from `channel` to the command handler
    pub fn install_commands(&mut self, commands: Channel<String>) -> Result<()> {
        self.event_loop
            .handle()
            .insert_source(commands, |event, _, state| match event {
                channel::Event::Msg(line) => {
                    let reply = state.handle_line(&line);
                    if !reply.is_empty() {
                        println!("{}", reply);
                    }
                }
                channel::Event::Closed => tracing::debug!("Command input closed"),
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert command channel: {:?}", e))?;
        Ok(())
    }

    fn install_time_sync(&mut self) -> Result<()> {
        if !self.config.sync_enabled {
            tracing::info!("Time sync disabled");
            return Ok(());
        }

        let service = TimeSyncService::new();
        service.start(
            self.state.time.clone(),
            self.config.sync_url.clone(),
            self.config.sync_interval(),
            self.config.sync_timeout(),
        );
        let TimeSyncService { channel, .. } = service;

        self.event_loop
            .handle()
            .insert_source(channel, |event, _, _state| match event {
                channel::Event::Msg(status) => match status {
                    SyncStatus::Offline => tracing::debug!("Time sync status: offline"),
                    other => tracing::debug!(status = other.label(), "Time sync status"),
                },
                channel::Event::Closed => tracing::warn!("Time sync thread exited"),
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert time sync channel: {:?}", e))?;
        Ok(())
    }

    /// Reload feedback settings whenever `path` changes
    pub fn install_config_watcher(&mut self, path: PathBuf) -> Result<()> {
        let (watcher, reloads) = ConfigWatcher::new(path)?;
        self.event_loop
            .handle()
            .insert_source(reloads, |event, _, state| {
                if let channel::Event::Msg(reload) = event {
                    state.reload_config(&reload.path);
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert config watcher: {:?}", e))?;
        self.watchers.push(watcher);
        Ok(())
    }

    /// Reload the alarm book whenever the alarm file at `path` changes
    ///
    /// Every write is reported, so alarms added or removed by another
    /// process are in the book before the next tick that could fire them.
    pub fn install_alarm_watcher(&mut self, path: PathBuf) -> Result<()> {
        let (watcher, reloads) = ConfigWatcher::with_debounce(path, Duration::ZERO)?;
        self.event_loop
            .handle()
            .insert_source(reloads, |event, _, state| {
                if let channel::Event::Msg(_) = event {
                    state.reload_alarms();
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert alarm file watcher: {:?}", e))?;
        self.watchers.push(watcher);
        Ok(())
    }

    fn install_file_watchers(&mut self) {
        if let Some(path) = self.config_path.clone() {
            if let Err(e) = self.install_config_watcher(path) {
                tracing::warn!(error = %e, "Config hot-reload disabled");
            }
        }
        if let Some(path) = self.alarms_path.clone() {
            if let Err(e) = self.install_alarm_watcher(path) {
                tracing::warn!(error = %e, "Alarm file watching disabled, CLI changes need a restart");
            }
        }
    }

    fn install_signals(&mut self) -> Result<()> {
        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .context("Failed to create signal handler for graceful shutdown")?;
        self.event_loop
            .handle()
            .insert_source(signals, |event, _, state| {
                tracing::info!(signal = ?event.signal(), "Received signal, exiting gracefully");
                state.shutdown();
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert signal handler: {:?}", e))?;
        Ok(())
    }

    /// Install every source and run until a signal arrives
    pub fn run(mut self) -> Result<()> {
        self.install_signals()?;
        self.install_timers()?;
        self.install_time_sync()?;
        self.install_file_watchers();
        self.install_commands(spawn_stdin_reader())?;

        tracing::info!(alarms = self.state.book.len(), "Event loop starting");

        self.event_loop
            .run(None, &mut self.state, |_state| {})
            .context("Event loop failed")?;

        tracing::info!("Event loop stopped");
        Ok(())
    }
}

/// Read stdin on a thread and forward each line to the event loop
fn spawn_stdin_reader() -> Channel<String> {
    let (sender, channel) = channel::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    channel
}
