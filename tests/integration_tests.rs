//! Integration tests for World Alarm
//!
//! These tests verify that the components work together: the file-backed
//! store, configuration, the clock view and the calloop runtime driving the
//! ringer with real timers.

use chrono::{Duration as ChronoDuration, TimeZone, Timelike, Utc};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use world_alarm::audio::{AudioContext, AudioError, SilentContext, SilentProbe};
use world_alarm::feedback::{LogVibrator, NullNotifier};
use world_alarm::time::parse_server_time;
use world_alarm::{
    next_occurrence, Alarm, AlarmBook, AlarmRinger, AlarmStore, AlarmTime, AudioEngine,
    ClockBoard, Config, FeedbackSettings, MemoryStore, Repeat, RingerPhase, Runtime,
    TimeSource, TomlAlarmStore,
};

fn silent_ringer(settings: FeedbackSettings) -> (AlarmRinger, SilentProbe) {
    let ctx = SilentContext::new();
    let probe = ctx.probe();
    let mut slot = Some(ctx);
    let engine = AudioEngine::new(Box::new(move || {
        slot.take()
            .map(|c| Box::new(c) as Box<dyn AudioContext>)
            .ok_or(AudioError::ContextClosed)
    }));
    let ringer = AlarmRinger::new(engine, Box::new(NullNotifier), Box::new(LogVibrator), settings);
    (ringer, probe)
}

// Test that alarms written through the book survive a restart
#[test]
fn test_toml_store_book_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = TomlAlarmStore::default_path(dir.path());
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();

    let kept = Alarm::new(
        "Standup",
        AlarmTime::new(9, 30).unwrap(),
        chrono_tz::Europe::Berlin,
        Repeat::Weekdays,
        now,
    )
    .unwrap();
    let dropped = Alarm::new(
        "Dentist",
        AlarmTime::new(14, 0).unwrap(),
        chrono_tz::America::Chicago,
        Repeat::Once,
        now,
    )
    .unwrap();

    {
        let store = TomlAlarmStore::open(&path).unwrap();
        let mut book = AlarmBook::load(Box::new(store));
        book.upsert(kept.clone());
        book.upsert(dropped.clone());
        book.remove(&dropped.id);
    }

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("time = \"09:30\""));
    assert!(content.contains("Europe/Berlin"));
    assert!(content.contains("repeat = \"weekdays\""));

    let book = AlarmBook::load(Box::new(TomlAlarmStore::open(&path).unwrap()));
    assert_eq!(book.alarms(), &[kept]);
}

// A corrupt alarm file fails to open instead of being overwritten
#[test]
fn test_corrupt_alarm_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = TomlAlarmStore::default_path(dir.path());
    std::fs::write(&path, "[[alarms]]\nid = 3\n").unwrap();
    assert!(TomlAlarmStore::open(&path).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[[alarms]]\nid = 3\n");
}

// Test config round trip through a file
#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let config = Config {
        clocks: vec!["Asia/Kolkata".to_string(), "America/Sao_Paulo".to_string()],
        show_seconds: false,
        dedup_window_secs: 90,
        data_dir: Some(dir.path().join("data")),
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.data_dir().unwrap(), dir.path().join("data"));
}

#[test]
fn test_feedback_settings_follow_config() {
    let config: Config = toml::from_str(
        r#"
alarm_sound = "none"
vibration_enabled = false
dnd_mode = "night"
home_timezone = "Asia/Tokyo"
"#,
    )
    .unwrap();
    let settings = FeedbackSettings::from_config(&config);
    assert_eq!(settings.sound, world_alarm::SoundKind::None);
    assert!(!settings.vibration);
    assert!(settings.notifications);
    assert_eq!(settings.home_zone, Some(chrono_tz::Asia::Tokyo));
}

#[test]
fn test_clock_board_render() {
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
    let board = ClockBoard::new(
        vec![chrono_tz::America::Mexico_City, chrono_tz::Asia::Kolkata],
        false,
        false,
    );
    let text = board.render(now);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Mexico City"));
    assert!(lines[0].contains("06:00"));
    assert!(lines[0].ends_with("UTC-6"));
    assert!(lines[1].contains("17:30"));
    assert!(lines[1].ends_with("UTC+5:30"));
}

#[test]
fn test_sync_response_offset() {
    let body = serde_json::json!({
        "abbreviation": "CST",
        "datetime": "2024-03-04T07:00:01.500000-06:00",
        "timezone": "America/Mexico_City",
    });
    let server = parse_server_time(&body).unwrap();
    let local = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();
    assert_eq!((server - local).num_milliseconds(), 1500);

    let source = TimeSource::with_offset_ms((server - local).num_milliseconds());
    assert_eq!(source.adjust(local), server);
}

#[test]
fn test_next_occurrence_for_listing() {
    let now = Utc.with_ymd_and_hms(2024, 3, 8, 20, 0, 0).unwrap(); // Friday
    let alarm = Alarm::new(
        "Brunch",
        AlarmTime::new(11, 0).unwrap(),
        chrono_tz::Europe::Paris,
        Repeat::Weekends,
        now,
    )
    .unwrap();
    let next = next_occurrence(&alarm, now).unwrap();
    // Saturday 11:00 in Paris (UTC+1 in March)
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap());
}

/// Offset that puts the adjusted clock at the start of the next UTC hour
fn offset_to_next_hour() -> (i64, u32) {
    let real = Utc::now();
    let target = (real + ChronoDuration::hours(1))
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap();
    ((target - real).num_milliseconds(), target.hour())
}

fn dispatch_until(runtime: &mut Runtime, timeout: Duration, mut done: impl FnMut(&Runtime) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        runtime.dispatch(Duration::from_millis(10)).unwrap();
        if done(runtime) {
            return true;
        }
    }
    false
}

// Full loop: tick fires, repeat timer replays, stop, settle timer returns to idle
#[test]
fn test_runtime_ring_stop_settle() {
    let config = Config {
        sync_enabled: false,
        repeat_interval_ms: 20,
        settle_delay_ms: 30,
        ..Config::default()
    };

    let (offset_ms, hour) = offset_to_next_hour();
    let store = MemoryStore::new();
    let mut book = AlarmBook::load(Box::new(store.clone()));
    let alarm = Alarm::new(
        "Runtime",
        AlarmTime::new(hour, 0).unwrap(),
        chrono_tz::UTC,
        Repeat::Daily,
        Utc::now(),
    )
    .unwrap();
    book.upsert(alarm.clone());

    let (ringer, probe) = silent_ringer(FeedbackSettings::from_config(&config));
    let mut runtime = Runtime::with_parts(
        config,
        book,
        ringer,
        TimeSource::with_offset_ms(offset_ms),
        false,
    )
    .unwrap();

    assert_eq!(runtime.state_mut().tick(), 1);
    assert_eq!(runtime.state().ringer.phase(), RingerPhase::Ringing);
    assert_eq!(probe.voices_created(), 1);

    // The repeat timer keeps producing shots
    assert!(dispatch_until(&mut runtime, Duration::from_secs(2), |_| probe.voices_created() >= 3));

    let reply = runtime.state_mut().handle_line("stop");
    assert_eq!(reply, "stopped");
    assert_eq!(runtime.state().ringer.phase(), RingerPhase::Stopping);
    assert_eq!(runtime.state().ringer.engine().active_voice_count(), 0);
    let created_at_stop = probe.voices_created();

    assert!(dispatch_until(&mut runtime, Duration::from_secs(2), |rt| {
        rt.state().ringer.phase() == RingerPhase::Idle
    }));
    // No shot slipped through after the stop
    assert_eq!(probe.voices_created(), created_at_stop);
    assert_eq!(runtime.state().ringer.loop_handle(), None);

    let stored = store.get(&alarm.id).unwrap();
    assert!(stored.enabled);
    assert!(stored.last_triggered.is_some());
}

#[test]
fn test_runtime_commands() {
    let config = Config {
        sync_enabled: false,
        ..Config::default()
    };
    let store = MemoryStore::new();
    let book = AlarmBook::load(Box::new(store.clone()));
    let (ringer, _probe) = silent_ringer(FeedbackSettings::from_config(&config));
    let mut runtime =
        Runtime::with_parts(config, book, ringer, TimeSource::new(), false).unwrap();
    let state = runtime.state_mut();

    assert_eq!(state.handle_line("list"), "no alarms");
    assert_eq!(state.handle_line("stop"), "nothing ringing");

    let reply = state.handle_line("add 06:45 Asia/Tokyo weekdays Catch the train");
    assert!(reply.starts_with("added "), "{}", reply);
    assert_eq!(store.len(), 1);
    let id = store.get_all().unwrap()[0].id.clone();

    let listing = state.handle_line("list");
    assert!(listing.contains("Catch the train"));
    assert!(listing.contains("Asia/Tokyo"));

    assert!(state.handle_line("add 6am Asia/Tokyo daily x").contains("Invalid alarm time"));
    assert!(state.handle_line("snooze").contains("unknown command"));

    assert!(state.handle_line(&format!("remove {}", id)).starts_with("removed"));
    assert!(store.is_empty());
    assert!(state.handle_line("remove nope").contains("no alarm"));
}

// An alarm added from another process reaches the running daemon and
// survives the daemon's own writes
#[test]
fn test_runtime_sees_alarms_added_by_another_store() {
    let dir = TempDir::new().unwrap();
    let path = TomlAlarmStore::default_path(dir.path());
    let config = Config {
        sync_enabled: false,
        ..Config::default()
    };

    let book = AlarmBook::load(Box::new(TomlAlarmStore::open(&path).unwrap()));
    let (ringer, _probe) = silent_ringer(FeedbackSettings::from_config(&config));
    let mut runtime =
        Runtime::with_parts(config, book, ringer, TimeSource::new(), false).unwrap();
    runtime.install_alarm_watcher(path.clone()).unwrap();

    let reply = runtime
        .state_mut()
        .handle_line("add 05:00 Europe/Madrid daily From the daemon");
    assert!(reply.starts_with("added "), "{}", reply);

    let now = Utc::now();
    let from_cli = Alarm::new(
        "From the CLI",
        AlarmTime::new(6, 15).unwrap(),
        chrono_tz::Asia::Tokyo,
        Repeat::Once,
        now,
    )
    .unwrap();
    TomlAlarmStore::open(&path).unwrap().put(&from_cli).unwrap();

    let id = from_cli.id.clone();
    assert!(dispatch_until(&mut runtime, Duration::from_secs(5), |rt| {
        rt.state().book.get(&id).is_some()
    }));
    assert_eq!(runtime.state().book.len(), 2);

    // A daemon write (the trigger stamp) keeps the CLI record on disk
    let mut stamped = runtime.state().book.alarms()[0].clone();
    stamped.last_triggered = Some(now);
    runtime.state_mut().book.upsert(stamped);
    let on_disk = TomlAlarmStore::open(&path).unwrap().get_all().unwrap();
    assert_eq!(on_disk.len(), 2);
    assert!(on_disk.contains(&from_cli));
}

#[test]
fn test_reload_config_updates_feedback_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let config = Config {
        sync_enabled: false,
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let (ringer, _probe) = silent_ringer(FeedbackSettings::from_config(&config));
    let book = AlarmBook::load(Box::new(MemoryStore::new()));
    let mut runtime =
        Runtime::with_parts(config.clone(), book, ringer, TimeSource::new(), false).unwrap();
    assert!(runtime.state().ringer.settings().vibration);

    let quieter = Config {
        alarm_sound: world_alarm::SoundKind::Chime,
        vibration_enabled: false,
        ..config.clone()
    };
    quieter.save_to(&path).unwrap();
    runtime.state_mut().reload_config(&path);
    assert_eq!(runtime.state().ringer.settings().sound, world_alarm::SoundKind::Chime);
    assert!(!runtime.state().ringer.settings().vibration);

    // A broken file keeps what was applied last
    std::fs::write(&path, "alarm_sound = 12\n").unwrap();
    runtime.state_mut().reload_config(&path);
    assert_eq!(runtime.state().ringer.settings().sound, world_alarm::SoundKind::Chime);
}

// Editing the config file on disk reaches the ringer through the watcher
#[test]
fn test_config_file_edit_is_hot_reloaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let config = Config {
        sync_enabled: false,
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let (ringer, _probe) = silent_ringer(FeedbackSettings::from_config(&config));
    let book = AlarmBook::load(Box::new(MemoryStore::new()));
    let mut runtime =
        Runtime::with_parts(config.clone(), book, ringer, TimeSource::new(), false).unwrap();
    runtime.install_config_watcher(path.clone()).unwrap();

    let night = Config {
        notifications_enabled: false,
        dnd_mode: world_alarm::DndMode::Night,
        ..config
    };
    night.save_to(&path).unwrap();

    assert!(dispatch_until(&mut runtime, Duration::from_secs(5), |rt| {
        !rt.state().ringer.settings().notifications
    }));
    assert_eq!(runtime.state().ringer.settings().dnd, world_alarm::DndMode::Night);
}
