// Configuration file watcher with hot-reload capability

use anyhow::{Context, Result};
use calloop::channel::{channel, Channel, Sender};
use notify::{
    event::{EventKind, ModifyKind},
    Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Events closer together than this collapse into one reload
const DEBOUNCE_DURATION: Duration = Duration::from_millis(100);

/// Configuration reload event
#[derive(Debug, Clone)]
pub struct ConfigReloadEvent {
    /// Timestamp when the event was generated
    pub timestamp: Instant,
    /// The file that changed
    pub path: PathBuf,
}

/// Configuration file watcher
///
/// Watches the directory containing the config file, so editors that save by
/// writing a new file and renaming it over the old one are still noticed.
/// Reload events are delivered through a calloop channel.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `config_path`
    ///
    /// Returns the watcher, which must be kept alive, and the channel to
    /// insert into the event loop.
    pub fn new(config_path: PathBuf) -> Result<(Self, Channel<ConfigReloadEvent>)> {
        Self::with_debounce(config_path, DEBOUNCE_DURATION)
    }

    /// Start watching `config_path`, collapsing events closer than `debounce`
    ///
    /// A zero debounce reports every write, for files where a dropped
    /// trailing event would leave the reader stale.
    pub fn with_debounce(
        config_path: PathBuf,
        debounce: Duration,
    ) -> Result<(Self, Channel<ConfigReloadEvent>)> {
        let (tx, rx) = channel();
        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut handler = ReloadHandler {
            target: config_path.clone(),
            debounce,
            last_event: None,
            tx,
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| handler.handle(res),
            NotifyConfig::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        tracing::info!(
            path = %config_path.display(),
            "Config file watcher initialized"
        );

        Ok((
            Self {
                _watcher: watcher,
                path: config_path,
            },
            rx,
        ))
    }

    /// The watched config file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct ReloadHandler {
    target: PathBuf,
    debounce: Duration,
    last_event: Option<Instant>,
    tx: Sender<ConfigReloadEvent>,
}

impl ReloadHandler {
    fn handle(&mut self, res: Result<notify::Event, notify::Error>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "File watcher error");
                return;
            }
        };

        let relevant = matches!(
            event.kind,
            EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Any)
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Create(_)
        );
        if !relevant || !event.paths.iter().any(|p| self.is_target(p)) {
            tracing::trace!(kind = ?event.kind, "Ignoring file event");
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.last_event {
            if now.duration_since(last) < self.debounce {
                tracing::trace!("Config change debounced");
                return;
            }
        }
        self.last_event = Some(now);

        tracing::info!(path = %self.target.display(), "Watched file changed, triggering reload");
        let reload_event = ConfigReloadEvent {
            timestamp: now,
            path: self.target.clone(),
        };
        if let Err(e) = self.tx.send(reload_event) {
            tracing::error!(error = %e, "Failed to send config reload event");
        }
    }

    fn is_target(&self, path: &Path) -> bool {
        path == self.target || path.file_name() == self.target.file_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_watcher_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "alarm_sound = \"bell\"\n").unwrap();

        let watcher = ConfigWatcher::new(path.clone());
        assert!(watcher.is_ok());
        let (watcher, _channel) = watcher.unwrap();
        assert_eq!(watcher.path(), path.as_path());
    }

    fn wait_for_reload(reloads: Channel<ConfigReloadEvent>, write: impl FnOnce()) -> Option<PathBuf> {
        let mut event_loop: calloop::EventLoop<Option<PathBuf>> =
            calloop::EventLoop::try_new().unwrap();
        event_loop
            .handle()
            .insert_source(reloads, |event, _, seen| {
                if let calloop::channel::Event::Msg(reload) = event {
                    *seen = Some(reload.path);
                }
            })
            .unwrap();

        write();

        let mut seen = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.is_none() && Instant::now() < deadline {
            event_loop
                .dispatch(Some(Duration::from_millis(50)), &mut seen)
                .unwrap();
        }
        seen
    }

    #[test]
    fn test_config_watcher_detects_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "alarm_sound = \"bell\"\n").unwrap();

        let (_watcher, reloads) = ConfigWatcher::new(path.clone()).unwrap();
        let seen = wait_for_reload(reloads, || {
            std::fs::write(&path, "alarm_sound = \"chime\"\n").unwrap();
        });
        assert_eq!(seen, Some(path));
    }

    #[test]
    fn test_watcher_sees_rename_over_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alarms.toml");
        std::fs::write(&path, "").unwrap();

        let (_watcher, reloads) = ConfigWatcher::with_debounce(path.clone(), Duration::ZERO).unwrap();
        let seen = wait_for_reload(reloads, || {
            let tmp = dir.path().join("alarms.toml.tmp");
            std::fs::write(&tmp, "alarms = []\n").unwrap();
            std::fs::rename(&tmp, &path).unwrap();
        });
        assert_eq!(seen, Some(path));
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let (_watcher, reloads) = ConfigWatcher::new(path).unwrap();
        let mut event_loop: calloop::EventLoop<usize> = calloop::EventLoop::try_new().unwrap();
        event_loop
            .handle()
            .insert_source(reloads, |event, _, count| {
                if let calloop::channel::Event::Msg(_) = event {
                    *count += 1;
                }
            })
            .unwrap();

        std::fs::write(dir.path().join("other.toml"), "x = 1\n").unwrap();
        let mut count = 0;
        for _ in 0..10 {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), &mut count)
                .unwrap();
        }
        assert_eq!(count, 0);
    }

    #[test]
    fn test_watcher_fails_for_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("config.toml");
        assert!(ConfigWatcher::new(path).is_err());
    }
}
