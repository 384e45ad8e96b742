//! Non-audio alarm feedback: desktop notifications and vibration
//!
//! Both are optional capabilities. A notifier that is denied or missing, or a
//! vibrator that does nothing, leaves the alarm ringing through audio alone.

use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::NotifyError;

/// Vibration pattern for a triggered alarm and each repeat, in milliseconds on/off
pub const ALARM_VIBRATION: [u32; 5] = [200, 100, 200, 100, 200];

/// A desktop notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Replaces any earlier notification with the same tag
    pub tag: String,
    pub icon: String,
    /// Stays until dismissed
    pub require_interaction: bool,
}

/// Delivers notifications to the user
pub trait Notifier {
    fn notify(&mut self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Drives a vibration motor
pub trait Vibrator {
    fn vibrate(&mut self, pattern: &[u32]);

    /// Cancel any ongoing vibration
    fn cancel(&mut self);
}

/// Notifier that shells out to `notify-send`
///
/// The helper is launched and left to finish on its own; a slow
/// notification daemon never holds up the caller.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
    program: String,
    launcher_args: Vec<String>,
    denied: bool,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            program: "notify-send".to_string(),
            launcher_args: Vec::new(),
            denied: false,
        }
    }

    /// Build the `notify-send` invocation for a notification
    fn command(&self, notification: &Notification) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.launcher_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .arg("-a")
            .arg(&self.app_name)
            .arg("-i")
            .arg(&notification.icon)
            .arg("-h")
            .arg(format!(
                "string:x-canonical-private-synchronous:{}",
                notification.tag
            ));
        if notification.require_interaction {
            cmd.arg("-u").arg("critical");
        }
        cmd.arg(&notification.title).arg(&notification.body);
        cmd
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&mut self, notification: &Notification) -> Result<(), NotifyError> {
        if self.denied {
            return Err(NotifyError::PermissionDenied);
        }

        let mut child = self.command(notification).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                self.denied = true;
                NotifyError::PermissionDenied
            } else {
                NotifyError::Spawn(e)
            }
        })?;

        // Reap the helper off the calling thread
        let tag = notification.tag.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                warn!(%tag, %status, "Notification helper failed");
            }
            Ok(_) => debug!(%tag, "Notification helper finished"),
            Err(e) => warn!(%tag, error = %e, "Failed to wait for notification helper"),
        });

        info!(tag = %notification.tag, title = %notification.title, "Notification sent");
        Ok(())
    }
}

/// Notifier that discards everything, for headless runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, notification: &Notification) -> Result<(), NotifyError> {
        debug!(tag = %notification.tag, "Notification dropped (no notifier)");
        Ok(())
    }
}

/// Desktops have no vibration motor; patterns are only logged
#[derive(Debug, Clone, Copy, Default)]
pub struct LogVibrator;

impl Vibrator for LogVibrator {
    fn vibrate(&mut self, pattern: &[u32]) {
        debug!(?pattern, "Vibrate");
    }

    fn cancel(&mut self) {
        debug!("Vibration cancelled");
    }
}

/// Deliver a notification, downgrading every failure to a log line
pub fn deliver(notifier: &mut dyn Notifier, notification: &Notification) {
    match notifier.notify(notification) {
        Ok(()) => {}
        Err(NotifyError::PermissionDenied) => {
            debug!(tag = %notification.tag, "Notification permission denied, skipping");
        }
        Err(e) => {
            warn!(tag = %notification.tag, error = %e, "Failed to show notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notification {
        Notification {
            title: "⏰ Standup".into(),
            body: "Time for: Standup".into(),
            tag: "alarm-abc".into(),
            icon: "alarm-clock".into(),
            require_interaction: true,
        }
    }

    #[test]
    fn test_notify_send_arguments() {
        let notifier = DesktopNotifier::new("world-alarm");
        let cmd = notifier.command(&sample());
        assert_eq!(cmd.get_program(), "notify-send");
        assert_eq!(cmd.get_args().next().unwrap(), "-a");

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"string:x-canonical-private-synchronous:alarm-abc".to_string()));
        assert!(args.windows(2).any(|w| w == ["-u", "critical"]));
        assert_eq!(args[args.len() - 2], "⏰ Standup");
        assert_eq!(args[args.len() - 1], "Time for: Standup");
    }

    #[cfg(unix)]
    #[test]
    fn test_notify_returns_before_helper_exits() {
        let mut notifier = DesktopNotifier {
            app_name: "world-alarm".into(),
            program: "sh".into(),
            launcher_args: vec!["-c".into(), "sleep 3".into(), "notify".into()],
            denied: false,
        };
        let started = std::time::Instant::now();
        assert!(notifier.notify(&sample()).is_ok());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_missing_helper_is_a_spawn_error() {
        let mut notifier = DesktopNotifier {
            program: "world-alarm-no-such-notifier".into(),
            ..DesktopNotifier::new("world-alarm")
        };
        assert!(matches!(
            notifier.notify(&sample()),
            Err(NotifyError::Spawn(_))
        ));
        assert!(!notifier.denied);
    }

    #[test]
    fn test_deliver_swallows_errors() {
        struct Denied;
        impl Notifier for Denied {
            fn notify(&mut self, _n: &Notification) -> Result<(), NotifyError> {
                Err(NotifyError::PermissionDenied)
            }
        }
        deliver(&mut Denied, &sample());
        deliver(&mut NullNotifier, &sample());
    }
}
