//! Audio playback system for alarms
//!
//! The [`AudioEngine`] owns one lazily-created [`AudioContext`] and every
//! voice it has started. Voices are synthesized from the built-in
//! [`SoundPattern`]s. The engine also holds the stopping guard: while it is
//! set no new voice can be created and the context is never resumed.
//!
//! Backends: rodio behind the `audio` feature, and a silent backend that is
//! always available (used without the feature, and by tests).

mod pattern;
#[cfg(feature = "audio")]
mod player;
mod stub;

pub use pattern::{ExpRamp, FrequencyCurve, GainEnvelope, SoundPattern, Waveform};
#[cfg(feature = "audio")]
pub use player::RodioContext;
pub use stub::{SilentContext, SilentProbe};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur during audio playback
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Failed to create output stream: {0}")]
    StreamError(String),

    #[error("Audio node operation failed: {0}")]
    NodeFailed(String),

    #[error("Audio node already disconnected")]
    Disconnected,

    #[error("Audio context is closed")]
    ContextClosed,

    #[error("Unknown sound: {0}")]
    UnknownSound(String),
}

/// Built-in alarm sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundKind {
    /// No sound at all
    None,
    /// Descending sine sweep
    Bell,
    /// Single decaying tone
    Chime,
    /// Short square-wave beep
    Beep,
    /// Three square pulses, the classic digital alarm
    #[default]
    Digital,
}

impl FromStr for SoundKind {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SoundKind::None),
            "bell" => Ok(SoundKind::Bell),
            "chime" => Ok(SoundKind::Chime),
            "beep" => Ok(SoundKind::Beep),
            "digital" | "default" => Ok(SoundKind::Digital),
            other => Err(AudioError::UnknownSound(other.to_string())),
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SoundKind::None => "none",
            SoundKind::Bell => "bell",
            SoundKind::Chime => "chime",
            SoundKind::Beep => "beep",
            SoundKind::Digital => "digital",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Completion callback for asynchronous context operations
pub type Completion = Box<dyn FnOnce(Result<(), AudioError>)>;

/// Shared audio output graph
pub trait AudioContext {
    fn state(&self) -> ContextState;

    /// Context clock in seconds
    fn current_time(&self) -> f64;

    /// Create an oscillator wired through a gain envelope to the output and
    /// start it with `pattern`. A non-looping voice stops itself after
    /// `pattern.duration`.
    fn create_voice(&mut self, pattern: &SoundPattern, looped: bool)
        -> Result<Box<dyn Voice>, AudioError>;

    /// Request resumption; the outcome is reported through `done`
    fn resume(&mut self, done: Completion);

    /// Request suspension; the outcome is reported through `done`
    fn suspend(&mut self, done: Completion);
}

/// One sound-producing node plus its gain envelope
pub trait Voice {
    /// Cancel scheduled envelope changes from `at` on and hold gain at zero
    fn silence(&mut self, at: f64) -> Result<(), AudioError>;

    fn stop(&mut self, at: f64) -> Result<(), AudioError>;

    fn disconnect(&mut self) -> Result<(), AudioError>;

    /// Whether the voice has finished playing on its own
    fn has_ended(&self) -> bool;
}

/// Builds the shared context on first use
pub type ContextFactory = Box<dyn FnMut() -> Result<Box<dyn AudioContext>, AudioError>>;

/// Factory for the platform default backend
pub fn default_context_factory() -> ContextFactory {
    #[cfg(feature = "audio")]
    {
        Box::new(|| RodioContext::new().map(|ctx| Box::new(ctx) as Box<dyn AudioContext>))
    }
    #[cfg(not(feature = "audio"))]
    {
        Box::new(|| {
            debug!("Audio feature not enabled, using silent context");
            Ok(Box::new(SilentContext::new()) as Box<dyn AudioContext>)
        })
    }
}

/// Identifies one armed repeat loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopHandle(u64);

impl LoopHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedLoop {
    handle: LoopHandle,
    kind: SoundKind,
}

/// A voice tracked by the engine
struct ActiveVoice {
    voice: Box<dyn Voice>,
    kind: SoundKind,
    started_at: f64,
    /// Scheduled automatic stop, `None` for looping voices
    auto_stop_at: Option<f64>,
}

/// Which step of the teardown failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Silence,
    Stop,
    Disconnect,
}

/// A per-voice failure collected during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFailure {
    pub index: usize,
    pub step: TeardownStep,
    pub error: AudioError,
}

/// Summary of a teardown pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Voices that were stopped or at least disconnected
    pub released: usize,
    /// Voices where both stop and disconnect failed
    pub stuck: usize,
    pub failures: Vec<VoiceFailure>,
    /// Whether a context suspension was requested
    pub suspend_requested: bool,
    /// Whether an armed loop was cancelled
    pub loop_cancelled: bool,
}

impl StopReport {
    /// True when nothing was running
    pub fn is_noop(&self) -> bool {
        self.released == 0 && self.stuck == 0 && !self.loop_cancelled && !self.suspend_requested
    }
}

/// Owns the audio context, active voices, the repeat loop and the stopping guard
pub struct AudioEngine {
    factory: ContextFactory,
    context: Option<Box<dyn AudioContext>>,
    voices: Vec<ActiveVoice>,
    armed: Option<ArmedLoop>,
    next_loop_id: u64,
    stopping: bool,
}

impl AudioEngine {
    /// Create an engine; the context is built lazily through `factory`
    pub fn new(factory: ContextFactory) -> Self {
        Self {
            factory,
            context: None,
            voices: Vec::new(),
            armed: None,
            next_loop_id: 0,
            stopping: false,
        }
    }

    /// Engine backed by the platform default backend
    pub fn with_default_backend() -> Self {
        Self::new(default_context_factory())
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Sound kinds of the tracked voices, oldest first
    pub fn active_kinds(&self) -> Vec<SoundKind> {
        self.voices.iter().map(|v| v.kind).collect()
    }

    /// Handle of the armed repeat loop, if any
    pub fn loop_handle(&self) -> Option<LoopHandle> {
        self.armed.map(|armed| armed.handle)
    }

    /// State of the context, `None` if it was never created
    pub fn context_state(&self) -> Option<ContextState> {
        self.context.as_ref().map(|ctx| ctx.state())
    }

    /// Get the shared context, creating it on first use
    ///
    /// With `force_resume` a suspended context is asked to resume, unless the
    /// engine is stopping.
    pub fn ensure_context(&mut self, force_resume: bool) -> Option<&mut (dyn AudioContext + 'static)> {
        if self.context.is_none() {
            match (self.factory)() {
                Ok(ctx) => {
                    info!("Audio context created");
                    self.context = Some(ctx);
                }
                Err(e) => {
                    error!(error = %e, "Failed to create audio context");
                    return None;
                }
            }
        }

        let stopping = self.stopping;
        let ctx = self.context.as_deref_mut()?;
        if stopping {
            trace!("Stopping in progress, context will not be resumed");
        } else if force_resume && ctx.state() == ContextState::Suspended {
            ctx.resume(Box::new(|result| match result {
                Ok(()) => debug!("Audio context resumed"),
                Err(e) => warn!(error = %e, "Failed to resume audio context"),
            }));
        }
        Some(ctx)
    }

    /// Play one shot of `kind`
    ///
    /// Does nothing for [`SoundKind::None`] or while stopping. Returns whether
    /// a voice was created.
    pub fn play_once(&mut self, kind: SoundKind, looped: bool) -> bool {
        let Some(pattern) = SoundPattern::for_kind(kind) else {
            return false;
        };
        if self.stopping {
            debug!(sound = %kind, "Stopping in progress, not creating a voice");
            return false;
        }

        let Some(ctx) = self.ensure_context(true) else {
            return false;
        };
        let started_at = ctx.current_time();
        let voice = match ctx.create_voice(&pattern, looped) {
            Ok(voice) => voice,
            Err(e) => {
                warn!(sound = %kind, error = %e, "Failed to create voice");
                return false;
            }
        };

        let auto_stop_at = (!looped).then(|| started_at + pattern.duration);
        self.voices.push(ActiveVoice {
            voice,
            kind,
            started_at,
            auto_stop_at,
        });
        trace!(sound = %kind, voices = self.voices.len(), "Voice started");
        true
    }

    /// Start ringing `kind` repeatedly
    ///
    /// Cancels any armed loop, tears down every tracked voice, plays one shot
    /// right away and arms a new loop. The caller drives the loop by calling
    /// [`loop_tick`](Self::loop_tick) with the returned handle at the repeat
    /// interval.
    pub fn start_loop(&mut self, kind: SoundKind) -> LoopHandle {
        if let Some(previous) = self.armed.take() {
            debug!(loop_id = previous.handle.id(), "Previous loop cancelled");
        }

        let report = self.release_voices(false);
        if !report.failures.is_empty() {
            debug!(failures = report.failures.len(), "Ignored failures while clearing voices");
        }

        self.play_once(kind, false);

        self.next_loop_id += 1;
        let handle = LoopHandle(self.next_loop_id);
        self.armed = Some(ArmedLoop { handle, kind });
        info!(loop_id = handle.id(), sound = %kind, "Alarm loop started");
        handle
    }

    /// One repetition of the armed loop
    ///
    /// Plays another shot only if `handle` is still the armed loop and the
    /// engine is not stopping. Returns whether the shot went out, which is
    /// also the cue for a vibration pulse.
    pub fn loop_tick(&mut self, handle: LoopHandle) -> bool {
        let kind = match self.armed {
            Some(armed) if armed.handle == handle => armed.kind,
            _ => {
                trace!(loop_id = handle.id(), "Stale loop tick ignored");
                return false;
            }
        };
        if self.stopping {
            return false;
        }
        self.prune_finished();
        self.play_once(kind, false)
    }

    /// Drop voices that have finished on their own
    pub fn prune_finished(&mut self) -> usize {
        let now = match self.context.as_ref() {
            Some(ctx) => ctx.current_time(),
            None => return 0,
        };
        let before = self.voices.len();
        self.voices.retain(|v| {
            let expired = v.auto_stop_at.is_some_and(|at| at <= now);
            !(expired || v.voice.has_ended())
        });
        let pruned = before - self.voices.len();
        if pruned > 0 {
            trace!(pruned, remaining = self.voices.len(), "Finished voices pruned");
        }
        pruned
    }

    /// The authoritative stop sequence
    ///
    /// Raises the stopping guard before anything else, cancels the loop,
    /// silences and releases every voice best-effort, and asks the context to
    /// suspend. The guard stays up until [`finish_stop`](Self::finish_stop).
    pub fn stop_all(&mut self) -> StopReport {
        self.stopping = true;

        let loop_cancelled = self.armed.take().is_some();
        let mut report = self.release_voices(true);
        report.loop_cancelled = loop_cancelled;

        if let Some(ctx) = self.context.as_deref_mut() {
            if ctx.state() == ContextState::Running {
                ctx.suspend(Box::new(|result| match result {
                    Ok(()) => debug!("Audio context suspended"),
                    Err(e) => warn!(error = %e, "Failed to suspend audio context"),
                }));
                report.suspend_requested = true;
            }
        }

        if report.stuck > 0 {
            warn!(stuck = report.stuck, "Some voices could not be stopped");
        }
        report
    }

    /// Cancel the armed loop and release its voices
    ///
    /// Unlike [`stop_all`](Self::stop_all) this raises no guard and leaves
    /// the context running; it is for switching an alarm to silence.
    pub fn cancel_loop(&mut self) -> StopReport {
        let loop_cancelled = self.armed.take().is_some();
        let mut report = self.release_voices(true);
        report.loop_cancelled = loop_cancelled;
        if loop_cancelled {
            debug!(released = report.released, "Alarm loop cancelled");
        }
        report
    }

    /// Lower the stopping guard
    ///
    /// A suspended context is left suspended; the next play request resumes it.
    pub fn finish_stop(&mut self) {
        self.stopping = false;
    }

    /// Opportunistic resume on user interaction, suppressed while stopping
    pub fn on_user_interaction(&mut self) {
        if self.stopping {
            trace!("Ignoring user interaction resume while stopping");
            return;
        }
        // Only touch a context that exists; interaction alone never creates one
        if self.context.is_some() {
            self.ensure_context(true);
        }
    }

    /// Tear down every tracked voice, collecting failures
    ///
    /// With `silence` each envelope is zeroed first. For every voice: stop,
    /// and if that fails, disconnect. A voice that refuses both is counted as
    /// stuck. No failure interrupts the pass.
    fn release_voices(&mut self, silence: bool) -> StopReport {
        let now = self.context.as_ref().map(|ctx| ctx.current_time()).unwrap_or(0.0);
        let mut report = StopReport::default();

        for (index, mut active) in self.voices.drain(..).enumerate() {
            if silence {
                if let Err(error) = active.voice.silence(now) {
                    report.failures.push(VoiceFailure {
                        index,
                        step: TeardownStep::Silence,
                        error,
                    });
                }
            }

            let stopped = match active.voice.stop(now) {
                Ok(()) => true,
                Err(error) => {
                    report.failures.push(VoiceFailure {
                        index,
                        step: TeardownStep::Stop,
                        error,
                    });
                    false
                }
            };

            match active.voice.disconnect() {
                Ok(()) => report.released += 1,
                Err(error) if stopped => {
                    // Already released through stop
                    trace!(index, error = %error, "Disconnect after stop failed");
                    report.released += 1;
                }
                Err(error) => {
                    warn!(
                        index,
                        sound = %active.kind,
                        started_at = active.started_at,
                        error = %error,
                        "Failed to release voice"
                    );
                    report.failures.push(VoiceFailure {
                        index,
                        step: TeardownStep::Disconnect,
                        error,
                    });
                    report.stuck += 1;
                }
            }
        }
        report
    }
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("context", &self.context_state())
            .field("voices", &self.voices.len())
            .field("armed", &self.armed)
            .field("stopping", &self.stopping)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn silent_engine() -> (AudioEngine, SilentProbe) {
        let ctx = SilentContext::new();
        let probe = ctx.probe();
        let mut slot = Some(ctx);
        let engine = AudioEngine::new(Box::new(move || {
            slot.take()
                .map(|ctx| Box::new(ctx) as Box<dyn AudioContext>)
                .ok_or_else(|| AudioError::StreamError("context already built".into()))
        }));
        (engine, probe)
    }

    /// Voice whose stop/disconnect can be made to fail
    struct FlakyVoice {
        fail_stop: bool,
        fail_disconnect: bool,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Voice for FlakyVoice {
        fn silence(&mut self, _at: f64) -> Result<(), AudioError> {
            self.log.borrow_mut().push("silence");
            Ok(())
        }

        fn stop(&mut self, _at: f64) -> Result<(), AudioError> {
            self.log.borrow_mut().push("stop");
            if self.fail_stop {
                Err(AudioError::NodeFailed("already stopped".into()))
            } else {
                Ok(())
            }
        }

        fn disconnect(&mut self) -> Result<(), AudioError> {
            self.log.borrow_mut().push("disconnect");
            if self.fail_disconnect {
                Err(AudioError::Disconnected)
            } else {
                Ok(())
            }
        }

        fn has_ended(&self) -> bool {
            false
        }
    }

    /// Context handing out flaky voices according to a script
    struct FlakyContext {
        script: Vec<(bool, bool)>,
        created: usize,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl AudioContext for FlakyContext {
        fn state(&self) -> ContextState {
            ContextState::Running
        }

        fn current_time(&self) -> f64 {
            0.0
        }

        fn create_voice(
            &mut self,
            _pattern: &SoundPattern,
            _looped: bool,
        ) -> Result<Box<dyn Voice>, AudioError> {
            let (fail_stop, fail_disconnect) =
                self.script.get(self.created).copied().unwrap_or((false, false));
            self.created += 1;
            Ok(Box::new(FlakyVoice {
                fail_stop,
                fail_disconnect,
                log: self.log.clone(),
            }))
        }

        fn resume(&mut self, done: Completion) {
            done(Ok(()));
        }

        fn suspend(&mut self, done: Completion) {
            done(Err(AudioError::NodeFailed("suspend rejected".into())));
        }
    }

    #[test]
    fn test_sound_kind_parsing() {
        assert_eq!("Bell".parse::<SoundKind>().unwrap(), SoundKind::Bell);
        assert_eq!("default".parse::<SoundKind>().unwrap(), SoundKind::Digital);
        assert!("gong".parse::<SoundKind>().is_err());
        assert_eq!(SoundKind::default(), SoundKind::Digital);
    }

    #[test]
    fn test_context_is_lazy() {
        let (mut engine, probe) = silent_engine();
        assert_eq!(engine.context_state(), None);
        engine.on_user_interaction();
        assert_eq!(engine.context_state(), None);

        assert!(engine.play_once(SoundKind::Chime, false));
        assert_eq!(engine.context_state(), Some(ContextState::Running));
        assert_eq!(probe.voices_created(), 1);
    }

    #[test]
    fn test_play_none_is_noop() {
        let (mut engine, probe) = silent_engine();
        assert!(!engine.play_once(SoundKind::None, false));
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(probe.voices_created(), 0);
    }

    #[test]
    fn test_stopping_blocks_play_once() {
        let (mut engine, probe) = silent_engine();
        engine.play_once(SoundKind::Beep, false);
        engine.stop_all();
        assert!(engine.is_stopping());

        assert!(!engine.play_once(SoundKind::Beep, false));
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(probe.voices_created(), 1);
    }

    #[test]
    fn test_auto_stop_recorded_for_one_shots() {
        let (mut engine, probe) = silent_engine();
        engine.play_once(SoundKind::Bell, false);
        engine.play_once(SoundKind::Bell, true);
        assert_eq!(engine.voices[0].auto_stop_at.map(|at| at >= 1.5), Some(true));
        assert_eq!(engine.voices[1].auto_stop_at, None);

        probe.advance(2.0);
        assert_eq!(engine.prune_finished(), 1);
        assert_eq!(engine.active_kinds(), vec![SoundKind::Bell]);
    }

    #[test]
    fn test_start_loop_replaces_previous() {
        let (mut engine, probe) = silent_engine();
        let first = engine.start_loop(SoundKind::Digital);
        engine.play_once(SoundKind::Digital, false);
        assert_eq!(engine.active_voice_count(), 2);

        let second = engine.start_loop(SoundKind::Chime);
        assert_ne!(first, second);
        assert_eq!(engine.loop_handle(), Some(second));
        assert_eq!(engine.active_kinds(), vec![SoundKind::Chime]);
        assert_eq!(probe.live_voices(), 1);

        // The old handle is dead
        assert!(!engine.loop_tick(first));
        assert!(engine.loop_tick(second));
        assert_eq!(engine.active_voice_count(), 2);
    }

    #[test]
    fn test_stop_all_releases_everything() {
        let (mut engine, probe) = silent_engine();
        let handle = engine.start_loop(SoundKind::Bell);
        for _ in 0..5 {
            engine.loop_tick(handle);
        }
        assert_eq!(engine.active_voice_count(), 6);

        let report = engine.stop_all();
        assert_eq!(report.released, 6);
        assert_eq!(report.stuck, 0);
        assert!(report.loop_cancelled);
        assert!(report.suspend_requested);
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(engine.loop_handle(), None);
        assert_eq!(probe.live_voices(), 0);
        assert_eq!(probe.state(), ContextState::Suspended);

        // A tick that was already in flight does nothing
        assert!(!engine.loop_tick(handle));
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_teardown_continues_past_failures() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctx_log = log.clone();
        let mut engine = AudioEngine::new(Box::new(move || {
            Ok(Box::new(FlakyContext {
                // ok, stop fails, both fail, ok
                script: vec![(false, false), (true, false), (true, true), (false, false)],
                created: 0,
                log: ctx_log.clone(),
            }) as Box<dyn AudioContext>)
        }));
        for _ in 0..4 {
            assert!(engine.play_once(SoundKind::Beep, false));
        }

        let report = engine.stop_all();
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(report.released, 3);
        assert_eq!(report.stuck, 1);
        assert_eq!(
            report
                .failures
                .iter()
                .map(|f| (f.index, f.step))
                .collect::<Vec<_>>(),
            vec![
                (1, TeardownStep::Stop),
                (2, TeardownStep::Stop),
                (2, TeardownStep::Disconnect),
            ]
        );
        // Every voice got the full treatment
        let silences = log.borrow().iter().filter(|s| **s == "silence").count();
        assert_eq!(silences, 4);
    }

    #[test]
    fn test_interaction_resume_suppressed_while_stopping() {
        let (mut engine, probe) = silent_engine();
        engine.play_once(SoundKind::Chime, false);
        engine.stop_all();
        assert_eq!(probe.state(), ContextState::Suspended);

        engine.on_user_interaction();
        assert_eq!(probe.state(), ContextState::Suspended);

        engine.finish_stop();
        assert_eq!(probe.state(), ContextState::Suspended);

        engine.on_user_interaction();
        assert_eq!(probe.state(), ContextState::Running);
    }

    #[test]
    fn test_stop_with_nothing_running() {
        let (mut engine, _probe) = silent_engine();
        let report = engine.stop_all();
        assert!(report.is_noop());
        engine.finish_stop();
        let report = engine.stop_all();
        assert!(report.is_noop());
    }
}
