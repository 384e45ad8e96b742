//! Silent audio backend
//!
//! Used when the `audio` feature is disabled. It keeps the full context and
//! voice bookkeeping without producing sound, and its clock only moves when
//! told to, so a [`SilentProbe`] can observe exactly what the engine did.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::{AudioContext, AudioError, Completion, ContextState, SoundPattern, Voice};

#[derive(Debug, Default)]
struct VoiceRecord {
    /// Automatic end for one-shots
    ends_at: Option<f64>,
    stopped: bool,
    disconnected: bool,
}

#[derive(Debug)]
struct Inner {
    state: ContextState,
    time: f64,
    voices: Vec<VoiceRecord>,
    resume_calls: usize,
    suspend_calls: usize,
}

/// Audio context that plays nothing
#[derive(Debug)]
pub struct SilentContext {
    inner: Rc<RefCell<Inner>>,
}

impl SilentContext {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: ContextState::Running,
                time: 0.0,
                voices: Vec::new(),
                resume_calls: 0,
                suspend_calls: 0,
            })),
        }
    }

    /// Observer sharing this context's state
    pub fn probe(&self) -> SilentProbe {
        SilentProbe {
            inner: self.inner.clone(),
        }
    }
}

impl Default for SilentContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioContext for SilentContext {
    fn state(&self) -> ContextState {
        self.inner.borrow().state
    }

    fn current_time(&self) -> f64 {
        self.inner.borrow().time
    }

    fn create_voice(
        &mut self,
        pattern: &SoundPattern,
        looped: bool,
    ) -> Result<Box<dyn Voice>, AudioError> {
        let mut inner = self.inner.borrow_mut();
        if inner.state == ContextState::Closed {
            return Err(AudioError::ContextClosed);
        }
        let ends_at = (!looped).then(|| inner.time + pattern.duration);
        inner.voices.push(VoiceRecord {
            ends_at,
            ..VoiceRecord::default()
        });
        let index = inner.voices.len() - 1;
        trace!(index, sound = %pattern.kind, "Silent voice created");

        Ok(Box::new(SilentVoice {
            inner: self.inner.clone(),
            index,
        }))
    }

    fn resume(&mut self, done: Completion) {
        let result = {
            let mut inner = self.inner.borrow_mut();
            inner.resume_calls += 1;
            match inner.state {
                ContextState::Closed => Err(AudioError::ContextClosed),
                _ => {
                    inner.state = ContextState::Running;
                    Ok(())
                }
            }
        };
        done(result);
    }

    fn suspend(&mut self, done: Completion) {
        let result = {
            let mut inner = self.inner.borrow_mut();
            inner.suspend_calls += 1;
            match inner.state {
                ContextState::Closed => Err(AudioError::ContextClosed),
                _ => {
                    inner.state = ContextState::Suspended;
                    Ok(())
                }
            }
        };
        done(result);
    }
}

struct SilentVoice {
    inner: Rc<RefCell<Inner>>,
    index: usize,
}

impl SilentVoice {
    fn with_record<T>(&self, f: impl FnOnce(&mut VoiceRecord) -> T) -> T {
        let mut inner = self.inner.borrow_mut();
        f(&mut inner.voices[self.index])
    }
}

impl Voice for SilentVoice {
    fn silence(&mut self, _at: f64) -> Result<(), AudioError> {
        self.with_record(|record| {
            if record.disconnected {
                Err(AudioError::Disconnected)
            } else {
                Ok(())
            }
        })
    }

    fn stop(&mut self, _at: f64) -> Result<(), AudioError> {
        self.with_record(|record| {
            if record.stopped {
                return Err(AudioError::NodeFailed("voice already stopped".into()));
            }
            record.stopped = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Result<(), AudioError> {
        self.with_record(|record| {
            if record.disconnected {
                return Err(AudioError::Disconnected);
            }
            record.disconnected = true;
            Ok(())
        })
    }

    fn has_ended(&self) -> bool {
        let inner = self.inner.borrow();
        let record = &inner.voices[self.index];
        record.stopped || record.ends_at.is_some_and(|at| at <= inner.time)
    }
}

/// Read-only view into a [`SilentContext`], plus control of its clock
#[derive(Debug, Clone)]
pub struct SilentProbe {
    inner: Rc<RefCell<Inner>>,
}

impl SilentProbe {
    pub fn state(&self) -> ContextState {
        self.inner.borrow().state
    }

    /// Total voices ever created
    pub fn voices_created(&self) -> usize {
        self.inner.borrow().voices.len()
    }

    /// Voices still producing (silent) output
    pub fn live_voices(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .voices
            .iter()
            .filter(|v| !v.stopped && !v.disconnected && v.ends_at.map_or(true, |at| at > inner.time))
            .count()
    }

    pub fn resume_calls(&self) -> usize {
        self.inner.borrow().resume_calls
    }

    pub fn suspend_calls(&self) -> usize {
        self.inner.borrow().suspend_calls
    }

    /// Move the context clock forward
    pub fn advance(&self, secs: f64) {
        self.inner.borrow_mut().time += secs;
    }

    /// Close the context; later voice creation fails
    pub fn close(&self) {
        self.inner.borrow_mut().state = ContextState::Closed;
    }
}
