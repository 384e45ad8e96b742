//! Audio backend using rodio
//!
//! Each voice is its own [`Sink`] fed by a [`PatternSource`] that synthesizes
//! the programmed oscillator and envelope sample by sample.

use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{AudioContext, AudioError, Completion, ContextState, SoundPattern, Voice};

const SAMPLE_RATE: u32 = 44_100;

/// Output context backed by the default audio device
pub struct RodioContext {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    started: Instant,
    suspended: Arc<AtomicBool>,
}

impl RodioContext {
    /// Open the default output device
    pub fn new() -> Result<Self, AudioError> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| AudioError::StreamError(e.to_string()))?;

        info!("Audio output initialized");

        Ok(Self {
            _stream: stream,
            stream_handle,
            started: Instant::now(),
            suspended: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl AudioContext for RodioContext {
    fn state(&self) -> ContextState {
        if self.suspended.load(Ordering::Acquire) {
            ContextState::Suspended
        } else {
            ContextState::Running
        }
    }

    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn create_voice(
        &mut self,
        pattern: &SoundPattern,
        looped: bool,
    ) -> Result<Box<dyn Voice>, AudioError> {
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        let controls = Arc::new(VoiceControls::default());

        sink.append(PatternSource::new(
            pattern.clone(),
            looped,
            controls.clone(),
            self.suspended.clone(),
        ));

        debug!(sound = %pattern.kind, looped, "Voice started");
        Ok(Box::new(RodioVoice {
            sink: Some(sink),
            controls,
        }))
    }

    fn resume(&mut self, done: Completion) {
        self.suspended.store(false, Ordering::Release);
        done(Ok(()));
    }

    fn suspend(&mut self, done: Completion) {
        self.suspended.store(true, Ordering::Release);
        done(Ok(()));
    }
}

/// Flags shared between a voice handle and its audio thread source
#[derive(Debug, Default)]
struct VoiceControls {
    silenced: AtomicBool,
    stopped: AtomicBool,
}

struct RodioVoice {
    sink: Option<Sink>,
    controls: Arc<VoiceControls>,
}

impl Voice for RodioVoice {
    fn silence(&mut self, _at: f64) -> Result<(), AudioError> {
        self.controls.silenced.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self, _at: f64) -> Result<(), AudioError> {
        let sink = self.sink.as_ref().ok_or(AudioError::Disconnected)?;
        if self.controls.stopped.swap(true, Ordering::AcqRel) {
            return Err(AudioError::NodeFailed("voice already stopped".into()));
        }
        sink.stop();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), AudioError> {
        let sink = self.sink.take().ok_or(AudioError::Disconnected)?;
        self.controls.stopped.store(true, Ordering::Release);
        // Dropping a sink that was never detached ends its playback
        drop(sink);
        Ok(())
    }

    fn has_ended(&self) -> bool {
        self.sink.as_ref().map_or(true, |sink| sink.empty())
    }
}

/// Synthesizes one [`SoundPattern`] as a mono f32 stream
struct PatternSource {
    pattern: SoundPattern,
    looped: bool,
    controls: Arc<VoiceControls>,
    suspended: Arc<AtomicBool>,
    sample: u64,
    phase: f64,
}

impl PatternSource {
    fn new(
        pattern: SoundPattern,
        looped: bool,
        controls: Arc<VoiceControls>,
        suspended: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pattern,
            looped,
            controls,
            suspended,
            sample: 0,
            phase: 0.0,
        }
    }
}

impl Iterator for PatternSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.controls.stopped.load(Ordering::Acquire) {
            return None;
        }
        // A suspended context holds its clock
        if self.suspended.load(Ordering::Acquire) {
            return Some(0.0);
        }

        let mut t = self.sample as f64 / SAMPLE_RATE as f64;
        if t >= self.pattern.duration {
            if !self.looped {
                return None;
            }
            t %= self.pattern.duration;
        }
        self.sample += 1;

        let frequency = self.pattern.frequency_at(t);
        let value = self.pattern.waveform.sample(self.phase);
        self.phase = (self.phase + frequency / SAMPLE_RATE as f64).fract();

        if self.controls.silenced.load(Ordering::Acquire) {
            return Some(0.0);
        }
        Some((value * self.pattern.gain_at(t)) as f32)
    }
}

impl Source for PatternSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1 // Mono
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        if self.looped {
            None
        } else {
            Some(Duration::from_secs_f64(self.pattern.duration))
        }
    }
}
