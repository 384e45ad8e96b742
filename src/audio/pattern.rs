//! Built-in alarm sound patterns
//!
//! Each pattern describes one oscillator feeding one gain envelope, with
//! parameter automation expressed in seconds from the start of the shot.

use super::SoundKind;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
}

impl Waveform {
    /// Sample the waveform at `phase` (in cycles)
    pub fn sample(&self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => (phase * std::f64::consts::TAU).sin(),
            Waveform::Square => {
                if phase.rem_euclid(1.0) < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// Exponential ramp from `from` to `to` over `over` seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpRamp {
    pub from: f64,
    pub to: f64,
    pub over: f64,
}

impl ExpRamp {
    pub fn value_at(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return self.from;
        }
        if t >= self.over {
            return self.to;
        }
        self.from * (self.to / self.from).powf(t / self.over)
    }
}

/// Frequency automation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrequencyCurve {
    Constant(f64),
    Exponential(ExpRamp),
}

impl FrequencyCurve {
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            FrequencyCurve::Constant(hz) => *hz,
            FrequencyCurve::Exponential(ramp) => ramp.value_at(t),
        }
    }
}

/// Gain automation
#[derive(Debug, Clone, PartialEq)]
pub enum GainEnvelope {
    Exponential(ExpRamp),
    /// Step changes `(time, value)`, sorted by time
    Steps(Vec<(f64, f64)>),
}

impl GainEnvelope {
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            GainEnvelope::Exponential(ramp) => ramp.value_at(t),
            GainEnvelope::Steps(steps) => steps
                .iter()
                .take_while(|(at, _)| *at <= t)
                .last()
                .or_else(|| steps.first())
                .map(|(_, value)| *value)
                .unwrap_or(0.0),
        }
    }
}

/// A single programmed shot
#[derive(Debug, Clone, PartialEq)]
pub struct SoundPattern {
    pub kind: SoundKind,
    pub waveform: Waveform,
    pub frequency: FrequencyCurve,
    pub gain: GainEnvelope,
    /// Offset of the automatic stop for non-looping shots, in seconds
    pub duration: f64,
}

impl SoundPattern {
    /// Pattern for a sound kind; `None` for [`SoundKind::None`]
    pub fn for_kind(kind: SoundKind) -> Option<Self> {
        let pattern = match kind {
            SoundKind::None => return None,
            SoundKind::Bell => Self {
                kind,
                waveform: Waveform::Sine,
                frequency: FrequencyCurve::Exponential(ExpRamp {
                    from: 800.0,
                    to: 100.0,
                    over: 1.5,
                }),
                gain: GainEnvelope::Exponential(ExpRamp {
                    from: 0.5,
                    to: 0.01,
                    over: 1.5,
                }),
                duration: 1.5,
            },
            SoundKind::Chime => Self {
                kind,
                waveform: Waveform::Sine,
                frequency: FrequencyCurve::Constant(523.25), // C5
                gain: GainEnvelope::Exponential(ExpRamp {
                    from: 0.5,
                    to: 0.01,
                    over: 1.0,
                }),
                duration: 1.0,
            },
            SoundKind::Beep => Self {
                kind,
                waveform: Waveform::Square,
                frequency: FrequencyCurve::Constant(1000.0),
                gain: GainEnvelope::Exponential(ExpRamp {
                    from: 0.3,
                    to: 0.01,
                    over: 0.5,
                }),
                duration: 0.5,
            },
            SoundKind::Digital => Self {
                kind,
                waveform: Waveform::Square,
                frequency: FrequencyCurve::Constant(880.0), // A5
                gain: GainEnvelope::Steps(vec![
                    (0.0, 0.5),
                    (0.1, 0.0),
                    (0.2, 0.5),
                    (0.3, 0.0),
                    (0.4, 0.5),
                    (0.5, 0.0),
                ]),
                duration: 0.6,
            },
        };
        Some(pattern)
    }

    pub fn gain_at(&self, t: f64) -> f64 {
        self.gain.value_at(t)
    }

    pub fn frequency_at(&self, t: f64) -> f64 {
        self.frequency.value_at(t)
    }
}
