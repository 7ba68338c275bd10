//! Tempo alignment by pitch-preserving time-stretch

use crate::buffer::AudioBuffer;
use crate::engine::NativeAudioEngine;
use crate::error::EngineError;
use tracing::{debug, warn};

/// Stability range a stretch ratio is clamped into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchRange {
    pub min: f64,
    pub max: f64,
}

impl StretchRange {
    /// Background track alignment
    pub const BACKGROUND: Self = Self { min: 0.5, max: 2.0 };
    /// Clip alignment to a detected tempo
    pub const CLIP: Self = Self { min: 0.3, max: 3.0 };
    /// User-requested speed factors
    pub const WIDE: Self = Self { min: 0.1, max: 10.0 };

    #[inline]
    pub fn clamp(&self, ratio: f64) -> f64 {
        ratio.clamp(self.min, self.max)
    }
}

/// Result of one alignment; never fails, the fallback carries the cause
#[derive(Debug, Clone)]
pub struct AlignOutcome {
    pub buffer: AudioBuffer,
    /// Ratio actually requested from the engine
    pub ratio: f64,
    /// Set when the stretch failed and `buffer` is an unmodified copy
    pub fallback: Option<EngineError>,
}

/// Computes and applies clamped stretch ratios
#[derive(Debug, Clone, Copy)]
pub struct TempoAligner {
    range: StretchRange,
}

impl TempoAligner {
    pub fn new(range: StretchRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> StretchRange {
        self.range
    }

    /// `target / original`, clamped; 1.0 for non-positive tempos or a
    /// non-finite quotient
    pub fn ratio(&self, target_bpm: f64, original_bpm: f64) -> f64 {
        if !(target_bpm > 0.0 && original_bpm > 0.0) {
            return 1.0;
        }
        let ratio = target_bpm / original_bpm;
        if !ratio.is_finite() || ratio <= 0.0 {
            return 1.0;
        }
        self.range.clamp(ratio)
    }

    /// Stretch `input` from `original_bpm` to `target_bpm`
    pub fn align(
        &self,
        engine: &dyn NativeAudioEngine,
        input: &AudioBuffer,
        target_bpm: f64,
        original_bpm: f64,
    ) -> AlignOutcome {
        let ratio = self.ratio(target_bpm, original_bpm);
        debug!(target_bpm, original_bpm, ratio, "Aligning tempo");
        self.stretch_or_copy(engine, input, ratio)
    }

    /// Stretch `input` by a raw speed factor (> 1 is faster)
    pub fn apply_factor(
        &self,
        engine: &dyn NativeAudioEngine,
        input: &AudioBuffer,
        factor: f64,
    ) -> AlignOutcome {
        let ratio = if factor.is_finite() && factor > 0.0 {
            self.range.clamp(factor)
        } else {
            1.0
        };
        self.stretch_or_copy(engine, input, ratio)
    }

    fn stretch_or_copy(
        &self,
        engine: &dyn NativeAudioEngine,
        input: &AudioBuffer,
        ratio: f64,
    ) -> AlignOutcome {
        if ratio == 1.0 {
            return AlignOutcome {
                buffer: input.clone(),
                ratio,
                fallback: None,
            };
        }

        match engine.stretch(input, ratio) {
            Ok(buffer) => AlignOutcome {
                buffer,
                ratio,
                fallback: None,
            },
            Err(e) => {
                warn!(stage = "stretch", ratio, error = %e, "Stretch failed, using unmodified copy");
                AlignOutcome {
                    buffer: input.clone(),
                    ratio,
                    fallback: Some(e),
                }
            }
        }
    }
}
