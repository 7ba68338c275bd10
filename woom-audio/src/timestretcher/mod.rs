//! Time-stretching and reference-pitch retuning.
//!
//! The phase vocoder changes duration without changing pitch. Combined
//! with a sample rate reinterpretation it also shifts pitch without
//! changing duration, which is how `ToneShifter` retunes a mix from the
//! 440 Hz concert reference to 432 Hz.
//!
//! # Usage
//!
//! ```rust,ignore
//! use woom_audio::{DspEngine, ToneShifter};
//!
//! let engine = DspEngine::new();
//! let retuned = ToneShifter::a432().shift(&engine, &mixed)?;
//! assert_eq!(retuned.frames(), mixed.frames());
//! ```

mod phase;

pub use phase::PhaseVocoder;

use crate::buffer::AudioBuffer;
use crate::engine::NativeAudioEngine;
use crate::error::EngineError;
use crate::resample::resample_planar;
use tracing::debug;

/// Concert pitch reference (A4) in Hz
pub const CONCERT_PITCH_HZ: u32 = 440;

/// Alternative A4 reference in Hz
pub const A432_PITCH_HZ: u32 = 432;

/// Pitch shift from one A4 reference to another with duration preserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneShifter {
    reference_hz: u32,
    target_hz: u32,
}

impl ToneShifter {
    /// Retune from `reference_hz` to `target_hz`
    pub fn new(reference_hz: u32, target_hz: u32) -> Self {
        Self {
            reference_hz: reference_hz.max(1),
            target_hz: target_hz.max(1),
        }
    }

    /// 440 Hz to 432 Hz
    pub fn a432() -> Self {
        Self::new(CONCERT_PITCH_HZ, A432_PITCH_HZ)
    }

    /// Frequency ratio applied to every partial
    pub fn pitch_ratio(&self) -> f64 {
        self.target_hz as f64 / self.reference_hz as f64
    }

    /// Net shift in semitones (about -0.3176 for 440 -> 432)
    pub fn semitones(&self) -> f64 {
        12.0 * self.pitch_ratio().log2()
    }

    /// Tempo factor that restores the original duration after resampling
    pub fn tempo_compensation(&self) -> f64 {
        1.0 / self.pitch_ratio()
    }

    /// Reinterpret the samples at `rate * target / reference`, convert back
    /// to `rate`, then stretch by the inverse ratio so the duration returns
    /// to the original
    pub fn shift(
        &self,
        engine: &dyn NativeAudioEngine,
        input: &AudioBuffer,
    ) -> Result<AudioBuffer, EngineError> {
        if input.is_empty() {
            return Err(EngineError::EmptyInput("retune"));
        }
        if self.reference_hz == self.target_hz {
            return Ok(input.clone());
        }

        let planes = resample_planar(&input.deinterleave(), self.target_hz, self.reference_hz)?;
        let lowered = AudioBuffer::from_planar(&planes, input.sample_rate());
        debug!(
            semitones = self.semitones(),
            frames = lowered.frames(),
            "Retuning: resampled, compensating tempo"
        );

        engine.stretch(&lowered, self.tempo_compensation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DspEngine;
    use rustfft::{num_complex::Complex, FftPlanner};
    use std::f32::consts::PI;

    fn sine(freq: f32, secs: usize, sample_rate: usize) -> AudioBuffer {
        let samples = (0..sample_rate * secs)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();
        AudioBuffer::new(samples, sample_rate as u32, 1)
    }

    /// Strongest frequency of a one-second, Hann-windowed excerpt
    fn dominant_hz(samples: &[f32], sample_rate: usize) -> f32 {
        let n = sample_rate;
        let mut spectrum: Vec<Complex<f32>> = samples[..n]
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos();
                Complex::new(s * w, 0.0)
            })
            .collect();
        FftPlanner::new().plan_fft_forward(n).process(&mut spectrum);

        let peak = (1..n / 2)
            .max_by(|&a, &b| spectrum[a].norm().total_cmp(&spectrum[b].norm()))
            .unwrap();
        peak as f32 * sample_rate as f32 / n as f32
    }

    #[test]
    fn test_a432_ratios() {
        let shifter = ToneShifter::a432();
        assert!((shifter.semitones() + 0.3176).abs() < 1e-3);
        assert!((shifter.tempo_compensation() - 1.0185185).abs() < 1e-6);
    }

    #[test]
    fn test_duration_preserved() {
        let sample_rate = 22050;
        let input = sine(440.0, 2, sample_rate);

        let out = ToneShifter::a432().shift(&DspEngine::new(), &input).unwrap();
        let drift = (out.frames() as f64 - input.frames() as f64).abs() / input.frames() as f64;
        assert!(drift < 0.005, "duration drifted by {}", drift);
        assert_eq!(out.sample_rate() as usize, sample_rate);
    }

    #[test]
    fn test_a440_lands_on_432() {
        let sample_rate = 22050;
        let input = sine(440.0, 3, sample_rate);
        let out = ToneShifter::a432().shift(&DspEngine::new(), &input).unwrap();

        // Middle second, away from the edges of the stretch
        let hz = dominant_hz(&out.samples()[sample_rate..], sample_rate);
        assert!((hz - 432.0).abs() <= 2.0, "dominant frequency {} Hz", hz);

        let drift = (out.frames() as f64 - input.frames() as f64).abs() / input.frames() as f64;
        assert!(drift < 0.005, "duration drifted by {}", drift);
    }

    #[test]
    fn test_identity_shift() {
        let input = AudioBuffer::from_mono(vec![0.2; 100], 8000);
        let out = ToneShifter::new(440, 440).shift(&DspEngine::new(), &input).unwrap();
        assert_eq!(out, input);
    }
}
