//! Offline phase vocoder for pitch-independent time-stretching.
//!
//! - Magnitudes interpolated between neighbouring analysis frames
//! - Phase accumulated from the measured instantaneous frequency
//! - Transient detection with phase reset (preserves attack clarity)

use crate::buffer::AudioBuffer;
use crate::error::EngineError;
use std::f32::consts::PI;
use woom_analysis::{Complex32, Stft};

const TWO_PI: f32 = 2.0 * PI;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;

/// Normalized spectral flux above which a frame counts as a transient
const DEFAULT_TRANSIENT_THRESHOLD: f32 = 0.6;

/// Phase vocoder processor for whole buffers
pub struct PhaseVocoder {
    /// STFT processor
    stft: Stft,
    /// Expected phase advance per bin over one hop
    omega: Vec<f32>,
    /// Transient threshold (0 - 1, lower resets more often)
    transient_threshold: f32,
}

impl Default for PhaseVocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseVocoder {
    /// Create new phase vocoder
    pub fn new() -> Self {
        let stft = Stft::new(FFT_SIZE, HOP_SIZE);
        let omega = (0..stft.num_bins())
            .map(|k| TWO_PI * k as f32 * HOP_SIZE as f32 / FFT_SIZE as f32)
            .collect();

        Self {
            stft,
            omega,
            transient_threshold: DEFAULT_TRANSIENT_THRESHOLD,
        }
    }

    /// Expected output length for `len` input samples at `rate`
    #[inline]
    pub fn output_len(len: usize, rate: f64) -> usize {
        (len as f64 / rate).round() as usize
    }

    /// Stretch every channel of a buffer by `rate` (> 1 is faster/shorter)
    pub fn stretch(&self, input: &AudioBuffer, rate: f64) -> Result<AudioBuffer, EngineError> {
        if input.is_empty() {
            return Err(EngineError::EmptyInput("stretch"));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(EngineError::Stretch(format!("invalid rate {}", rate)));
        }
        if rate == 1.0 {
            return Ok(input.clone());
        }

        let planes: Vec<Vec<f32>> = input
            .deinterleave()
            .iter()
            .map(|plane| self.stretch_channel(plane, rate))
            .collect();

        if planes.iter().flatten().any(|s| !s.is_finite()) {
            return Err(EngineError::Stretch("vocoder produced non-finite samples".into()));
        }
        Ok(AudioBuffer::from_planar(&planes, input.sample_rate()))
    }

    /// Stretch one channel; output holds `round(len / rate)` samples
    pub fn stretch_channel(&self, samples: &[f32], rate: f64) -> Vec<f32> {
        let out_len = Self::output_len(samples.len(), rate);
        if samples.is_empty() || out_len == 0 {
            return vec![0.0; out_len];
        }

        let spectrogram = self.stft.analyze(samples);
        let frames = &spectrogram.frames;
        let num_frames = frames.len();
        let num_bins = spectrogram.num_bins;
        let silent = vec![Complex32::new(0.0, 0.0); num_bins];

        let mut phase_accum: Vec<f32> = frames[0].iter().map(|c| c.arg()).collect();
        let mut out_frames = Vec::with_capacity((num_frames as f64 / rate).ceil() as usize + 1);
        let mut last_reset = 0usize;
        let mut t = 0.0f64;

        while t < num_frames as f64 {
            let left = t.floor() as usize;
            let alpha = (t - left as f64) as f32;
            let current = frame_or_silence(frames, left, &silent);
            let next = frame_or_silence(frames, left + 1, &silent);

            // A new analysis frame with a sharp onset restarts the phase
            // from the analysis so the attack is not smeared
            if left > last_reset && self.is_transient(&frames[left - 1], current) {
                for (acc, c) in phase_accum.iter_mut().zip(current) {
                    *acc = c.arg();
                }
                last_reset = left;
            }

            let mut out = Vec::with_capacity(num_bins);
            for k in 0..num_bins {
                let mag = (1.0 - alpha) * current[k].norm() + alpha * next[k].norm();
                out.push(Complex32::from_polar(mag, phase_accum[k]));

                let delta = next[k].arg() - current[k].arg() - self.omega[k];
                phase_accum[k] += self.omega[k] + Self::wrap_phase(delta);
            }
            out_frames.push(out);
            t += rate;
        }

        self.stft.synthesize(&out_frames, out_len)
    }

    /// Spectral flux of `current` over `previous`, relative to its energy
    fn is_transient(&self, previous: &[Complex32], current: &[Complex32]) -> bool {
        let mut flux = 0.0f32;
        let mut total = 0.0f32;
        for (prev, cur) in previous.iter().zip(current) {
            let mag = cur.norm();
            let diff = mag - prev.norm();
            // Only count increases (onset detection)
            if diff > 0.0 {
                flux += diff * diff;
            }
            total += mag * mag;
        }
        total > 1e-6 && flux.sqrt() / total.sqrt() > self.transient_threshold
    }

    /// Wrap phase to [-π, π]
    #[inline(always)]
    fn wrap_phase(phase: f32) -> f32 {
        phase - TWO_PI * ((phase + PI) / TWO_PI).floor()
    }
}

/// Analysis frame `index`, or silence past the end
#[inline]
fn frame_or_silence<'a>(
    frames: &'a [Vec<Complex32>],
    index: usize,
    silent: &'a [Complex32],
) -> &'a [Complex32] {
    frames.get(index).map(Vec::as_slice).unwrap_or(silent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    /// Dominant frequency estimated from positive-going zero crossings
    fn zero_crossing_freq(samples: &[f32], sample_rate: f32) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
            .count();
        crossings as f32 * sample_rate / samples.len() as f32
    }

    #[test]
    fn test_phase_wrap() {
        assert!((PhaseVocoder::wrap_phase(0.0)).abs() < 0.001);
        assert!((PhaseVocoder::wrap_phase(PI + 0.1) - (-PI + 0.1)).abs() < 0.001);
        assert!((PhaseVocoder::wrap_phase(-PI - 0.1) - (PI - 0.1)).abs() < 0.001);
        assert!((PhaseVocoder::wrap_phase(5.0 * TWO_PI + 0.5) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_output_lengths() {
        let pv = PhaseVocoder::new();
        let input = sine(440.0, 22050.0, 22050);
        for rate in [0.5, 0.857, 1.2, 2.0, 3.0] {
            let out = pv.stretch_channel(&input, rate);
            assert_eq!(out.len(), PhaseVocoder::output_len(input.len(), rate));
        }
    }

    #[test]
    fn test_pitch_preserved() {
        let pv = PhaseVocoder::new();
        let input = sine(440.0, 22050.0, 44100);
        let out = pv.stretch_channel(&input, 0.75);

        // Skip the edges where the window ramps
        let middle = &out[4096..out.len() - 4096];
        let freq = zero_crossing_freq(middle, 22050.0);
        assert!((freq - 440.0).abs() < 10.0, "frequency drifted to {}", freq);
    }

    #[test]
    fn test_stretch_buffer() {
        let pv = PhaseVocoder::new();
        let input = AudioBuffer::from_planar(
            &[sine(220.0, 22050.0, 11025), sine(330.0, 22050.0, 11025)],
            22050,
        );
        let out = pv.stretch(&input, 2.0).unwrap();
        assert_eq!(out.channels(), 2);
        assert_eq!(out.frames(), 5513);
    }

    #[test]
    fn test_invalid_rates() {
        let pv = PhaseVocoder::new();
        let input = AudioBuffer::from_mono(vec![0.1; 100], 22050);
        assert!(matches!(pv.stretch(&input, 0.0), Err(EngineError::Stretch(_))));
        assert!(matches!(pv.stretch(&input, f64::NAN), Err(EngineError::Stretch(_))));

        let empty = AudioBuffer::from_mono(Vec::new(), 22050);
        assert!(matches!(pv.stretch(&empty, 1.5), Err(EngineError::EmptyInput(_))));
    }

    #[test]
    fn test_unit_rate_is_copy() {
        let pv = PhaseVocoder::new();
        let input = AudioBuffer::from_mono(sine(100.0, 8000.0, 800), 8000);
        assert_eq!(pv.stretch(&input, 1.0).unwrap(), input);
    }
}
