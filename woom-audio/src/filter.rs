//! Zero-phase Butterworth low-pass
//!
//! The filter is a cascade of second-order sections (plus one first-order
//! section for odd orders) designed with the bilinear transform. It runs
//! forward then backward over an odd-extended copy of each channel, so the
//! result has no phase shift and the magnitude response is squared.

use crate::buffer::AudioBuffer;
use crate::error::EngineError;
use std::f64::consts::PI;
use tracing::debug;

/// Default cutoff used for clip conditioning
pub const DEFAULT_CUTOFF_HZ: f32 = 500.0;

/// Default Butterworth order
pub const DEFAULT_ORDER: usize = 5;

/// One filter section, coefficients normalized so `a0 == 1`
#[derive(Debug, Clone, Copy)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Section {
    fn second_order(omega: f64, q: f64) -> Self {
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos_omega) / 2.0 / a0,
            b1: (1.0 - cos_omega) / a0,
            b2: (1.0 - cos_omega) / 2.0 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn first_order(omega: f64) -> Self {
        let k = (omega / 2.0).tan();
        Self {
            b0: k / (1.0 + k),
            b1: k / (1.0 + k),
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }

    /// Filter in place, starting from the steady state of a constant input
    /// equal to the first sample (unity DC gain makes that state trivial)
    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let (mut x1, mut x2, mut y1, mut y2) = (first, first, first, first);
        for sample in signal.iter_mut() {
            let x = *sample;
            let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            *sample = y;
        }
    }
}

/// Butterworth low-pass applied with zero phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandFilter {
    cutoff_hz: f32,
    order: usize,
}

impl Default for BandFilter {
    fn default() -> Self {
        Self::low_pass(DEFAULT_CUTOFF_HZ)
    }
}

impl BandFilter {
    pub fn low_pass(cutoff_hz: f32) -> Self {
        Self {
            cutoff_hz,
            order: DEFAULT_ORDER,
        }
    }

    /// Set the filter order (1 - 10)
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order.clamp(1, 10);
        self
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Edge padding per side; buffers of this many frames or fewer pass through
    pub fn padding_len(&self) -> usize {
        3 * (self.order + 1)
    }

    /// Filter every channel of `input`
    pub fn apply(&self, input: &AudioBuffer) -> Result<AudioBuffer, EngineError> {
        let sample_rate = input.sample_rate() as f32;
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < sample_rate / 2.0) {
            return Err(EngineError::Filter(format!(
                "cutoff {} Hz outside (0, {}) at {} Hz",
                self.cutoff_hz,
                sample_rate / 2.0,
                input.sample_rate()
            )));
        }

        if input.frames() <= self.padding_len() {
            debug!(
                frames = input.frames(),
                padding = self.padding_len(),
                "Buffer shorter than filter padding, passing through"
            );
            return Ok(input.clone());
        }

        let sections = self.design(input.sample_rate());
        let planes = input
            .deinterleave()
            .iter()
            .map(|plane| self.filtfilt(&sections, plane))
            .collect::<Vec<_>>();

        if planes.iter().flatten().any(|s| !s.is_finite()) {
            return Err(EngineError::Filter("filter produced non-finite samples".into()));
        }

        Ok(AudioBuffer::from_planar(&planes, input.sample_rate()))
    }

    /// Sections of the cascade for a given sample rate
    fn design(&self, sample_rate: u32) -> Vec<Section> {
        let n = self.order;
        let omega = 2.0 * PI * self.cutoff_hz as f64 / sample_rate as f64;

        // Conjugate pole pairs sit at angles (n - 1 - 2k) * pi / 2n from the
        // negative real axis
        let mut sections: Vec<Section> = (0..n / 2)
            .map(|k| {
                let angle = PI * (n - 1 - 2 * k) as f64 / (2 * n) as f64;
                Section::second_order(omega, 1.0 / (2.0 * angle.cos()))
            })
            .collect();

        if n % 2 == 1 {
            sections.push(Section::first_order(omega));
        }
        sections
    }

    fn filtfilt(&self, sections: &[Section], input: &[f32]) -> Vec<f32> {
        let n = input.len();
        let pad = self.padding_len();

        // Odd extension: reflect around the end points
        let first = input[0] as f64;
        let last = input[n - 1] as f64;
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - input[i] as f64));
        extended.extend(input.iter().map(|&s| s as f64));
        extended.extend((1..=pad).map(|i| 2.0 * last - input[n - 1 - i] as f64));

        for section in sections {
            section.run(&mut extended);
        }
        extended.reverse();
        for section in sections {
            section.run(&mut extended);
        }
        extended.reverse();

        extended[pad..pad + n].iter().map(|&s| s as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI as PI32;

    fn sine(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI32 * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_padding_len() {
        assert_eq!(BandFilter::default().padding_len(), 18);
        assert_eq!(BandFilter::low_pass(500.0).with_order(2).padding_len(), 9);
    }

    #[test]
    fn test_short_buffer_passes_through() {
        let filter = BandFilter::default();
        let input = AudioBuffer::new(vec![0.3, -0.7, 0.9, 0.1, -0.2, 0.4], 44100, 2);
        let output = filter.apply(&input).unwrap();
        assert_eq!(output, input);

        let boundary = AudioBuffer::from_mono(vec![0.5; 18], 44100);
        assert_eq!(filter.apply(&boundary).unwrap(), boundary);
    }

    #[test]
    fn test_high_frequency_removed() {
        let input = AudioBuffer::from_mono(sine(5000.0, 44100, 44100), 44100);
        let output = BandFilter::default().apply(&input).unwrap();
        assert!(rms(output.samples()) < 0.01 * rms(input.samples()));
    }

    #[test]
    fn test_passband_is_zero_phase() {
        let input = AudioBuffer::from_mono(sine(100.0, 44100, 44100), 44100);
        let output = BandFilter::default().apply(&input).unwrap();

        assert_eq!(output.frames(), input.frames());
        // Away from the edges the output tracks the input sample for sample
        for i in 4000..40000 {
            let diff = (output.samples()[i] - input.samples()[i]).abs();
            assert!(diff < 0.02, "sample {} differs by {}", i, diff);
        }
    }

    #[test]
    fn test_channels_filtered_independently() {
        let left = sine(100.0, 44100, 4410);
        let right = vec![0.25; 4410];
        let input = AudioBuffer::from_planar(&[left, right], 44100);
        let output = BandFilter::default().apply(&input).unwrap();
        let planes = output.deinterleave();
        // DC passes unchanged
        assert!(planes[1].iter().all(|s| (s - 0.25).abs() < 1e-4));
        assert!(rms(&planes[0]) > 0.3);
    }

    #[test]
    fn test_invalid_cutoff() {
        let input = AudioBuffer::from_mono(vec![0.0; 1000], 8000);
        let result = BandFilter::low_pass(5000.0).apply(&input);
        assert!(matches!(result, Err(EngineError::Filter(_))));
    }
}
