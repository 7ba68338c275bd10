//! Harmonic/percussive source separation
//!
//! Median filtering a magnitude spectrogram along time keeps sustained
//! (harmonic) partials, along frequency keeps broadband (percussive)
//! transients. Soft masks built from the two filtered spectrograms split
//! the complex STFT, which is then resynthesized per component.
//!
//! For heartbeat recordings the percussive part is the rhythm; the
//! harmonic part is mostly hum and fluid noise.

use crate::stft::Stft;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;
const DEFAULT_KERNEL: usize = 31;
const DEFAULT_POWER: f32 = 2.0;

/// Harmonic and percussive parts of a mono signal, same length as the input
#[derive(Debug, Clone, Default)]
pub struct HpssComponents {
    pub harmonic: Vec<f32>,
    pub percussive: Vec<f32>,
}

/// Median-filter harmonic/percussive separator
pub struct SpectralSeparator {
    stft: Stft,
    kernel_size: usize,
    power: f32,
}

impl Default for SpectralSeparator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralSeparator {
    pub fn new() -> Self {
        Self {
            stft: Stft::new(FFT_SIZE, HOP_SIZE),
            kernel_size: DEFAULT_KERNEL,
            power: DEFAULT_POWER,
        }
    }

    /// Median filter length in frames/bins (forced odd)
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size.max(1) | 1;
        self
    }

    /// Soft mask exponent (higher = harder masks)
    pub fn with_power(mut self, power: f32) -> Self {
        self.power = power.max(0.1);
        self
    }

    /// Split a mono signal into harmonic and percussive components
    pub fn separate(&self, samples: &[f32]) -> HpssComponents {
        if samples.is_empty() {
            return HpssComponents::default();
        }

        let spectrogram = self.stft.analyze(samples);
        let magnitudes = spectrogram.magnitudes();
        let num_frames = magnitudes.len();
        let num_bins = spectrogram.num_bins;

        // Harmonic: median across time for every bin
        let mut harmonic_mag = vec![vec![0.0f32; num_bins]; num_frames];
        let mut column = vec![0.0f32; num_frames];
        let mut filtered = vec![0.0f32; num_frames];
        for bin in 0..num_bins {
            for (frame, value) in column.iter_mut().enumerate() {
                *value = magnitudes[frame][bin];
            }
            median_filter(&column, self.kernel_size, &mut filtered);
            for (frame, &value) in filtered.iter().enumerate() {
                harmonic_mag[frame][bin] = value;
            }
        }

        // Percussive: median across frequency within every frame
        let mut percussive_mag = vec![vec![0.0f32; num_bins]; num_frames];
        for (frame, row) in magnitudes.iter().enumerate() {
            median_filter(row, self.kernel_size, &mut percussive_mag[frame]);
        }

        let mut harmonic_frames = Vec::with_capacity(num_frames);
        let mut percussive_frames = Vec::with_capacity(num_frames);
        for (frame_idx, frame) in spectrogram.frames.iter().enumerate() {
            let mut h_frame = Vec::with_capacity(num_bins);
            let mut p_frame = Vec::with_capacity(num_bins);
            for (bin, &value) in frame.iter().enumerate() {
                let (h_mask, p_mask) = self.soft_masks(
                    harmonic_mag[frame_idx][bin],
                    percussive_mag[frame_idx][bin],
                );
                h_frame.push(value * h_mask);
                p_frame.push(value * p_mask);
            }
            harmonic_frames.push(h_frame);
            percussive_frames.push(p_frame);
        }

        HpssComponents {
            harmonic: self.stft.synthesize(&harmonic_frames, samples.len()),
            percussive: self.stft.synthesize(&percussive_frames, samples.len()),
        }
    }

    /// Percussive component only
    pub fn percussive(&self, samples: &[f32]) -> Vec<f32> {
        self.separate(samples).percussive
    }

    /// Wiener-style soft masks; both zero where both references are silent
    #[inline]
    fn soft_masks(&self, harmonic: f32, percussive: f32) -> (f32, f32) {
        let reference = harmonic.max(percussive);
        if reference <= f32::MIN_POSITIVE {
            return (0.0, 0.0);
        }
        let h = (harmonic / reference).powf(self.power);
        let p = (percussive / reference).powf(self.power);
        let total = h + p;
        (h / total, p / total)
    }
}

/// Sliding median with reflected edges (`d c b a | a b c d | d c b a`)
fn median_filter(input: &[f32], size: usize, output: &mut [f32]) {
    let n = input.len();
    if n == 0 {
        return;
    }
    let half = size / 2;
    let mut window = vec![0.0f32; size];

    for (i, out) in output.iter_mut().enumerate().take(n) {
        for (w, slot) in window.iter_mut().enumerate() {
            let offset = i as isize + w as isize - half as isize;
            *slot = input[reflect_index(offset, n)];
        }
        let mid = size / 2;
        let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *out = *median;
    }
}

#[inline]
fn reflect_index(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - 1 - i;
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
    }

    #[test]
    fn test_median_filter_removes_spike() {
        let input = [1.0, 1.0, 9.0, 1.0, 1.0];
        let mut output = [0.0; 5];
        median_filter(&input, 3, &mut output);
        assert_eq!(output, [1.0; 5]);
    }

    #[test]
    fn test_components_preserve_length() {
        let separator = SpectralSeparator::new();
        let signal: Vec<f32> = (0..10_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let parts = separator.separate(&signal);
        assert_eq!(parts.harmonic.len(), signal.len());
        assert_eq!(parts.percussive.len(), signal.len());
    }

    #[test]
    fn test_steady_tone_is_harmonic() {
        let sample_rate = 22050.0;
        let signal: Vec<f32> = (0..22050)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate).sin() * 0.5)
            .collect();

        let parts = SpectralSeparator::new().separate(&signal);
        assert!(
            rms(&parts.harmonic) > 4.0 * rms(&parts.percussive),
            "tone should land in the harmonic part"
        );
    }

    #[test]
    fn test_clicks_are_percussive() {
        let mut signal = vec![0.0f32; 22050];
        for start in (1000..22050).step_by(5000) {
            signal[start] = 1.0;
            signal[start + 1] = -1.0;
        }

        let parts = SpectralSeparator::new().separate(&signal);
        assert!(
            rms(&parts.percussive) > 2.0 * rms(&parts.harmonic),
            "clicks should land in the percussive part"
        );
    }

    #[test]
    fn test_empty_input() {
        let parts = SpectralSeparator::new().separate(&[]);
        assert!(parts.harmonic.is_empty());
        assert!(parts.percussive.is_empty());
    }
}
