//! Offline short-time Fourier transform
//!
//! Centered framing: the signal is zero-padded by half a frame on both
//! sides so frame `i` is centered on sample `i * hop_size`. Synthesis is
//! weighted overlap-add normalized by the summed squared window, so an
//! unmodified spectrogram resynthesizes to the original signal.

pub use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Frames of positive-frequency bins for a mono signal
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// One entry per frame, `num_bins` bins each
    pub frames: Vec<Vec<Complex32>>,
    /// Bins per frame (`fft_size / 2 + 1`)
    pub num_bins: usize,
    /// Length of the analysed signal in samples
    pub signal_len: usize,
}

impl Spectrogram {
    /// Magnitudes laid out `[frame][bin]`
    pub fn magnitudes(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect()
    }
}

/// Forward and inverse STFT with a periodic Hann window
pub struct Stft {
    fft_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    /// Create an STFT processor (`hop_size` must not exceed `fft_size`)
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let hop_size = hop_size.clamp(1, fft_size);
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            fft_size,
            hop_size,
            window,
            forward,
            inverse,
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Number of frames `analyze` produces for a signal of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            1 + len / self.hop_size
        }
    }

    /// Analyze a mono signal
    pub fn analyze(&self, signal: &[f32]) -> Spectrogram {
        let num_bins = self.num_bins();
        let pad = self.fft_size / 2;
        let num_frames = self.frame_count(signal.len());

        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.fft_size];

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_size;
            for (i, slot) in buffer.iter_mut().enumerate() {
                // Position in the unpadded signal; outside it is zero padding
                let sample = (start + i)
                    .checked_sub(pad)
                    .and_then(|pos| signal.get(pos))
                    .copied()
                    .unwrap_or(0.0);
                *slot = Complex32::new(sample * self.window[i], 0.0);
            }

            self.forward.process(&mut buffer);
            frames.push(buffer[..num_bins].to_vec());
        }

        Spectrogram {
            frames,
            num_bins,
            signal_len: signal.len(),
        }
    }

    /// Resynthesize `frames` into a signal of exactly `len` samples
    pub fn synthesize(&self, frames: &[Vec<Complex32>], len: usize) -> Vec<f32> {
        if frames.is_empty() || len == 0 {
            return vec![0.0; len];
        }

        let num_bins = self.num_bins();
        let pad = self.fft_size / 2;
        let total = (frames.len() - 1) * self.hop_size + self.fft_size;
        let mut output = vec![0.0f32; total];
        let mut norm = vec![0.0f32; total];
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.fft_size];
        let scale = 1.0 / self.fft_size as f32;

        for (frame_idx, bins) in frames.iter().enumerate() {
            // Rebuild the conjugate-symmetric spectrum
            for k in 0..self.fft_size {
                buffer[k] = if k < num_bins {
                    bins.get(k).copied().unwrap_or_default()
                } else {
                    bins.get(self.fft_size - k)
                        .copied()
                        .unwrap_or_default()
                        .conj()
                };
            }

            self.inverse.process(&mut buffer);

            let start = frame_idx * self.hop_size;
            for (i, value) in buffer.iter().enumerate() {
                let w = self.window[i];
                output[start + i] += value.re * scale * w;
                norm[start + i] += w * w;
            }
        }

        for (sample, n) in output.iter_mut().zip(&norm) {
            if *n > 1e-8 {
                *sample /= n;
            }
        }

        let mut signal: Vec<f32> = output.into_iter().skip(pad).take(len).collect();
        signal.resize(len, 0.0);
        signal
    }
}
