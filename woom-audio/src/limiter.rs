//! True peak detection and brickwall limiting for whole buffers
//!
//! - 4x oversampled true peak detection (windowed-sinc polyphase interpolation)
//! - Sliding-minimum gain hold via a monotonic deque
//! - Moving-average smoothing that starts the gain ramp before each peak

use crate::buffer::{db_to_gain, AudioBuffer};
use std::collections::VecDeque;
use std::f32::consts::PI;

/// Lookahead (and hold radius) in milliseconds
const LOOKAHEAD_MS: f32 = 5.0;

const OVERSAMPLING_FACTOR: usize = 4;

/// Interpolation taps per phase, centered between sample n and n + 1
const OVERSAMPLING_TAPS: usize = 16;

/// Polyphase interpolator used to estimate inter-sample peaks
pub(crate) struct TruePeakDetector {
    /// One row per fractional offset 1/4, 2/4, 3/4
    phases: [[f32; OVERSAMPLING_TAPS]; OVERSAMPLING_FACTOR - 1],
}

impl TruePeakDetector {
    pub(crate) fn new() -> Self {
        let half = (OVERSAMPLING_TAPS / 2) as f32;
        let mut phases = [[0.0; OVERSAMPLING_TAPS]; OVERSAMPLING_FACTOR - 1];

        for (p, row) in phases.iter_mut().enumerate() {
            let frac = (p + 1) as f32 / OVERSAMPLING_FACTOR as f32;
            for (tap, coeff) in row.iter_mut().enumerate() {
                // Tap `tap` reads sample n + tap - 7
                let t = frac - (tap as f32 - (half - 1.0));
                let window = 0.5 * (1.0 + (PI * t / half).cos());
                *coeff = sinc(t) * window;
            }
        }
        Self { phases }
    }

    /// Peak per sample of one channel including the oversampled points that
    /// follow it
    pub(crate) fn sample_peaks(&self, plane: &[f32]) -> Vec<f32> {
        let n = plane.len() as isize;
        let offset = (OVERSAMPLING_TAPS / 2 - 1) as isize;
        let at = |i: isize| if i >= 0 && i < n { plane[i as usize] } else { 0.0 };

        (0..n)
            .map(|i| {
                let mut peak = plane[i as usize].abs();
                for row in &self.phases {
                    let value: f32 = row
                        .iter()
                        .enumerate()
                        .map(|(tap, coeff)| at(i + tap as isize - offset) * coeff)
                        .sum();
                    peak = peak.max(value.abs());
                }
                peak
            })
            .collect()
    }

    /// Highest true peak over every channel (linear)
    pub(crate) fn buffer_peak(&self, buffer: &AudioBuffer) -> f32 {
        buffer
            .deinterleave()
            .iter()
            .flat_map(|plane| self.sample_peaks(plane))
            .fold(0.0f32, f32::max)
    }
}

#[inline]
fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Sliding window minimum over `[i - radius, i + radius]`
///
/// Monotonic deque holding indices with increasing values; the front is
/// always the current minimum. Amortized O(1) per sample.
fn sliding_min(values: &[f32], radius: usize) -> Vec<f32> {
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    let mut deque: VecDeque<usize> = VecDeque::with_capacity(2 * radius + 2);
    let mut next = 0;

    for i in 0..n {
        let window_end = (i + radius).min(n - 1);
        while next <= window_end {
            while let Some(&back) = deque.back() {
                if values[back] >= values[next] {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(next);
            next += 1;
        }
        while let Some(&front) = deque.front() {
            if front + radius < i {
                deque.pop_front();
            } else {
                break;
            }
        }
        out.push(deque.front().map(|&idx| values[idx]).unwrap_or(1.0));
    }
    out
}

/// Offline lookahead limiter with a true peak ceiling
pub struct TruePeakLimiter {
    ceiling: f32,
    lookahead: usize,
    detector: TruePeakDetector,
}

impl TruePeakLimiter {
    pub fn new(sample_rate: u32, ceiling_db: f32) -> Self {
        Self {
            ceiling: db_to_gain(ceiling_db),
            lookahead: ((sample_rate as f32 * LOOKAHEAD_MS / 1000.0) as usize).max(1),
            detector: TruePeakDetector::new(),
        }
    }

    /// Per-frame gain keeping every true peak at or below the ceiling
    fn gain_curve(&self, input: &AudioBuffer) -> Vec<f32> {
        let frames = input.frames();
        let mut frame_peaks = vec![0.0f32; frames];
        for plane in input.deinterleave() {
            for (peak, p) in frame_peaks.iter_mut().zip(self.detector.sample_peaks(&plane)) {
                *peak = peak.max(p);
            }
        }

        let target: Vec<f32> = frame_peaks
            .iter()
            .map(|&p| if p > self.ceiling { self.ceiling / p } else { 1.0 })
            .collect();

        // Hold the lowest gain for the lookahead radius, then average over
        // the preceding lookahead samples. Every window that contains a peak
        // frame is fully covered by its hold, so the smoothed gain never
        // exceeds the target at that frame.
        let held = sliding_min(&target, self.lookahead);
        let mut smoothed = Vec::with_capacity(frames);
        let mut sum = 0.0f64;
        for i in 0..frames {
            sum += held[i] as f64;
            if i > self.lookahead {
                sum -= held[i - self.lookahead - 1] as f64;
            }
            let count = (i + 1).min(self.lookahead + 1);
            smoothed.push((sum / count as f64) as f32);
        }
        smoothed
    }

    /// Limit a buffer, returning a new one
    pub fn process(&self, input: &AudioBuffer) -> AudioBuffer {
        if input.is_empty() {
            return input.clone();
        }

        let gains = self.gain_curve(input);
        let channels = input.channels() as usize;
        let samples = input
            .samples()
            .chunks_exact(channels)
            .zip(&gains)
            .flat_map(|(frame, &gain)| {
                // Final safety clamp; only inter-sample overshoot can reach it
                frame
                    .iter()
                    .map(move |s| (s * gain).clamp(-self.ceiling, self.ceiling))
            })
            .collect();

        AudioBuffer::new(samples, input.sample_rate(), input.channels())
    }
}
