//! Level measurement and normalization
//!
//! Two normalization modes:
//! - Clip: peak normalization followed by a strategy-specific level policy
//! - Background track: ITU-R BS.1770 / EBU R128 integrated loudness target
//!   with a true peak ceiling and a loudness range limit
//!
//! Integrated loudness uses gated 400ms blocks (75% overlap, -70 LUFS
//! absolute gate, -10 LU relative gate). Loudness range uses 3s short-term
//! blocks (-70 absolute, -20 LU relative gate) and reports P95 - P10.

use crate::buffer::{gain_to_db, AudioBuffer};
use crate::limiter::{TruePeakDetector, TruePeakLimiter};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Headroom left below full scale by peak normalization
pub const PEAK_HEADROOM_DB: f32 = 0.1;

/// Reported for silence and for signals with no block above the gate
const LUFS_FLOOR: f64 = -70.0;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
const RANGE_RELATIVE_GATE_LU: f64 = -20.0;

const BLOCK_SECS: f64 = 0.4;
const SHORT_TERM_SECS: f64 = 3.0;
const STEP_SECS: f64 = 0.1;

/// Limit on the gain the range compressor may apply to one block
const MAX_RANGE_GAIN_DB: f64 = 12.0;

/// How the clip level is adjusted after peak normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelPolicy {
    /// Add `boost_db` once if the mean level is below `floor_db`
    FloorBoost { floor_db: f32, boost_db: f32 },
    /// Always add `gain_db`
    FixedGain { gain_db: f32 },
    /// Leave the level alone
    Unchanged,
}

/// Loudness normalization target for the background track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessTarget {
    /// Integrated loudness in LUFS
    pub integrated_lufs: f32,
    /// True peak ceiling in dBTP
    pub true_peak_db: f32,
    /// Loudness range in LU
    pub loudness_range_lu: f32,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated_lufs: -16.0,
            true_peak_db: -1.5,
            loudness_range_lu: 11.0,
        }
    }
}

/// Result of measuring a buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeasurement {
    pub integrated_lufs: f32,
    pub true_peak_db: f32,
    pub loudness_range_lu: f32,
}

/// Biquad coefficients, `a0 == 1`
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn run(&self, signal: &mut [f64]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
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

/// K-weighting pre-filter (high shelf) and RLB high-pass
fn k_weighting(sample_rate: u32) -> [Biquad; 2] {
    let fs = sample_rate as f64;

    if (fs - 48000.0).abs() < 1.0 {
        // Exact coefficients from ITU-R BS.1770-4 for 48kHz
        return [
            Biquad {
                b0: 1.53512485958697,
                b1: -2.69169618940638,
                b2: 1.19839281085285,
                a1: -1.69065929318241,
                a2: 0.73248077421585,
            },
            Biquad {
                b0: 1.0,
                b1: -2.0,
                b2: 1.0,
                a1: -1.99004745483398,
                a2: 0.99007225036621,
            },
        ];
    }

    // Other rates: high shelf and high-pass designed from the same analog
    // prototypes
    let f0 = 1681.974450955533;
    let gain_db = 3.999843853973347;
    let q = 0.7071752369554196;
    let a = 10.0f64.powf(gain_db / 40.0);
    let omega = 2.0 * PI * f0 / fs;
    let (sin_omega, cos_omega) = omega.sin_cos();
    let alpha = sin_omega / (2.0 * q);
    let a0 = (a + 1.0) - (a - 1.0) * cos_omega + 2.0 * a.sqrt() * alpha;
    let shelf = Biquad {
        b0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + 2.0 * a.sqrt() * alpha)) / a0,
        b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
        b2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - 2.0 * a.sqrt() * alpha)) / a0,
        a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
        a2: ((a + 1.0) - (a - 1.0) * cos_omega - 2.0 * a.sqrt() * alpha) / a0,
    };

    let f0 = 38.13547087602444;
    let q = 0.5003270373238773;
    let omega = 2.0 * PI * f0 / fs;
    let (sin_omega, cos_omega) = omega.sin_cos();
    let alpha = sin_omega / (2.0 * q);
    let a0 = 1.0 + alpha;
    let high_pass = Biquad {
        b0: ((1.0 + cos_omega) / 2.0) / a0,
        b1: (-(1.0 + cos_omega)) / a0,
        b2: ((1.0 + cos_omega) / 2.0) / a0,
        a1: (-2.0 * cos_omega) / a0,
        a2: (1.0 - alpha) / a0,
    };

    [shelf, high_pass]
}

/// Mean square to LUFS
#[inline]
fn power_to_lufs(power: f64) -> f64 {
    if power > 1e-10 {
        -0.691 + 10.0 * power.log10()
    } else {
        LUFS_FLOOR
    }
}

/// Per-frame K-weighted power summed over channels
fn weighted_power(buffer: &AudioBuffer) -> Vec<f64> {
    let filters = k_weighting(buffer.sample_rate());
    let mut power = vec![0.0f64; buffer.frames()];
    for plane in buffer.deinterleave() {
        let mut signal: Vec<f64> = plane.iter().map(|&s| s as f64).collect();
        for filter in &filters {
            filter.run(&mut signal);
        }
        for (p, s) in power.iter_mut().zip(&signal) {
            *p += s * s;
        }
    }
    power
}

/// Mean power of overlapping blocks; one block over everything when the
/// signal is shorter than a block
fn block_powers(power: &[f64], block: usize, step: usize) -> Vec<f64> {
    if power.is_empty() {
        return Vec::new();
    }
    if power.len() <= block {
        return vec![power.iter().sum::<f64>() / power.len() as f64];
    }

    let mut prefix = Vec::with_capacity(power.len() + 1);
    prefix.push(0.0);
    for p in power {
        prefix.push(prefix[prefix.len() - 1] + p);
    }

    (0..=(power.len() - block) / step)
        .map(|b| {
            let start = b * step;
            (prefix[start + block] - prefix[start]) / block as f64
        })
        .collect()
}

/// Gated integrated loudness of a set of block powers
fn gated_loudness(blocks: &[f64]) -> f64 {
    let above_absolute: Vec<f64> = blocks
        .iter()
        .copied()
        .filter(|&p| power_to_lufs(p) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return LUFS_FLOOR;
    }

    let ungated = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_gate = power_to_lufs(ungated) + RELATIVE_GATE_LU;
    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&p| power_to_lufs(p) > relative_gate)
        .collect();
    if gated.is_empty() {
        return power_to_lufs(ungated);
    }
    power_to_lufs(gated.iter().sum::<f64>() / gated.len() as f64)
}

/// Loudness range (P95 - P10 of gated short-term loudness)
fn loudness_range(short_term: &[f64]) -> f64 {
    let above_absolute: Vec<f64> = short_term
        .iter()
        .copied()
        .filter(|&p| power_to_lufs(p) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.len() < 2 {
        return 0.0;
    }

    let mean = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let gate = power_to_lufs(mean) + RANGE_RELATIVE_GATE_LU;
    let mut levels: Vec<f64> = above_absolute
        .into_iter()
        .map(power_to_lufs)
        .filter(|&l| l > gate)
        .collect();
    if levels.len() < 2 {
        return 0.0;
    }
    levels.sort_by(|a, b| a.total_cmp(b));
    percentile(&levels, 0.95) - percentile(&levels, 0.10)
}

/// Linear-interpolated percentile of sorted values
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let frac = pos - lower as f64;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

/// Level measurement plus clip and track normalization
#[derive(Debug, Clone, Copy, Default)]
pub struct LoudnessNormalizer {
    target: LoudnessTarget,
}

impl LoudnessNormalizer {
    pub fn new(target: LoudnessTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> LoudnessTarget {
        self.target
    }

    /// RMS level over every sample in dBFS (`-inf` for silence or empty)
    pub fn mean_dbfs(buffer: &AudioBuffer) -> f32 {
        if buffer.is_empty() {
            return f32::NEG_INFINITY;
        }
        let sum: f64 = buffer.samples().iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum / buffer.samples().len() as f64).sqrt();
        gain_to_db(rms as f32)
    }

    /// Sample peak in dBFS
    pub fn peak_dbfs(buffer: &AudioBuffer) -> f32 {
        gain_to_db(buffer.peak())
    }

    /// Scale so the sample peak sits `PEAK_HEADROOM_DB` below full scale
    pub fn normalize_peak(buffer: &AudioBuffer) -> AudioBuffer {
        let peak = buffer.peak();
        if peak <= 0.0 {
            return buffer.clone();
        }
        buffer.with_gain_db(-PEAK_HEADROOM_DB - gain_to_db(peak))
    }

    /// Apply a level policy once
    pub fn apply_level_policy(buffer: &AudioBuffer, policy: LevelPolicy) -> AudioBuffer {
        match policy {
            LevelPolicy::FloorBoost { floor_db, boost_db } => {
                let level = Self::mean_dbfs(buffer);
                if level < floor_db {
                    debug!(level, floor_db, boost_db, "Clip below floor, boosting");
                    buffer.with_gain_db(boost_db)
                } else {
                    buffer.clone()
                }
            }
            LevelPolicy::FixedGain { gain_db } => buffer.with_gain_db(gain_db),
            LevelPolicy::Unchanged => buffer.clone(),
        }
    }

    /// Peak-normalize the clip then apply its level policy
    pub fn normalize_clip(&self, buffer: &AudioBuffer, policy: LevelPolicy) -> AudioBuffer {
        Self::apply_level_policy(&Self::normalize_peak(buffer), policy)
    }

    /// Integrated loudness, true peak and loudness range
    pub fn measure(buffer: &AudioBuffer) -> LoudnessMeasurement {
        let rate = buffer.sample_rate() as f64;
        let power = weighted_power(buffer);
        let step = ((STEP_SECS * rate) as usize).max(1);

        let blocks = block_powers(&power, (BLOCK_SECS * rate) as usize, step);
        let integrated = gated_loudness(&blocks);

        let short_term_len = (SHORT_TERM_SECS * rate) as usize;
        let range = if power.len() >= short_term_len {
            loudness_range(&block_powers(&power, short_term_len, step))
        } else {
            0.0
        };

        let true_peak = TruePeakDetector::new().buffer_peak(buffer);

        LoudnessMeasurement {
            integrated_lufs: integrated as f32,
            true_peak_db: gain_to_db(true_peak),
            loudness_range_lu: range as f32,
        }
    }

    /// Bring a track to the target loudness, range and true peak ceiling
    pub fn normalize_track(&self, buffer: &AudioBuffer) -> AudioBuffer {
        if buffer.is_empty() {
            return buffer.clone();
        }

        let measured = Self::measure(buffer);
        debug!(
            integrated_lufs = measured.integrated_lufs,
            true_peak_db = measured.true_peak_db,
            loudness_range_lu = measured.loudness_range_lu,
            "Measured track loudness"
        );

        if measured.integrated_lufs as f64 <= LUFS_FLOOR {
            warn!(stage = "loudnorm", "Track is silent, skipping loudness normalization");
            return buffer.clone();
        }

        let (source, integrated) = if measured.loudness_range_lu > self.target.loudness_range_lu
        {
            let compressed = self.compress_range(buffer, measured);
            let integrated = Self::measure(&compressed).integrated_lufs;
            (compressed, integrated)
        } else {
            (buffer.clone(), measured.integrated_lufs)
        };

        let gain_db = self.target.integrated_lufs - integrated;
        let leveled = source.with_gain_db(gain_db);

        debug!(gain_db, ceiling_db = self.target.true_peak_db, "Applying loudness gain");
        TruePeakLimiter::new(buffer.sample_rate(), self.target.true_peak_db).process(&leveled)
    }

    /// Pull short-term loudness toward the integrated level so the range
    /// shrinks by `target / measured`
    fn compress_range(&self, buffer: &AudioBuffer, measured: LoudnessMeasurement) -> AudioBuffer {
        let rate = buffer.sample_rate() as f64;
        let ratio = (self.target.loudness_range_lu / measured.loudness_range_lu) as f64;
        let power = weighted_power(buffer);
        let step = ((STEP_SECS * rate) as usize).max(1);
        let window = (SHORT_TERM_SECS * rate) as usize;
        let integrated = measured.integrated_lufs as f64;

        let blocks = block_powers(&power, window, step);
        let block_gains: Vec<f64> = blocks
            .iter()
            .map(|&p| {
                let level = power_to_lufs(p);
                if level <= ABSOLUTE_GATE_LUFS {
                    0.0
                } else {
                    ((level - integrated) * (ratio - 1.0))
                        .clamp(-MAX_RANGE_GAIN_DB, MAX_RANGE_GAIN_DB)
                }
            })
            .collect();
        if block_gains.is_empty() {
            return buffer.clone();
        }

        debug!(
            ratio,
            blocks = block_gains.len(),
            "Compressing loudness range"
        );

        // Interpolate block gains across frames, anchored at block centers
        let half = window as f64 / 2.0;
        let channels = buffer.channels() as usize;
        let mut samples = Vec::with_capacity(buffer.samples().len());
        for (frame_idx, frame) in buffer.samples().chunks_exact(channels).enumerate() {
            let pos = ((frame_idx as f64 - half) / step as f64).max(0.0);
            let lower = (pos.floor() as usize).min(block_gains.len() - 1);
            let upper = (lower + 1).min(block_gains.len() - 1);
            let frac = (pos - lower as f64).clamp(0.0, 1.0);
            let gain_db = block_gains[lower] * (1.0 - frac) + block_gains[upper] * frac;
            let gain = 10.0f64.powf(gain_db / 20.0) as f32;
            samples.extend(frame.iter().map(|s| s * gain));
        }

        AudioBuffer::new(samples, buffer.sample_rate(), buffer.channels())
    }
}
