//! Leading-silence removal and fixed-length windowing

use crate::buffer::{db_to_gain, gain_to_db, AudioBuffer};
use tracing::{debug, warn};

/// Floor used for the dynamic threshold and as its value on silent input
const DYNAMIC_FLOOR_DB: f32 = -50.0;
/// Dynamic threshold sits this far below the peak
const DYNAMIC_BELOW_PEAK_DB: f32 = 30.0;
/// Smallest amplitude considered when converting a peak to dB
const AMPLITUDE_FLOOR: f32 = 1e-5;

/// How the silence threshold is chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SilenceThreshold {
    /// Fixed level in dBFS
    Fixed { db: f32 },
    /// `max(floor_db, peak_db - below_peak_db)`, or `floor_db` when silent
    Dynamic { floor_db: f32, below_peak_db: f32 },
}

impl SilenceThreshold {
    pub const fn fixed(db: f32) -> Self {
        Self::Fixed { db }
    }

    pub const fn dynamic() -> Self {
        Self::Dynamic {
            floor_db: DYNAMIC_FLOOR_DB,
            below_peak_db: DYNAMIC_BELOW_PEAK_DB,
        }
    }

    /// Resolve the threshold in dBFS for a given buffer
    pub fn resolve(&self, buffer: &AudioBuffer) -> f32 {
        match *self {
            Self::Fixed { db } => db,
            Self::Dynamic {
                floor_db,
                below_peak_db,
            } => {
                let peak = buffer.peak();
                if peak > 0.0 {
                    let peak_db = gain_to_db(peak.max(AMPLITUDE_FLOOR));
                    floor_db.max(peak_db - below_peak_db)
                } else {
                    floor_db
                }
            }
        }
    }
}

/// Result of a trim-and-cut pass
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    pub buffer: AudioBuffer,
    /// Threshold actually used, `None` when trimming was disabled
    pub threshold_db: Option<f32>,
    /// The cut had to fall back to the untrimmed input
    pub fell_back: bool,
}

/// Peak-detecting leading-silence remover
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceTrimmer {
    threshold: Option<SilenceThreshold>,
}

impl SilenceTrimmer {
    pub fn new(threshold: SilenceThreshold) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }

    /// Trimmer that only cuts to length
    pub fn passthrough() -> Self {
        Self { threshold: None }
    }

    pub fn threshold(&self) -> Option<SilenceThreshold> {
        self.threshold
    }

    /// Drop frames before the first one where any channel exceeds the threshold
    ///
    /// A buffer that never crosses the threshold trims to empty.
    pub fn trim_leading(&self, input: &AudioBuffer) -> (AudioBuffer, Option<f32>) {
        let Some(threshold) = self.threshold else {
            return (input.clone(), None);
        };

        let threshold_db = threshold.resolve(input);
        let level = db_to_gain(threshold_db);
        let channels = input.channels() as usize;

        let start = input
            .samples()
            .chunks_exact(channels)
            .position(|frame| frame.iter().any(|s| s.abs() > level))
            .unwrap_or(input.frames());

        debug!(threshold_db, removed_frames = start, "Trimmed leading silence");
        (
            input.slice_frames(start, input.frames() - start),
            Some(threshold_db),
        )
    }

    /// Keep the first `duration_secs` of `input`
    ///
    /// At least one frame is kept from a non-empty buffer. A non-positive or
    /// non-finite duration keeps the whole buffer.
    pub fn cut(input: &AudioBuffer, duration_secs: f64) -> AudioBuffer {
        if !(duration_secs.is_finite() && duration_secs > 0.0) {
            return input.clone();
        }
        let frames = (duration_secs * input.sample_rate() as f64).round() as usize;
        input.slice_frames(0, frames.max(1))
    }

    /// Trim leading silence then cut to length, retrying the cut on the
    /// untrimmed input when trimming left nothing
    pub fn trim_and_cut(&self, input: &AudioBuffer, duration_secs: f64) -> TrimOutcome {
        let (trimmed, threshold_db) = self.trim_leading(input);
        let cut = Self::cut(&trimmed, duration_secs);
        if !cut.is_empty() || input.is_empty() {
            return TrimOutcome {
                buffer: cut,
                threshold_db,
                fell_back: false,
            };
        }

        warn!(
            stage = "trim",
            threshold_db, "Silence trim left an empty buffer, cutting the untrimmed input"
        );
        TrimOutcome {
            buffer: Self::cut(input, duration_secs),
            threshold_db,
            fell_back: true,
        }
    }
}
