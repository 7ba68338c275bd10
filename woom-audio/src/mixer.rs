//! Two-stream mixer - background plus looping clip

use crate::buffer::{db_to_gain, AudioBuffer};
use crate::error::EngineError;

/// Parameters of one blend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    pub background_weight: f32,
    pub clip_weight: f32,
    /// Gain applied to the background before weighting (dB)
    pub background_gain_db: f32,
    /// Gain applied to the clip before weighting (dB)
    pub clip_gain_db: f32,
    /// Repeat the clip to cover the whole background
    pub loop_clip: bool,
    /// Time for the background to take over the clip's share once the clip ends
    pub dropout_transition_secs: f32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            background_weight: 0.5,
            clip_weight: 0.5,
            background_gain_db: 0.0,
            clip_gain_db: 0.0,
            loop_clip: true,
            dropout_transition_secs: 2.0,
        }
    }
}

/// Gains that bring the quieter stream up to the louder one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceGains {
    pub background_db: f32,
    pub clip_db: f32,
}

/// Asymmetric balance from mean levels
///
/// With `diff = background - clip`, the background gets
/// `max(0, headroom - diff)` and the clip `max(0, diff)`. Returns `None`
/// when either level is not finite (silent input).
pub fn balance_gains(
    background_level_db: f32,
    clip_level_db: f32,
    background_headroom_db: f32,
) -> Option<BalanceGains> {
    if !(background_level_db.is_finite() && clip_level_db.is_finite()) {
        return None;
    }
    let diff = background_level_db - clip_level_db;
    Some(BalanceGains {
        background_db: (background_headroom_db - diff).max(0.0),
        clip_db: diff.max(0.0),
    })
}

/// Weighted blend of exactly two streams
///
/// Each stream is scaled by its weight over the sum of the weights of the
/// streams still playing. Output length always equals the background.
pub struct Mixer {
    params: MixParams,
}

impl Mixer {
    pub fn new(params: MixParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MixParams {
        &self.params
    }

    pub fn mix(&self, background: &AudioBuffer, clip: &AudioBuffer) -> Result<AudioBuffer, EngineError> {
        if background.is_empty() || clip.is_empty() {
            return Err(EngineError::EmptyInput("mix"));
        }
        if background.sample_rate() != clip.sample_rate() {
            return Err(EngineError::Mix(format!(
                "sample rate mismatch: background {} Hz, clip {} Hz",
                background.sample_rate(),
                clip.sample_rate()
            )));
        }

        let p = &self.params;
        let weights_valid = p.background_weight.is_finite()
            && p.clip_weight.is_finite()
            && p.background_weight >= 0.0
            && p.clip_weight >= 0.0
            && p.background_weight + p.clip_weight > 0.0;
        if !weights_valid {
            return Err(EngineError::Mix(format!(
                "invalid weights {} / {}",
                p.background_weight, p.clip_weight
            )));
        }

        let channels = background.channels() as usize;
        let clip = clip.with_channels(background.channels());
        let clip_frames = clip.frames();
        let bg_gain = db_to_gain(p.background_gain_db);
        let clip_gain = db_to_gain(p.clip_gain_db);

        let total = p.background_weight + p.clip_weight;
        let bg_shared = p.background_weight / total;
        let clip_scale = p.clip_weight / total;
        // Once the clip is gone the background is the only active input
        let bg_alone = if p.background_weight > 0.0 { 1.0 } else { 0.0 };
        let transition_frames =
            (p.dropout_transition_secs.max(0.0) * background.sample_rate() as f32) as usize;

        let mut samples = Vec::with_capacity(background.samples().len());
        for (i, frame) in background.samples().chunks_exact(channels).enumerate() {
            let clip_frame = if p.loop_clip {
                Some(i % clip_frames)
            } else if i < clip_frames {
                Some(i)
            } else {
                None
            };

            match clip_frame {
                Some(c) => {
                    let clip_samples = &clip.samples()[c * channels..(c + 1) * channels];
                    for (bg, cl) in frame.iter().zip(clip_samples) {
                        samples.push(bg * bg_gain * bg_shared + cl * clip_gain * clip_scale);
                    }
                }
                None => {
                    let since_end = i - clip_frames;
                    let scale = if since_end >= transition_frames {
                        bg_alone
                    } else {
                        let t = since_end as f32 / transition_frames as f32;
                        bg_shared + (bg_alone - bg_shared) * t
                    };
                    samples.extend(frame.iter().map(|bg| bg * bg_gain * scale));
                }
            }
        }

        Ok(AudioBuffer::new(
            samples,
            background.sample_rate(),
            background.channels(),
        ))
    }
}
