//! Offline audio engine for Woom
//!
//! This crate provides every signal-conditioning stage a mix strategy uses:
//! - BandFilter: zero-phase Butterworth low-pass
//! - SilenceTrimmer: leading-silence removal and fixed-length cut
//! - LoudnessNormalizer: peak/level policy for clips, BS.1770 loudness for tracks
//! - TempoAligner: clamped pitch-preserving time-stretch
//! - ToneShifter: 440 Hz to 432 Hz retuning
//! - Mixer: weighted background/clip blend
//! - WavEncoder: in-memory artifacts
//!
//! Heavy operations are reached through the `NativeAudioEngine` trait;
//! `DspEngine` is the in-process implementation.

mod align;
mod buffer;
mod encode;
mod engine;
mod error;
mod filter;
mod limiter;
mod loudness;
mod mixer;
mod resample;
mod silence;
pub mod timestretcher;

pub use align::{AlignOutcome, StretchRange, TempoAligner};
pub use buffer::{db_to_gain, gain_to_db, AudioBuffer};
pub use encode::{AudioFormat, OutputArtifact, WavEncoder};
pub use engine::{DspEngine, NativeAudioEngine};
pub use error::EngineError;
pub use filter::{BandFilter, DEFAULT_CUTOFF_HZ, DEFAULT_ORDER};
pub use limiter::TruePeakLimiter;
pub use loudness::{
    LevelPolicy, LoudnessMeasurement, LoudnessNormalizer, LoudnessTarget, PEAK_HEADROOM_DB,
};
pub use mixer::{balance_gains, BalanceGains, MixParams, Mixer};
pub use resample::{resample, resample_planar};
pub use silence::{SilenceThreshold, SilenceTrimmer, TrimOutcome};
pub use timestretcher::{PhaseVocoder, ToneShifter};
