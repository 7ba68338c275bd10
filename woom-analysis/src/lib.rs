//! Audio analysis for Woom
//!
//! Operates on plain mono sample slices so it stays independent of any
//! buffer type:
//! - Tempo detection and beat markers (spectral flux + autocorrelation + dynamic programming)
//! - Harmonic/percussive separation (median-filtered spectrogram masks)
//! - The STFT both of them (and the time-stretcher) are built on

mod separation;
mod stft;
mod tempo;

pub use separation::{HpssComponents, SpectralSeparator};
pub use stft::{Complex32, Spectrogram, Stft};
pub use tempo::{TempoAnalyzer, TempoEstimate, DEFAULT_BEATS, DEFAULT_TEMPO_BPM};
