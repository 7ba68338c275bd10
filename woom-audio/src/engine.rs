//! Audio engine capability
//!
//! The strategies never call DSP code directly; every heavy operation goes
//! through `NativeAudioEngine` so an implementation can bind to a native
//! library (or fail on purpose in tests) without touching the pipelines.

use crate::buffer::AudioBuffer;
use crate::encode::{AudioFormat, OutputArtifact, WavEncoder};
use crate::error::EngineError;
use crate::filter::BandFilter;
use crate::mixer::{MixParams, Mixer};
use crate::timestretcher::PhaseVocoder;

/// Heavy audio operations shared by every strategy
pub trait NativeAudioEngine: Send + Sync {
    /// Zero-phase band filter
    fn filter(&self, input: &AudioBuffer, filter: &BandFilter) -> Result<AudioBuffer, EngineError>;

    /// Pitch-preserving time stretch (`rate` > 1 shortens)
    fn stretch(&self, input: &AudioBuffer, rate: f64) -> Result<AudioBuffer, EngineError>;

    /// Weighted blend of background and clip
    fn mix(
        &self,
        background: &AudioBuffer,
        clip: &AudioBuffer,
        params: &MixParams,
    ) -> Result<AudioBuffer, EngineError>;

    /// Encode into an in-memory artifact
    fn encode(&self, input: &AudioBuffer, format: AudioFormat)
        -> Result<OutputArtifact, EngineError>;

    fn name(&self) -> &'static str {
        "native"
    }
}

/// In-process engine built on this crate's DSP
#[derive(Default)]
pub struct DspEngine {
    vocoder: PhaseVocoder,
}

impl DspEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NativeAudioEngine for DspEngine {
    fn filter(&self, input: &AudioBuffer, filter: &BandFilter) -> Result<AudioBuffer, EngineError> {
        filter.apply(input)
    }

    fn stretch(&self, input: &AudioBuffer, rate: f64) -> Result<AudioBuffer, EngineError> {
        self.vocoder.stretch(input, rate)
    }

    fn mix(
        &self,
        background: &AudioBuffer,
        clip: &AudioBuffer,
        params: &MixParams,
    ) -> Result<AudioBuffer, EngineError> {
        Mixer::new(*params).mix(background, clip)
    }

    fn encode(
        &self,
        input: &AudioBuffer,
        format: AudioFormat,
    ) -> Result<OutputArtifact, EngineError> {
        match format {
            AudioFormat::Wav => WavEncoder::encode(input),
        }
    }

    fn name(&self) -> &'static str {
        "dsp"
    }
}
