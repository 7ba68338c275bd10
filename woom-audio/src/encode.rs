//! In-memory artifact encoding

use crate::buffer::AudioBuffer;
use crate::error::EngineError;
use std::io::Cursor;

/// Container/codec of an encoded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// 16-bit PCM WAV
    #[default]
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
        }
    }
}

/// Encoded audio bytes plus the format they are in
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    /// Audio frames contained in `bytes`
    pub frames: usize,
}

impl OutputArtifact {
    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.bytes.is_empty()
    }
}

/// 16-bit PCM WAV writer backed by hound
pub struct WavEncoder;

impl WavEncoder {
    pub fn encode(input: &AudioBuffer) -> Result<OutputArtifact, EngineError> {
        if input.is_empty() {
            return Err(EngineError::EmptyInput("encode"));
        }

        let spec = hound::WavSpec {
            channels: input.channels(),
            sample_rate: input.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut bytes = Vec::with_capacity(44 + input.samples().len() * 2);
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
                .map_err(|e| EngineError::Encode(e.to_string()))?;

            // Convert f32 samples to i16
            for &sample in input.samples() {
                let clamped = sample.clamp(-1.0, 1.0);
                writer
                    .write_sample((clamped * 32767.0) as i16)
                    .map_err(|e| EngineError::Encode(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| EngineError::Encode(e.to_string()))?;
        }

        Ok(OutputArtifact {
            bytes,
            format: AudioFormat::Wav,
            frames: input.frames(),
        })
    }
}
