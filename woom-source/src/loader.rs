//! Audio file loading and decoding

use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;
use woom_audio::{resample, AudioBuffer};

/// Errors that can occur during track loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
}

/// Channel layout decoded audio is conformed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// Average all channels
    Mono,
    /// Duplicate mono, keep the first two channels otherwise
    Stereo,
    /// Leave the layout as decoded
    #[default]
    Keep,
}

impl ChannelLayout {
    fn conform(&self, buffer: AudioBuffer) -> AudioBuffer {
        match self {
            ChannelLayout::Mono if buffer.channels() != 1 => buffer.with_channels(1),
            ChannelLayout::Stereo if buffer.channels() != 2 => buffer.with_channels(2),
            _ => buffer,
        }
    }
}

/// Audio file loader using Symphonia
#[derive(Debug, Clone)]
pub struct TrackLoader {
    target_sample_rate: u32,
    layout: ChannelLayout,
    max_duration_secs: Option<f64>,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Create a new track loader with the default 44.1kHz working rate
    pub fn new() -> Self {
        Self::with_sample_rate(44100)
    }

    /// Create a new track loader with specific sample rate
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate,
            layout: ChannelLayout::Keep,
            max_duration_secs: None,
        }
    }

    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Stop decoding after `secs` seconds of audio
    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = (secs.is_finite() && secs > 0.0).then_some(secs);
        self
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Load and decode an audio file
    pub fn load(&self, path: &Path) -> Result<AudioBuffer, LoadError> {
        let file = std::fs::File::open(path)?;

        // Create hint from file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        self.decode(Box::new(file), hint)
    }

    /// Decode an in-memory byte stream
    pub fn load_bytes(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, LoadError> {
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }
        self.decode(Box::new(Cursor::new(bytes)), hint)
    }

    fn decode(&self, source: Box<dyn MediaSource>, hint: Hint) -> Result<AudioBuffer, LoadError> {
        let mss = MediaSourceStream::new(source, Default::default());

        // Probe the format
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let mut channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let max_frames = self
            .max_duration_secs
            .map(|secs| (secs * source_sample_rate as f64).ceil() as usize);

        // Decode all samples
        let mut samples: Vec<f32> = Vec::new();

        loop {
            if let Some(limit) = max_frames {
                if samples.len() >= limit * channels as usize {
                    break;
                }
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(_) => break,
            };

            if packet.track_id() != track_id {
                continue;
            }

            // Corrupt packets are skipped
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => continue,
            };

            // Convert to f32 interleaved
            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;
            let duration = decoded.capacity() as u64;

            let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if let Some(limit) = max_frames {
            samples.truncate(limit * channels as usize);
        }

        let decoded = AudioBuffer::new(samples, source_sample_rate, channels);
        debug!(
            frames = decoded.frames(),
            channels,
            source_sample_rate,
            "Decoded audio"
        );

        let resampled = resample(&decoded, self.target_sample_rate)
            .map_err(|e| LoadError::Resample(e.to_string()))?;

        Ok(self.layout.conform(resampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let spec = hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::new(Cursor::new(&mut buffer), spec).unwrap();
            for i in 0..frames {
                let s = (2.0 * PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.5;
                for _ in 0..channels {
                    writer.write_sample((s * 32767.0) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        buffer
    }

    #[test]
    fn test_load_wav_bytes() {
        let loader = TrackLoader::with_sample_rate(22050);
        let buffer = loader.load_bytes(wav_bytes(22050, 2, 22050), Some("wav")).unwrap();
        assert_eq!(buffer.sample_rate(), 22050);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 22050);
        assert!((buffer.peak() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_layout_and_resample() {
        let loader = TrackLoader::with_sample_rate(44100).with_layout(ChannelLayout::Mono);
        let buffer = loader.load_bytes(wav_bytes(22050, 2, 22050), None).unwrap();
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 44100);
        assert_eq!(buffer.frames(), 44100);

        let stereo = TrackLoader::with_sample_rate(22050)
            .with_layout(ChannelLayout::Stereo)
            .load_bytes(wav_bytes(22050, 1, 1000), Some("wav"))
            .unwrap();
        assert_eq!(stereo.channels(), 2);
    }

    #[test]
    fn test_max_duration() {
        let loader = TrackLoader::with_sample_rate(8000).with_max_duration(0.5);
        let buffer = loader.load_bytes(wav_bytes(8000, 1, 8000), Some("wav")).unwrap();
        assert_eq!(buffer.frames(), 4000);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let loader = TrackLoader::new();
        let result = loader.load_bytes(b"definitely not audio".to_vec(), None);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = TrackLoader::new().load(Path::new("/nonexistent/woom/input.wav"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }
}
