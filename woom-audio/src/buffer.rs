//! Decoded audio buffer shared by every stage
//!
//! Samples are interleaved f32 in -1.0..1.0. Stages never mutate a buffer
//! they were handed; each one returns a fresh buffer that it owns.

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels (`-inf` for silence)
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        20.0 * gain.log10()
    } else {
        f32::NEG_INFINITY
    }
}

/// Interleaved audio with its sample rate and channel count
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples; a trailing partial frame is dropped
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate: sample_rate.max(1),
            channels,
        }
    }

    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Interleave per-channel planes (truncated to the shortest plane)
    pub fn from_planar(planes: &[Vec<f32>], sample_rate: u32) -> Self {
        let channels = planes.len().max(1);
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for plane in planes {
                samples.push(plane[frame]);
            }
        }
        Self::new(samples, sample_rate, channels as u16)
    }

    /// Silent buffer of `frames` frames
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of all channels per frame
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Conform to a channel count
    ///
    /// Down to mono averages, up from mono duplicates, anything else maps
    /// output channel `c` to input channel `c % channels`.
    pub fn with_channels(&self, channels: u16) -> Self {
        let channels = channels.max(1);
        if channels == self.channels {
            return self.clone();
        }
        if channels == 1 {
            return Self::from_mono(self.to_mono(), self.sample_rate);
        }

        let src = self.channels as usize;
        let dst = channels as usize;
        let mut samples = Vec::with_capacity(self.frames() * dst);
        for frame in self.samples.chunks_exact(src) {
            for c in 0..dst {
                samples.push(frame[c % src]);
            }
        }
        Self::new(samples, self.sample_rate, channels)
    }

    /// Split into one plane per channel
    pub fn deinterleave(&self) -> Vec<Vec<f32>> {
        let channels = self.channels as usize;
        let frames = self.frames();
        (0..channels)
            .map(|c| (0..frames).map(|f| self.samples[f * channels + c]).collect())
            .collect()
    }

    /// Copy of `len` frames starting at `start` (clamped to the buffer)
    pub fn slice_frames(&self, start: usize, len: usize) -> Self {
        let channels = self.channels as usize;
        let start = start.min(self.frames());
        let end = start.saturating_add(len).min(self.frames());
        Self::new(
            self.samples[start * channels..end * channels].to_vec(),
            self.sample_rate,
            self.channels,
        )
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Copy with a gain applied in decibels
    pub fn with_gain_db(&self, db: f32) -> Self {
        if db == 0.0 {
            return self.clone();
        }
        let gain = db_to_gain(db);
        Self {
            samples: self.samples.iter().map(|s| s * gain).collect(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_dropped() {
        let buf = AudioBuffer::new(vec![0.1, 0.2, 0.3], 44100, 2);
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.samples(), &[0.1, 0.2]);
    }

    #[test]
    fn test_planar_roundtrip() {
        let planes = vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]];
        let buf = AudioBuffer::from_planar(&planes, 48000);
        assert_eq!(buf.samples(), &[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(buf.deinterleave(), planes);
    }

    #[test]
    fn test_channel_conversion() {
        let stereo = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 44100, 2);
        let mono = stereo.with_channels(1);
        assert_eq!(mono.samples(), &[0.5, 0.5]);

        let back = mono.with_channels(2);
        assert_eq!(back.samples(), &[0.5, 0.5, 0.5, 0.5]);
        assert_eq!(back.frames(), 2);
    }

    #[test]
    fn test_slice_clamps() {
        let buf = AudioBuffer::from_mono((0..10).map(|i| i as f32).collect(), 10);
        let slice = buf.slice_frames(8, 5);
        assert_eq!(slice.samples(), &[8.0, 9.0]);
        assert!(buf.slice_frames(20, 5).is_empty());
    }

    #[test]
    fn test_gain_conversions() {
        assert!((db_to_gain(-6.0) - 0.501).abs() < 0.001);
        assert!((gain_to_db(0.5) + 6.02).abs() < 0.01);
        assert_eq!(gain_to_db(0.0), f32::NEG_INFINITY);

        let buf = AudioBuffer::from_mono(vec![0.5, -0.25], 44100);
        let louder = buf.with_gain_db(gain_to_db(2.0));
        assert!((louder.peak() - 1.0).abs() < 1e-5);
    }
}
