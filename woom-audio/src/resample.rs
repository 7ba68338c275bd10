//! Sample rate conversion with rubato

use crate::buffer::AudioBuffer;
use crate::error::EngineError;
use rubato::{FftFixedInOut, Resampler};

const CHUNK_SIZE: usize = 1024;

/// Resample per-channel planes from `from_rate` to `to_rate`
///
/// Output is aligned with the input (the resampler delay is removed) and
/// holds exactly `round(frames * to_rate / from_rate)` frames. Only the
/// ratio of the two rates matters.
pub fn resample_planar(
    planes: &[Vec<f32>],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<Vec<f32>>, EngineError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(EngineError::Resample(format!(
            "invalid rates {} -> {}",
            from_rate, to_rate
        )));
    }
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    if from_rate == to_rate || frames == 0 {
        return Ok(planes.iter().map(|p| p[..frames].to_vec()).collect());
    }

    let channels = planes.len();
    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, channels)
            .map_err(|e| EngineError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut pos = 0;

    // Keep feeding (zero-padded past the end) until the delayed tail is out
    while output[0].len() < delay + expected {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(frames);
        for (buf, plane) in chunk.iter_mut().zip(planes) {
            buf.clear();
            if pos < end {
                buf.extend_from_slice(&plane[pos..end]);
            }
            buf.resize(needed, 0.0);
        }
        pos += needed;

        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        for (out, data) in output.iter_mut().zip(resampled) {
            out.extend(data);
        }
    }

    for out in &mut output {
        out.drain(..delay);
        out.truncate(expected);
    }
    Ok(output)
}

/// Convert a buffer to `target_rate`
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, EngineError> {
    if buffer.sample_rate() == target_rate {
        return Ok(buffer.clone());
    }
    let planes = resample_planar(&buffer.deinterleave(), buffer.sample_rate(), target_rate)?;
    Ok(AudioBuffer::from_planar(&planes, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_output_length() {
        let buffer = AudioBuffer::from_mono(sine(100.0, 44100, 10000), 44100);
        let out = resample(&buffer, 48000).unwrap();
        assert_eq!(out.sample_rate(), 48000);
        assert_eq!(out.frames(), (10000.0f64 * 48000.0 / 44100.0).round() as usize);
    }

    #[test]
    fn test_output_aligned_with_input() {
        let buffer = AudioBuffer::from_mono(sine(100.0, 44100, 44100), 44100);
        let out = resample(&buffer, 48000).unwrap();
        let expected = sine(100.0, 48000, out.frames());
        for i in 4800..43200 {
            let diff = (out.samples()[i] - expected[i]).abs();
            assert!(diff < 0.02, "frame {} off by {}", i, diff);
        }
    }

    #[test]
    fn test_same_rate_is_copy() {
        let buffer = AudioBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 44100, 2);
        assert_eq!(resample(&buffer, 44100).unwrap(), buffer);
    }

    #[test]
    fn test_ratio_only_planes() {
        let planes = vec![sine(100.0, 44100, 4320)];
        let out = resample_planar(&planes, 432, 440).unwrap();
        assert_eq!(out[0].len(), 4400);
    }

    #[test]
    fn test_invalid_rate() {
        assert!(resample_planar(&[vec![0.0; 10]], 0, 44100).is_err());
    }
}
