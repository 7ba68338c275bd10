//! Tempo detection and beat tracking
//!
//! Onset strength comes from log-compressed spectral flux. The tempo is
//! the autocorrelation peak of the onset envelope weighted by a log-normal
//! prior around 120 BPM, and beat markers are placed by dynamic
//! programming over the onset envelope at that period.
//!
//! Every public entry point degrades to [`DEFAULT_TEMPO_BPM`] instead of
//! failing: callers always get a usable tempo.

use crate::stft::Stft;
use tracing::debug;

/// Tempo assumed whenever detection fails or is unusable
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Number of beats the clip window spans by default
pub const DEFAULT_BEATS: usize = 4;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 240.0;
/// Width of the tempo prior in octaves
const PRIOR_OCTAVES: f64 = 1.0;
/// How strongly the beat tracker sticks to the estimated period
const TIGHTNESS: f64 = 100.0;

/// Detected tempo and beat markers of one signal
#[derive(Debug, Clone, PartialEq)]
pub struct TempoEstimate {
    /// Tempo in beats per minute (always > 0)
    pub bpm: f64,
    /// Beat marker times in seconds, ascending
    pub beats: Vec<f64>,
    /// Normalized autocorrelation strength at the chosen period (0.0 - 1.0)
    pub confidence: f32,
}

impl TempoEstimate {
    /// Time covered by `num_beats` beats, measured from the first marker.
    ///
    /// Needs at least `num_beats + 1` markers.
    pub fn beat_span(&self, num_beats: usize) -> Option<f64> {
        if num_beats == 0 || self.beats.len() < num_beats + 1 {
            return None;
        }
        let span = self.beats[num_beats] - self.beats[0];
        (span.is_finite() && span > 0.0).then_some(span)
    }
}

/// Tempo analyzer over mono sample slices
pub struct TempoAnalyzer {
    sample_rate: u32,
    stft: Stft,
    /// Only the first `window_secs` of any input are analysed
    window_secs: Option<f64>,
}

impl TempoAnalyzer {
    /// Create an analyzer for signals at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            stft: Stft::new(FFT_SIZE, HOP_SIZE),
            window_secs: None,
        }
    }

    /// Cap analysis to the first `secs` seconds of input
    pub fn with_window(mut self, secs: f64) -> Self {
        self.window_secs = (secs.is_finite() && secs > 0.0).then_some(secs);
        self
    }

    /// Onset envelope frames per second
    fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / HOP_SIZE as f64
    }

    fn windowed<'a>(&self, samples: &'a [f32]) -> &'a [f32] {
        match self.window_secs {
            Some(secs) => {
                let max = (secs * self.sample_rate as f64) as usize;
                &samples[..samples.len().min(max)]
            }
            None => samples,
        }
    }

    /// Estimate tempo and beat markers; `None` when the signal is unusable
    pub fn analyze(&self, samples: &[f32]) -> Option<TempoEstimate> {
        let samples = self.windowed(samples);
        if samples.is_empty() {
            return None;
        }

        let onset_fn = self.compute_onset_function(samples);
        let (bpm, confidence) = self.estimate_tempo(&onset_fn)?;
        if !(bpm.is_finite() && bpm > 0.0) {
            return None;
        }

        let beat_frames = self.track_beats(&onset_fn, bpm);
        let frame_secs = HOP_SIZE as f64 / self.sample_rate as f64;
        let beats = beat_frames
            .into_iter()
            .map(|frame| frame as f64 * frame_secs)
            .collect();

        Some(TempoEstimate {
            bpm,
            beats,
            confidence,
        })
    }

    /// Tempo in BPM, falling back to [`DEFAULT_TEMPO_BPM`]
    pub fn tempo(&self, samples: &[f32]) -> f64 {
        match self.analyze(samples) {
            Some(estimate) => estimate.bpm,
            None => {
                debug!("Tempo detection failed, using {} BPM", DEFAULT_TEMPO_BPM);
                DEFAULT_TEMPO_BPM
            }
        }
    }

    /// Log-compressed spectral flux, normalized to a peak of 1.0
    fn compute_onset_function(&self, samples: &[f32]) -> Vec<f32> {
        let spectrogram = self.stft.analyze(samples);
        let mut onset_fn = Vec::with_capacity(spectrogram.frames.len());
        let mut prev: Option<Vec<f32>> = None;

        for frame in &spectrogram.frames {
            let spectrum: Vec<f32> = frame.iter().map(|c| (1.0 + 10.0 * c.norm()).ln()).collect();

            // Half-wave rectified difference: only energy increases are onsets
            let flux = match prev {
                Some(ref prev) => spectrum
                    .iter()
                    .zip(prev)
                    .map(|(curr, prev)| (curr - prev).max(0.0))
                    .sum(),
                None => 0.0,
            };
            onset_fn.push(flux);
            prev = Some(spectrum);
        }

        let max = onset_fn.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for v in &mut onset_fn {
                *v /= max;
            }
        }

        onset_fn
    }

    /// Normalized correlation of the onset function with itself at `lag`
    fn correlation_at_lag(onset_fn: &[f32], lag: usize) -> f32 {
        if lag == 0 || lag >= onset_fn.len() {
            return 0.0;
        }

        let mut correlation = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for i in 0..(onset_fn.len() - lag) {
            correlation += onset_fn[i] * onset_fn[i + lag];
            norm_a += onset_fn[i] * onset_fn[i];
            norm_b += onset_fn[i + lag] * onset_fn[i + lag];
        }

        let norm = (norm_a * norm_b).sqrt();
        if norm > 0.0 {
            correlation / norm
        } else {
            0.0
        }
    }

    /// Weight favouring tempi near the default, one octave wide
    fn tempo_prior(bpm: f64) -> f64 {
        let octaves = (bpm / DEFAULT_TEMPO_BPM).log2() / PRIOR_OCTAVES;
        (-0.5 * octaves * octaves).exp()
    }

    /// Estimate (bpm, confidence) from the autocorrelation of the onset function
    fn estimate_tempo(&self, onset_fn: &[f32]) -> Option<(f64, f32)> {
        let fps = self.frames_per_second();
        let min_lag = ((fps * 60.0 / MAX_BPM).floor() as usize).max(1);
        let max_lag = ((fps * 60.0 / MIN_BPM).ceil() as usize).min(onset_fn.len() / 2);

        if max_lag <= min_lag + 1 {
            return None;
        }

        let correlations: Vec<f32> = (0..=max_lag + 1)
            .map(|lag| Self::correlation_at_lag(onset_fn, lag))
            .collect();

        let mut best_lag = 0usize;
        let mut best_score = 0.0f64;
        for lag in min_lag..=max_lag {
            let bpm = 60.0 * fps / lag as f64;
            let score = correlations[lag].max(0.0) as f64 * Self::tempo_prior(bpm);
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        if best_lag == 0 || best_score <= 0.0 {
            return None;
        }

        // Parabolic interpolation around the peak for sub-frame precision
        let refined_lag = {
            let y0 = correlations[best_lag - 1] as f64;
            let y1 = correlations[best_lag] as f64;
            let y2 = correlations[best_lag + 1] as f64;
            let denom = y0 - 2.0 * y1 + y2;
            if denom.abs() > 1e-9 {
                best_lag as f64 + (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
            } else {
                best_lag as f64
            }
        };

        let bpm = 60.0 * fps / refined_lag;
        let confidence = correlations[best_lag].clamp(0.0, 1.0);
        Some((bpm, confidence))
    }

    /// Place beats by dynamic programming over the onset envelope.
    ///
    /// Each frame's cumulative score is its onset strength plus the best
    /// predecessor score, penalised by how far the inter-beat interval
    /// strays from the expected period.
    fn track_beats(&self, onset_fn: &[f32], bpm: f64) -> Vec<usize> {
        let n = onset_fn.len();
        if n == 0 {
            return Vec::new();
        }

        let period = self.frames_per_second() * 60.0 / bpm;
        if !(period.is_finite() && period >= 1.0) {
            return Vec::new();
        }

        // Normalize the local score so the penalty scale is signal independent
        let mean = onset_fn.iter().sum::<f32>() / n as f32;
        let variance = onset_fn.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n as f32;
        let std_dev = variance.sqrt().max(1e-6);
        let local: Vec<f64> = onset_fn.iter().map(|&v| (v / std_dev) as f64).collect();

        let min_back = (period / 2.0).round().max(1.0) as usize;
        let max_back = (period * 2.0).round() as usize;

        let mut cumulative = vec![0.0f64; n];
        let mut backlink: Vec<Option<usize>> = vec![None; n];

        for i in 0..n {
            let mut best: Option<(usize, f64)> = None;
            if i >= min_back {
                let earliest = i.saturating_sub(max_back);
                for j in earliest..=(i - min_back) {
                    let interval = (i - j) as f64 / period;
                    let score = cumulative[j] - TIGHTNESS * interval.ln().powi(2);
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((j, score));
                    }
                }
            }

            match best {
                Some((j, score)) if score > 0.0 => {
                    cumulative[i] = local[i] + score;
                    backlink[i] = Some(j);
                }
                _ => cumulative[i] = local[i],
            }
        }

        // Last beat: best cumulative score within the final period
        let tail_start = n.saturating_sub(period.ceil() as usize);
        let mut last = tail_start;
        for i in tail_start..n {
            if cumulative[i] > cumulative[last] {
                last = i;
            }
        }

        let mut beats = vec![last];
        while let Some(prev) = backlink[*beats.last().unwrap_or(&0)] {
            beats.push(prev);
        }
        beats.reverse();

        // Trim weak beats at both ends
        let rms = (beats.iter().map(|&b| local[b] * local[b]).sum::<f64>() / beats.len() as f64)
            .sqrt();
        let threshold = 0.5 * rms;
        let first = beats.iter().position(|&b| local[b] >= threshold);
        let last = beats.iter().rposition(|&b| local[b] >= threshold);
        match (first, last) {
            (Some(first), Some(last)) if first <= last => beats[first..=last].to_vec(),
            _ => beats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Short decaying 60 Hz thumps at a fixed tempo, like a heartbeat recording
    fn click_track(bpm: f64, secs: f64, sample_rate: u32) -> Vec<f32> {
        let len = (secs * sample_rate as f64) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let click_len = sample_rate as usize / 20;
        let mut samples = vec![0.0f32; len];
        let mut start = sample_rate as usize / 4;
        while start < len {
            for i in 0..click_len.min(len - start) {
                let t = i as f32 / sample_rate as f32;
                let env = (-t * 60.0).exp();
                samples[start + i] += env * (2.0 * std::f32::consts::PI * 60.0 * t).sin()
                    + env * 0.5 * (2.0 * std::f32::consts::PI * 1200.0 * t).sin();
            }
            start += period;
        }
        samples
    }

    #[test]
    fn test_detects_click_tempo() {
        // 24576 Hz puts the onset envelope at exactly 48 frames per second
        let samples = click_track(120.0, 12.0, 24576);
        let analyzer = TempoAnalyzer::new(24576);
        let estimate = analyzer.analyze(&samples).expect("tempo should be detected");
        assert!(
            (estimate.bpm - 120.0).abs() < 4.0,
            "expected ~120 BPM, got {}",
            estimate.bpm
        );
        assert!(estimate.beats.len() >= 5);
    }

    #[test]
    fn test_beat_span_of_four_beats() {
        let samples = click_track(120.0, 10.0, 24576);
        let analyzer = TempoAnalyzer::new(24576);
        let estimate = analyzer.analyze(&samples).expect("tempo should be detected");
        let span = estimate.beat_span(4).expect("enough beats for a span");
        assert!((span - 2.0).abs() < 0.15, "expected ~2.0s, got {}", span);
    }

    #[test]
    fn test_empty_input_falls_back() {
        let analyzer = TempoAnalyzer::new(44100);
        assert_eq!(analyzer.tempo(&[]), DEFAULT_TEMPO_BPM);
        assert!(analyzer.analyze(&[]).is_none());
    }

    #[test]
    fn test_silence_falls_back() {
        let analyzer = TempoAnalyzer::new(44100);
        let silence = vec![0.0f32; 44100 * 3];
        assert_eq!(analyzer.tempo(&silence), DEFAULT_TEMPO_BPM);
    }

    #[test]
    fn test_beat_span_needs_enough_markers() {
        let estimate = TempoEstimate {
            bpm: 120.0,
            beats: vec![0.5, 1.0, 1.5, 2.0],
            confidence: 1.0,
        };
        assert!(estimate.beat_span(4).is_none());
        assert_eq!(estimate.beat_span(3), Some(1.5));
    }

    #[test]
    fn test_window_caps_input() {
        let analyzer = TempoAnalyzer::new(1000).with_window(2.0);
        let samples = vec![0.0f32; 10_000];
        assert_eq!(analyzer.windowed(&samples).len(), 2000);
    }

    #[test]
    fn test_prior_peaks_at_default() {
        assert!((TempoAnalyzer::tempo_prior(120.0) - 1.0).abs() < 1e-9);
        assert!(TempoAnalyzer::tempo_prior(60.0) < TempoAnalyzer::tempo_prior(100.0));
    }
}
