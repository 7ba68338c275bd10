//! One-time tempo analysis shared by every strategy of a batch

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use woom_analysis::{TempoAnalyzer, DEFAULT_TEMPO_BPM};
use woom_audio::AudioBuffer;
use woom_source::{ChannelLayout, MixerConfig, TrackLoader};

use crate::error::{AnalysisFallback, InputRole};

/// Tempi of both inputs and the clip's beat span
///
/// Never mutated after it is computed; strategies only read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Clip tempo, 120 when detection failed
    pub picked_tempo_bpm: f64,
    /// Time covered by `beats` beats of the clip from its first marker
    pub picked_beat_duration_secs: Option<f64>,
    /// Background tempo, 120 when detection failed
    pub background_tempo_bpm: f64,
    pub beats: usize,
    pub fallbacks: Vec<AnalysisFallback>,
}

impl AnalysisResult {
    /// Result used when nothing could be detected
    pub fn defaults(beats: usize) -> Self {
        Self {
            picked_tempo_bpm: DEFAULT_TEMPO_BPM,
            picked_beat_duration_secs: None,
            background_tempo_bpm: DEFAULT_TEMPO_BPM,
            beats: beats.max(1),
            fallbacks: Vec::new(),
        }
    }

    /// Analyse decoded inputs; both are reduced to mono first
    pub fn from_buffers(background: &AudioBuffer, clip: &AudioBuffer, config: &MixerConfig) -> Self {
        let mut result = Self::defaults(config.beats);

        let clip_analyzer =
            TempoAnalyzer::new(clip.sample_rate()).with_window(config.clip_analysis_secs);
        match clip_analyzer.analyze(&clip.to_mono()) {
            Some(estimate) => {
                result.picked_tempo_bpm = estimate.bpm;
                result.picked_beat_duration_secs = estimate.beat_span(result.beats);
                if result.picked_beat_duration_secs.is_none() {
                    // Too few markers: the estimate is not trusted either
                    result.picked_tempo_bpm = DEFAULT_TEMPO_BPM;
                    result.fallback(
                        InputRole::Clip,
                        format!(
                            "{} beat markers, need {}",
                            estimate.beats.len(),
                            result.beats + 1
                        ),
                    );
                }
            }
            None => result.fallback(InputRole::Clip, "tempo detection failed"),
        }

        let background_analyzer = TempoAnalyzer::new(background.sample_rate())
            .with_window(config.background_analysis_secs);
        match background_analyzer.analyze(&background.to_mono()) {
            Some(estimate) => result.background_tempo_bpm = estimate.bpm,
            None => result.fallback(InputRole::Background, "tempo detection failed"),
        }

        info!(
            picked_tempo_bpm = result.picked_tempo_bpm,
            picked_beat_duration_secs = ?result.picked_beat_duration_secs,
            background_tempo_bpm = result.background_tempo_bpm,
            "Analysis complete"
        );
        result
    }

    /// Decode the analysis windows of both files and analyse them
    ///
    /// An input that cannot be decoded keeps its defaults.
    pub fn from_paths(background: &Path, clip: &Path, config: &MixerConfig) -> Self {
        let loader = TrackLoader::with_sample_rate(config.sample_rate).with_layout(ChannelLayout::Mono);
        let background_buf = loader
            .clone()
            .with_max_duration(config.background_analysis_secs)
            .load(background);
        let clip_buf = loader.with_max_duration(config.clip_analysis_secs).load(clip);

        match (background_buf, clip_buf) {
            (Ok(background), Ok(clip)) => Self::from_buffers(&background, &clip, config),
            (background, clip) => {
                let mut result = Self::defaults(config.beats);
                if let Err(e) = background {
                    result.fallback(InputRole::Background, format!("could not decode: {}", e));
                }
                if let Err(e) = clip {
                    result.fallback(InputRole::Clip, format!("could not decode: {}", e));
                }
                result
            }
        }
    }

    fn fallback(&mut self, source: InputRole, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(?source, %reason, "Analysis fallback, using defaults");
        self.fallbacks.push(AnalysisFallback { source, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clicks(bpm: f64, secs: f64, sample_rate: u32) -> AudioBuffer {
        let len = (secs * sample_rate as f64) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; len];
        for start in (0..len).step_by(period) {
            for (i, s) in samples[start..(start + 200).min(len)].iter_mut().enumerate() {
                *s = (1.0 - i as f32 / 200.0) * if i % 2 == 0 { 0.9 } else { -0.9 };
            }
        }
        AudioBuffer::from_mono(samples, sample_rate)
    }

    #[test]
    fn test_defaults() {
        let result = AnalysisResult::defaults(4);
        assert_eq!(result.picked_tempo_bpm, 120.0);
        assert_eq!(result.background_tempo_bpm, 120.0);
        assert_eq!(result.picked_beat_duration_secs, None);
        assert_eq!(result.beats, 4);
    }

    #[test]
    fn test_silence_falls_back() {
        let silence = AudioBuffer::silence(22050, 22050, 1);
        let result = AnalysisResult::from_buffers(&silence, &silence, &MixerConfig::default());
        assert_eq!(result.picked_tempo_bpm, 120.0);
        assert_eq!(result.background_tempo_bpm, 120.0);
        assert!(result.picked_beat_duration_secs.is_none());
        assert_eq!(result.fallbacks.len(), 2);
    }

    #[test]
    fn test_tempi_always_positive() {
        let background = clicks(100.0, 10.0, 22050);
        let clip = clicks(140.0, 6.0, 22050);
        let result = AnalysisResult::from_buffers(&background, &clip, &MixerConfig::default());
        assert!(result.picked_tempo_bpm > 0.0);
        assert!(result.background_tempo_bpm > 0.0);
        if let Some(span) = result.picked_beat_duration_secs {
            assert!(span > 0.0);
        }
    }

    #[test]
    fn test_too_few_beat_markers_resets_clip_tempo() {
        // Clicks every 0.6 s leave at most four markers in two seconds
        let background = clicks(100.0, 10.0, 22050);
        let clip = clicks(100.0, 2.0, 22050);
        let result = AnalysisResult::from_buffers(&background, &clip, &MixerConfig::default());

        assert_eq!(result.picked_tempo_bpm, DEFAULT_TEMPO_BPM);
        assert_eq!(result.picked_beat_duration_secs, None);
        assert!(result
            .fallbacks
            .iter()
            .any(|f| f.source == InputRole::Clip));
    }

    #[test]
    fn test_unreadable_paths() {
        let result = AnalysisResult::from_paths(
            Path::new("/nonexistent/bg.wav"),
            Path::new("/nonexistent/clip.wav"),
            &MixerConfig::default(),
        );
        assert_eq!(result.picked_tempo_bpm, 120.0);
        assert_eq!(result.fallbacks.len(), 2);
        assert!(result
            .fallbacks
            .iter()
            .any(|f| f.source == InputRole::Clip));
    }
}
