//! Mix strategies
//!
//! Every strategy runs the same pipeline; a [`MixStrategyConfig`] decides
//! which stages do something and with which parameters:
//!
//! ```text
//! clip:       load -> denoise -> align tempo -> trim + cut -> level
//! background: load -> loudness -> tempo factor
//!             balance -> mix -> (retune) -> encode
//! ```
//!
//! Conditioning stages never fail a job. When one of them cannot run, its
//! input is passed on and a [`StageFallback`] is recorded. Only the mix,
//! the retune and the encode are terminal.

use std::path::PathBuf;
use tracing::{debug, info, warn};
use woom_analysis::{SpectralSeparator, DEFAULT_TEMPO_BPM};
use woom_audio::{
    balance_gains, AudioBuffer, AudioFormat, BandFilter, LevelPolicy, LoudnessNormalizer,
    LoudnessTarget, MixParams, NativeAudioEngine, OutputArtifact, SilenceThreshold,
    SilenceTrimmer, StretchRange, TempoAligner, ToneShifter, DEFAULT_CUTOFF_HZ, DEFAULT_ORDER,
};
use woom_source::{ChannelLayout, TrackLoader};

use crate::analysis::AnalysisResult;
use crate::error::{JobFailure, Stage, StageFallback};

/// The four competing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Basic,
    DenoisedTuned,
    TempoMatched,
    TempoMatchedDoubled,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Basic,
        StrategyKind::DenoisedTuned,
        StrategyKind::TempoMatched,
        StrategyKind::TempoMatchedDoubled,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Basic => "v1",
            StrategyKind::DenoisedTuned => "v2",
            StrategyKind::TempoMatched => "v3",
            StrategyKind::TempoMatchedDoubled => "v4",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Basic => "basic",
            StrategyKind::DenoisedTuned => "denoised-tuned",
            StrategyKind::TempoMatched => "tempo-matched",
            StrategyKind::TempoMatchedDoubled => "tempo-matched-doubled",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    /// Accepts the label (`v3`) or the name (`tempo-matched`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(s) || kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown strategy '{}'", s))
    }
}

/// How the clip is cleaned before alignment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denoise {
    /// Zero-phase low-pass through the engine
    LowPass(BandFilter),
    /// Keep the percussive half of a harmonic/percussive split
    Percussive,
}

/// Length the clip is cut to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipLength {
    /// Detected beat span (or the beats at 120 BPM) plus padding
    BeatSpan { pad_secs: f64 },
    /// Beat span (or the beats at the clip tempo plus padding) rescaled
    /// by the stretch that was applied
    StretchedSpan { fallback_pad_secs: f64 },
    /// The configured number of beats at the clip's aligned tempo
    AlignedBeats,
}

/// Stretch of the clip toward the background tempo
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipAlignment {
    /// Multiple of the background tempo the clip is aligned to
    pub tempo_multiplier: f64,
    pub range: StretchRange,
}

/// Parameters of one strategy
#[derive(Debug, Clone, PartialEq)]
pub struct MixStrategyConfig {
    pub kind: StrategyKind,
    pub clip_layout: ChannelLayout,
    pub denoise: Denoise,
    /// `None` skips silence trimming and only cuts
    pub silence: Option<SilenceThreshold>,
    pub clip_length: ClipLength,
    pub clip_alignment: Option<ClipAlignment>,
    pub level: LevelPolicy,
    /// Speed factor applied to the background, clamped to [0.5, 2.0]
    pub background_factor: Option<f64>,
    pub loudness: LoudnessTarget,
    /// Always added to the background's balance gain
    pub background_headroom_db: f32,
    pub background_weight: f32,
    pub clip_weight: f32,
    pub dropout_transition_secs: f32,
    pub retune: Option<ToneShifter>,
    pub format: AudioFormat,
}

impl MixStrategyConfig {
    pub fn for_kind(kind: StrategyKind) -> Self {
        let low_pass = BandFilter::low_pass(DEFAULT_CUTOFF_HZ).with_order(DEFAULT_ORDER);
        let common = Self {
            kind,
            clip_layout: ChannelLayout::Mono,
            denoise: Denoise::Percussive,
            silence: None,
            clip_length: ClipLength::AlignedBeats,
            clip_alignment: None,
            level: LevelPolicy::Unchanged,
            background_factor: None,
            loudness: LoudnessTarget::default(),
            background_headroom_db: 0.0,
            background_weight: 0.8,
            clip_weight: 0.2,
            dropout_transition_secs: 3.0,
            retune: None,
            format: AudioFormat::Wav,
        };

        match kind {
            StrategyKind::Basic => Self {
                clip_layout: ChannelLayout::Stereo,
                denoise: Denoise::LowPass(low_pass),
                silence: Some(SilenceThreshold::fixed(-40.0)),
                clip_length: ClipLength::BeatSpan { pad_secs: 0.0 },
                level: LevelPolicy::FloorBoost {
                    floor_db: -50.0,
                    boost_db: 10.0,
                },
                background_factor: Some(DEFAULT_TEMPO_BPM / DEFAULT_TEMPO_BPM),
                background_weight: 0.6,
                clip_weight: 0.4,
                dropout_transition_secs: 2.0,
                ..common
            },
            StrategyKind::DenoisedTuned => Self {
                silence: Some(SilenceThreshold::dynamic()),
                clip_length: ClipLength::BeatSpan { pad_secs: 0.5 },
                level: LevelPolicy::FloorBoost {
                    floor_db: -20.0,
                    boost_db: 6.0,
                },
                background_factor: Some(DEFAULT_TEMPO_BPM / DEFAULT_TEMPO_BPM),
                retune: Some(ToneShifter::a432()),
                ..common
            },
            StrategyKind::TempoMatched => Self {
                clip_length: ClipLength::StretchedSpan {
                    fallback_pad_secs: 0.5,
                },
                clip_alignment: Some(ClipAlignment {
                    tempo_multiplier: 1.0,
                    range: StretchRange::CLIP,
                }),
                level: LevelPolicy::FixedGain { gain_db: -14.0 },
                background_headroom_db: 2.0,
                ..common
            },
            StrategyKind::TempoMatchedDoubled => Self {
                clip_alignment: Some(ClipAlignment {
                    tempo_multiplier: 2.0,
                    range: StretchRange::CLIP,
                }),
                level: LevelPolicy::FloorBoost {
                    floor_db: -25.0,
                    boost_db: 3.0,
                },
                background_headroom_db: 2.0,
                background_weight: 0.75,
                clip_weight: 0.25,
                retune: Some(ToneShifter::a432()),
                ..common
            },
        }
    }

    /// The full catalogue, in submission order
    pub fn all() -> Vec<Self> {
        StrategyKind::ALL.iter().map(|&k| Self::for_kind(k)).collect()
    }

    /// Artifact name, e.g. `v2_mixed.wav`
    pub fn identifier(&self) -> String {
        format!("{}_mixed.{}", self.kind.label(), self.format.extension())
    }
}

/// Input files of one mix job
#[derive(Debug, Clone, PartialEq)]
pub struct MixInputs {
    pub background: PathBuf,
    pub clip: PathBuf,
    /// Working rate both inputs are decoded at
    pub sample_rate: u32,
}

/// Successful job result
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub identifier: String,
    pub artifact: OutputArtifact,
    pub fallbacks: Vec<StageFallback>,
}

/// One parameterized pipeline
#[derive(Debug, Clone)]
pub struct MixStrategy {
    config: MixStrategyConfig,
}

impl MixStrategy {
    pub fn new(config: MixStrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MixStrategyConfig {
        &self.config
    }

    pub fn identifier(&self) -> String {
        self.config.identifier()
    }

    /// Clamped clip stretch ratio for this analysis, if the strategy aligns
    pub fn clip_stretch_ratio(&self, analysis: &AnalysisResult) -> Option<f64> {
        self.config.clip_alignment.map(|alignment| {
            TempoAligner::new(alignment.range).ratio(
                analysis.background_tempo_bpm * alignment.tempo_multiplier,
                analysis.picked_tempo_bpm,
            )
        })
    }

    /// Length the clip is cut to once stretched by `applied_ratio`
    pub fn clip_duration(&self, analysis: &AnalysisResult, applied_ratio: f64) -> f64 {
        let beats = analysis.beats as f64;
        match self.config.clip_length {
            ClipLength::BeatSpan { pad_secs } => {
                analysis
                    .picked_beat_duration_secs
                    .unwrap_or(beats * 60.0 / DEFAULT_TEMPO_BPM)
                    + pad_secs
            }
            ClipLength::StretchedSpan { fallback_pad_secs } => {
                let span = analysis
                    .picked_beat_duration_secs
                    .unwrap_or(beats * 60.0 / analysis.picked_tempo_bpm + fallback_pad_secs);
                span / applied_ratio
            }
            ClipLength::AlignedBeats => beats * 60.0 / (analysis.picked_tempo_bpm * applied_ratio),
        }
    }

    /// Run the pipeline for one pair of inputs
    pub fn run(
        &self,
        engine: &dyn NativeAudioEngine,
        inputs: &MixInputs,
        analysis: &AnalysisResult,
    ) -> Result<JobOutput, JobFailure> {
        let cfg = &self.config;
        let job = self.identifier();
        let fail = |stage: Stage, cause: &dyn std::fmt::Display| {
            let failure = JobFailure::new(job.as_str(), stage, cause);
            tracing::error!(job = %job, stage = %stage, error = %failure.cause, "Job failed");
            failure
        };
        let mut fallbacks = Vec::new();

        info!(job = %job, strategy = cfg.kind.name(), engine = engine.name(), "Job started");

        // Clip
        let loader = TrackLoader::with_sample_rate(inputs.sample_rate);
        let clip = loader
            .clone()
            .with_layout(cfg.clip_layout)
            .load(&inputs.clip)
            .map_err(|e| fail(Stage::Load, &e))?;

        let clip = self.denoise(engine, clip, &mut fallbacks);
        let (clip, applied_ratio) = self.align_clip(engine, clip, analysis, &mut fallbacks);

        let duration = self.clip_duration(analysis, applied_ratio);
        let trimmer = cfg
            .silence
            .map(SilenceTrimmer::new)
            .unwrap_or_else(SilenceTrimmer::passthrough);
        let trimmed = trimmer.trim_and_cut(&clip, duration);
        if trimmed.fell_back {
            fallbacks.push(StageFallback::new(
                Stage::Trim,
                "trim left no audio, cut the untrimmed clip",
            ));
        }
        debug!(job = %job, duration, frames = trimmed.buffer.frames(), "Clip windowed");

        let normalizer = LoudnessNormalizer::new(cfg.loudness);
        let clip = normalizer.normalize_clip(&trimmed.buffer, cfg.level);

        // Background, always mixed in stereo
        let background = loader
            .with_layout(ChannelLayout::Stereo)
            .load(&inputs.background)
            .map_err(|e| fail(Stage::Load, &e))?;
        let background = normalizer.normalize_track(&background);
        let background = match cfg.background_factor {
            Some(factor) => {
                let outcome = TempoAligner::new(StretchRange::BACKGROUND).apply_factor(
                    engine,
                    &background,
                    factor,
                );
                if let Some(e) = outcome.fallback {
                    fallbacks.push(StageFallback::new(Stage::Stretch, format!("background: {}", e)));
                }
                outcome.buffer
            }
            None => background,
        };

        // Blend
        let params = self.mix_params(&background, &clip, &mut fallbacks);
        let mixed = engine
            .mix(&background, &clip, &params)
            .map_err(|e| fail(Stage::Mix, &e))?;

        let mixed = match cfg.retune {
            Some(shifter) => shifter
                .shift(engine, &mixed)
                .map_err(|e| fail(Stage::Retune, &e))?,
            None => mixed,
        };

        let artifact = engine
            .encode(&mixed, cfg.format)
            .map_err(|e| fail(Stage::Encode, &e))?;
        if artifact.is_empty() {
            return Err(fail(Stage::Encode, &"empty artifact"));
        }

        info!(
            job = %job,
            frames = artifact.frames,
            bytes = artifact.bytes.len(),
            fallbacks = fallbacks.len(),
            "Job succeeded"
        );
        Ok(JobOutput {
            identifier: job.clone(),
            artifact,
            fallbacks,
        })
    }

    fn denoise(
        &self,
        engine: &dyn NativeAudioEngine,
        clip: AudioBuffer,
        fallbacks: &mut Vec<StageFallback>,
    ) -> AudioBuffer {
        match self.config.denoise {
            Denoise::LowPass(filter) => match engine.filter(&clip, &filter) {
                Ok(filtered) => filtered,
                Err(e) => {
                    warn!(job = %self.identifier(), stage = "denoise", error = %e, "Filter failed, using unfiltered clip");
                    fallbacks.push(StageFallback::new(Stage::Denoise, e.to_string()));
                    clip
                }
            },
            Denoise::Percussive => {
                let separator = SpectralSeparator::new();
                let planes: Vec<Vec<f32>> = clip
                    .deinterleave()
                    .iter()
                    .map(|plane| separator.percussive(plane))
                    .collect();
                AudioBuffer::from_planar(&planes, clip.sample_rate())
            }
        }
    }

    /// Returns the clip and the ratio it was actually stretched by
    fn align_clip(
        &self,
        engine: &dyn NativeAudioEngine,
        clip: AudioBuffer,
        analysis: &AnalysisResult,
        fallbacks: &mut Vec<StageFallback>,
    ) -> (AudioBuffer, f64) {
        let Some(alignment) = self.config.clip_alignment else {
            return (clip, 1.0);
        };

        let outcome = TempoAligner::new(alignment.range).align(
            engine,
            &clip,
            analysis.background_tempo_bpm * alignment.tempo_multiplier,
            analysis.picked_tempo_bpm,
        );
        match outcome.fallback {
            Some(e) => {
                fallbacks.push(StageFallback::new(Stage::Stretch, format!("clip: {}", e)));
                (outcome.buffer, 1.0)
            }
            None => (outcome.buffer, outcome.ratio),
        }
    }

    fn mix_params(
        &self,
        background: &AudioBuffer,
        clip: &AudioBuffer,
        fallbacks: &mut Vec<StageFallback>,
    ) -> MixParams {
        let cfg = &self.config;
        let background_level = LoudnessNormalizer::mean_dbfs(background);
        let clip_level = LoudnessNormalizer::mean_dbfs(clip);

        let (background_gain_db, clip_gain_db) =
            match balance_gains(background_level, clip_level, cfg.background_headroom_db) {
                Some(gains) => (gains.background_db, gains.clip_db),
                None => {
                    warn!(
                        job = %self.identifier(),
                        stage = "balance",
                        background_level,
                        clip_level,
                        "Non-finite level, balancing disabled"
                    );
                    fallbacks.push(StageFallback::new(
                        Stage::Balance,
                        format!("levels {} / {} dBFS", background_level, clip_level),
                    ));
                    (0.0, 0.0)
                }
            };
        debug!(background_level, clip_level, background_gain_db, clip_gain_db, "Balanced");

        MixParams {
            background_weight: cfg.background_weight,
            clip_weight: cfg.clip_weight,
            background_gain_db,
            clip_gain_db,
            loop_clip: true,
            dropout_transition_secs: cfg.dropout_transition_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::io::Cursor;
    use std::path::Path;
    use woom_audio::DspEngine;

    fn analysis(clip_bpm: f64, background_bpm: f64, span: Option<f64>) -> AnalysisResult {
        AnalysisResult {
            picked_tempo_bpm: clip_bpm,
            picked_beat_duration_secs: span,
            background_tempo_bpm: background_bpm,
            beats: 4,
            fallbacks: Vec::new(),
        }
    }

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: impl Fn(usize) -> f32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample((samples(i).clamp(-1.0, 1.0) * 32767.0) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_catalogue() {
        let all = MixStrategyConfig::all();
        let ids: Vec<String> = all.iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, ["v1_mixed.wav", "v2_mixed.wav", "v3_mixed.wav", "v4_mixed.wav"]);

        let weights: Vec<(f32, f32)> = all
            .iter()
            .map(|c| (c.background_weight, c.clip_weight))
            .collect();
        assert_eq!(weights, [(0.6, 0.4), (0.8, 0.2), (0.8, 0.2), (0.75, 0.25)]);

        let retuned: Vec<bool> = all.iter().map(|c| c.retune.is_some()).collect();
        assert_eq!(retuned, [false, true, false, true]);

        assert_eq!(all[0].clip_layout, ChannelLayout::Stereo);
        assert!(matches!(all[0].denoise, Denoise::LowPass(f) if f.cutoff_hz() == 500.0 && f.order() == 5));
        assert_eq!(all[2].background_headroom_db, 2.0);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("v3".parse::<StrategyKind>(), Ok(StrategyKind::TempoMatched));
        assert_eq!("Denoised-Tuned".parse::<StrategyKind>(), Ok(StrategyKind::DenoisedTuned));
        assert!("v9".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_tempo_matched_ratio() {
        let strategy = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::TempoMatched));
        let ratio = strategy.clip_stretch_ratio(&analysis(140.0, 120.0, Some(1.7))).unwrap();
        assert!((ratio - 120.0 / 140.0).abs() < 1e-12);
        assert!((ratio - 0.857).abs() < 1e-3);

        // Beat span grows by the inverse ratio
        let duration = strategy.clip_duration(&analysis(140.0, 120.0, Some(1.7)), ratio);
        assert!((duration - 1.7 * 140.0 / 120.0).abs() < 1e-9);

        let basic = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::Basic));
        assert!(basic.clip_stretch_ratio(&analysis(140.0, 120.0, None)).is_none());
    }

    #[test]
    fn test_doubled_ratio_is_clamped() {
        let strategy = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::TempoMatchedDoubled));
        // 2 * 180 / 100 = 3.6, clamped to 3.0
        let ratio = strategy.clip_stretch_ratio(&analysis(100.0, 180.0, None)).unwrap();
        assert_eq!(ratio, 3.0);

        // 2 * 120 / 80 = 3.0 exactly: four beats at 240 BPM
        let a = analysis(80.0, 120.0, None);
        let ratio = strategy.clip_stretch_ratio(&a).unwrap();
        assert!((strategy.clip_duration(&a, ratio) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_duration_fallbacks() {
        let none = analysis(100.0, 120.0, None);
        let duration = |kind| MixStrategy::new(MixStrategyConfig::for_kind(kind)).clip_duration(&none, 1.0);

        assert!((duration(StrategyKind::Basic) - 2.0).abs() < 1e-9);
        assert!((duration(StrategyKind::DenoisedTuned) - 2.5).abs() < 1e-9);
        assert!((duration(StrategyKind::TempoMatched) - (2.4 + 0.5)).abs() < 1e-9);
        assert!((duration(StrategyKind::TempoMatchedDoubled) - 2.4).abs() < 1e-9);

        let detected = analysis(100.0, 120.0, Some(1.25));
        let basic = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::Basic));
        assert!((basic.clip_duration(&detected, 1.0) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_every_strategy_produces_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let background = dir.path().join("background.wav");
        let clip = dir.path().join("clip.wav");
        let sample_rate = 22050;

        write_wav(
            &background,
            sample_rate,
            2,
            |i| (2.0 * PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.3,
            sample_rate as usize * 3,
        );
        // Half a second of silence, then a click every 0.5 s
        write_wav(
            &clip,
            sample_rate,
            1,
            |i| {
                let in_period = i % (sample_rate as usize / 2);
                if i > sample_rate as usize / 2 && in_period < 300 {
                    0.8 * (1.0 - in_period as f32 / 300.0)
                } else {
                    0.0
                }
            },
            sample_rate as usize * 2,
        );

        let inputs = MixInputs {
            background,
            clip,
            sample_rate,
        };
        let shared = analysis(120.0, 120.0, None);
        let engine = DspEngine::new();

        for config in MixStrategyConfig::all() {
            let strategy = MixStrategy::new(config);
            let output = strategy.run(&engine, &inputs, &shared).unwrap();
            assert_eq!(output.identifier, strategy.identifier());
            assert!(!output.artifact.is_empty());

            let reader = hound::WavReader::new(Cursor::new(output.artifact.bytes)).unwrap();
            assert_eq!(reader.spec().channels, 2);
            assert_eq!(reader.spec().sample_rate, sample_rate);
            let frames = reader.duration() as f64;
            let expected = sample_rate as f64 * 3.0;
            assert!(
                (frames - expected).abs() / expected < 0.01,
                "{} has {} frames",
                output.identifier,
                frames
            );
        }
    }

    #[test]
    fn test_mono_background_mixes_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let background = dir.path().join("background.wav");
        let clip = dir.path().join("clip.wav");
        let sample_rate = 22050;

        write_wav(
            &background,
            sample_rate,
            1,
            |i| (2.0 * PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.3,
            sample_rate as usize * 2,
        );
        write_wav(
            &clip,
            sample_rate,
            2,
            |i| if i % 5512 < 200 { 0.7 } else { 0.0 },
            sample_rate as usize,
        );

        let inputs = MixInputs {
            background,
            clip,
            sample_rate,
        };
        let strategy = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::Basic));
        let output = strategy
            .run(&DspEngine::new(), &inputs, &analysis(120.0, 120.0, None))
            .unwrap();

        let reader = hound::WavReader::new(Cursor::new(output.artifact.bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
    }

    #[test]
    fn test_missing_input_fails_at_load() {
        let strategy = MixStrategy::new(MixStrategyConfig::for_kind(StrategyKind::Basic));
        let inputs = MixInputs {
            background: PathBuf::from("/nonexistent/bg.wav"),
            clip: PathBuf::from("/nonexistent/clip.wav"),
            sample_rate: 22050,
        };
        let failure = strategy
            .run(&DspEngine::new(), &inputs, &analysis(120.0, 120.0, None))
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
        assert_eq!(failure.job, "v1_mixed.wav");
    }
}
