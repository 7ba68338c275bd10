//! Uniform tempo adjustment of one input at several speeds

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use woom_audio::{AudioBuffer, AudioFormat, NativeAudioEngine, OutputArtifact, StretchRange, TempoAligner};
use woom_source::{MixerConfig, TrackLoader};

use crate::error::{JobFailure, MixError, Stage, StageFallback};
use crate::pool::{Task, WorkerPool};

/// Named speed presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedPreset {
    Slow,
    Normal,
    Fast,
}

impl SpeedPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "slow" => Some(SpeedPreset::Slow),
            "normal" => Some(SpeedPreset::Normal),
            "fast" => Some(SpeedPreset::Fast),
            _ => None,
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            SpeedPreset::Slow => 0.8,
            SpeedPreset::Normal => 1.0,
            SpeedPreset::Fast => 1.2,
        }
    }
}

/// Trim a token and, unless it names a preset, keep only digits and `.`
///
/// Returns `None` when nothing is left.
pub fn sanitize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let token = if SpeedPreset::from_name(trimmed).is_some() {
        trimmed.to_string()
    } else {
        trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect()
    };
    (!token.is_empty()).then_some(token)
}

/// Speed factor of a sanitized token, clamped to [0.1, 10.0]
///
/// Unparsable, non-positive or non-finite values resolve to 1.0.
pub fn resolve_factor(token: &str) -> f64 {
    if let Some(preset) = SpeedPreset::from_name(token) {
        return preset.factor();
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => StretchRange::WIDE.clamp(value),
        _ => 1.0,
    }
}

/// One speed that will be attempted
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedJob {
    pub token: String,
    pub factor: f64,
}

impl SpeedJob {
    pub fn identifier(&self, format: AudioFormat) -> String {
        format!("speed_{}.{}", self.token, format.extension())
    }
}

/// Sanitized plan for a list of tokens
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeedPlan {
    pub jobs: Vec<SpeedJob>,
    /// Raw tokens that sanitized to nothing or repeat an earlier token
    pub skipped: Vec<String>,
}

impl SpeedPlan {
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let mut plan = Self::default();
        for raw in tokens {
            let raw = raw.as_ref();
            match sanitize_token(raw) {
                Some(token) if plan.jobs.iter().any(|job| job.token == token) => {
                    warn!(token = raw, "Speed token repeats an earlier one, skipped");
                    plan.skipped.push(raw.to_string());
                }
                Some(token) => {
                    let factor = resolve_factor(&token);
                    plan.jobs.push(SpeedJob { token, factor });
                }
                None => {
                    warn!(token = raw, "Speed token is empty after sanitizing, skipped");
                    plan.skipped.push(raw.to_string());
                }
            }
        }
        plan
    }
}

/// One adjusted output
#[derive(Debug, Clone)]
pub struct SpeedOutput {
    pub identifier: String,
    pub factor: f64,
    pub artifact: OutputArtifact,
    pub fallbacks: Vec<StageFallback>,
}

/// Everything a tempo batch produced, in token order
#[derive(Debug, Clone, Default)]
pub struct TempoBatchResult {
    pub outputs: Vec<SpeedOutput>,
    pub failures: Vec<JobFailure>,
    pub skipped: Vec<String>,
}

/// Applies a list of speed factors to one input on the bounded pool
pub struct TempoBatch {
    engine: Arc<dyn NativeAudioEngine>,
    config: MixerConfig,
    format: AudioFormat,
}

impl TempoBatch {
    pub fn new(engine: Arc<dyn NativeAudioEngine>, config: MixerConfig) -> Self {
        Self {
            engine,
            config,
            format: AudioFormat::Wav,
        }
    }

    /// Decode `input` and run every token of `tokens`
    pub fn run<S: AsRef<str>>(&self, input: &Path, tokens: &[S]) -> Result<TempoBatchResult, MixError> {
        let buffer = TrackLoader::with_sample_rate(self.config.sample_rate).load(input)?;
        self.run_buffer(buffer, tokens)
    }

    /// Run every token against an already decoded input
    pub fn run_buffer<S: AsRef<str>>(
        &self,
        input: AudioBuffer,
        tokens: &[S],
    ) -> Result<TempoBatchResult, MixError> {
        let plan = SpeedPlan::from_tokens(tokens);
        let input = Arc::new(input);
        let format = self.format;

        let jobs: Vec<(String, Task<SpeedOutput>)> = plan
            .jobs
            .iter()
            .map(|job| {
                let identifier = job.identifier(format);
                let engine = Arc::clone(&self.engine);
                let input = Arc::clone(&input);
                let factor = job.factor;
                let id = identifier.clone();
                let task: Task<SpeedOutput> = Box::new(move || {
                    adjust(engine.as_ref(), &input, factor, format, id)
                });
                (identifier, task)
            })
            .collect();

        let attempted = jobs.len();
        info!(attempted, skipped = plan.skipped.len(), "Tempo batch started");
        let deadline = self
            .config
            .batch_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let handle = WorkerPool::new(self.config.pool_size).submit(jobs, deadline)?;

        let mut completions: Vec<_> = std::iter::from_fn(|| handle.next_completion()).collect();
        completions.sort_by_key(|c| c.index);

        let mut result = TempoBatchResult {
            skipped: plan.skipped,
            ..Default::default()
        };
        for completion in completions {
            match completion.result {
                Ok(output) => result.outputs.push(output),
                Err(failure) => result.failures.push(failure),
            }
        }

        if attempted > 0 && result.outputs.is_empty() {
            error!(failed = result.failures.len(), "Tempo batch failed, no job succeeded");
            return Err(MixError::BatchFailure {
                failures: result.failures,
            });
        }
        Ok(result)
    }
}

fn adjust(
    engine: &dyn NativeAudioEngine,
    input: &AudioBuffer,
    factor: f64,
    format: AudioFormat,
    identifier: String,
) -> Result<SpeedOutput, JobFailure> {
    let outcome = TempoAligner::new(StretchRange::WIDE).apply_factor(engine, input, factor);
    let fallbacks = outcome
        .fallback
        .map(|e| vec![StageFallback::new(Stage::Stretch, e.to_string())])
        .unwrap_or_default();

    let artifact = engine
        .encode(&outcome.buffer, format)
        .map_err(|e| JobFailure::new(identifier.as_str(), Stage::Encode, e))?;
    if artifact.is_empty() {
        return Err(JobFailure::new(identifier.as_str(), Stage::Encode, "empty artifact"));
    }

    info!(job = %identifier, factor, frames = artifact.frames, "Speed adjusted");
    Ok(SpeedOutput {
        identifier,
        factor,
        artifact,
        fallbacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_token("  Slow "), Some("Slow".to_string()));
        assert_eq!(sanitize_token("2.5x"), Some("2.5".to_string()));
        assert_eq!(sanitize_token("../1.5"), Some("..1.5".to_string()));
        assert_eq!(sanitize_token("bogus!"), None);
        assert_eq!(sanitize_token("   "), None);
    }

    #[test]
    fn test_resolve_factor() {
        assert_eq!(resolve_factor("slow"), 0.8);
        assert_eq!(resolve_factor("NORMAL"), 1.0);
        assert_eq!(resolve_factor("Fast"), 1.2);
        assert_eq!(resolve_factor("2.5"), 2.5);
        assert_eq!(resolve_factor("50"), 10.0);
        assert_eq!(resolve_factor("0.01"), 0.1);
        assert_eq!(resolve_factor("0"), 1.0);
        assert_eq!(resolve_factor("1.2.3"), 1.0);
    }

    #[test]
    fn test_plan_skips_empty_tokens() {
        let plan = SpeedPlan::from_tokens(&["Slow", "Fast", "2.5", "bogus!"]);
        let factors: Vec<f64> = plan.jobs.iter().map(|j| j.factor).collect();
        assert_eq!(factors, vec![0.8, 1.2, 2.5]);
        assert_eq!(plan.skipped, vec!["bogus!".to_string()]);
        assert_eq!(plan.jobs[2].identifier(AudioFormat::Wav), "speed_2.5.wav");
    }

    #[test]
    fn test_plan_skips_repeated_tokens() {
        let plan = SpeedPlan::from_tokens(&["2.5", "2.5x", "Fast", " Fast"]);
        let tokens: Vec<&str> = plan.jobs.iter().map(|j| j.token.as_str()).collect();
        assert_eq!(tokens, ["2.5", "Fast"]);
        assert_eq!(plan.skipped, vec!["2.5x".to_string(), " Fast".to_string()]);
    }
}
