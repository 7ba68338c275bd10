//! Failure and fallback taxonomy
//!
//! Only [`MixError`] is ever returned to a caller as a hard error. Stage
//! and analysis fallbacks are recorded values, and a [`JobFailure`] stays
//! attached to its own job report.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use woom_audio::EngineError;
use woom_source::LoadError;

/// Pipeline step a fallback or failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Denoise,
    Trim,
    Stretch,
    Level,
    Balance,
    Mix,
    Retune,
    Encode,
    /// Never started: the batch deadline passed first
    Queue,
    /// The job panicked
    Worker,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Denoise => "denoise",
            Stage::Trim => "trim",
            Stage::Stretch => "stretch",
            Stage::Level => "level",
            Stage::Balance => "balance",
            Stage::Mix => "mix",
            Stage::Retune => "retune",
            Stage::Encode => "encode",
            Stage::Queue => "queue",
            Stage::Worker => "worker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which input an analysis fallback concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    Background,
    Clip,
}

/// Tempo or beat detection was unusable and defaults were substituted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisFallback {
    pub source: InputRole,
    pub reason: String,
}

/// A conditioning stage failed and its input was passed on instead
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFallback {
    pub stage: Stage,
    pub reason: String,
}

impl StageFallback {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StageFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Terminal failure of one job
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{job} failed at {stage}: {cause}")]
pub struct JobFailure {
    /// Identifier of the job (artifact name)
    pub job: String,
    pub stage: Stage,
    pub cause: String,
}

impl JobFailure {
    pub fn new(job: impl Into<String>, stage: Stage, cause: impl ToString) -> Self {
        Self {
            job: job.into(),
            stage,
            cause: cause.to_string(),
        }
    }
}

/// Errors surfaced to the caller of a batch
#[derive(Error, Debug)]
pub enum MixError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("All {} jobs failed", failures.len())]
    BatchFailure { failures: Vec<JobFailure> },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = JobFailure::new("v3_mixed.wav", Stage::Mix, "no backend");
        assert_eq!(failure.to_string(), "v3_mixed.wav failed at mix: no backend");

        let batch = MixError::BatchFailure {
            failures: vec![failure.clone(), failure],
        };
        assert_eq!(batch.to_string(), "All 2 jobs failed");
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let fallback = StageFallback::new(Stage::Stretch, "engine unavailable");
        let json = serde_json::to_string(&fallback).unwrap();
        assert_eq!(json, r#"{"stage":"stretch","reason":"engine unavailable"}"#);
    }
}
