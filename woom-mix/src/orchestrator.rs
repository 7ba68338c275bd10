//! Concurrent multi-strategy orchestration
//!
//! The orchestrator analyses both inputs once, hands the result to every
//! strategy read-only, and runs the strategies on a bounded [`WorkerPool`].
//! Results come back through [`BatchStream`], a blocking iterator that
//! yields each job as soon as it finishes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use woom_audio::DspEngine;
//! use woom_mix::StrategyOrchestrator;
//! use woom_source::MixerConfig;
//!
//! let orchestrator = StrategyOrchestrator::new(Arc::new(DspEngine::new()), MixerConfig::load());
//! for report in orchestrator.run(&background, &clip)? {
//!     println!("{} {} {}", report.progress, report.identifier, report.status());
//! }
//! ```

use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use woom_audio::{NativeAudioEngine, OutputArtifact};
use woom_source::{MixerConfig, ScratchSpace};

use crate::analysis::AnalysisResult;
use crate::error::{JobFailure, MixError, StageFallback};
use crate::pool::{JobState, PoolHandle, Task, WorkerPool};
use crate::strategy::{JobOutput, MixInputs, MixStrategy, MixStrategyConfig};

/// Final status of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => f.write_str("succeeded"),
            JobStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Jobs completed so far out of the batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// One finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub identifier: String,
    pub progress: Progress,
    pub outcome: Result<OutputArtifact, JobFailure>,
    pub fallbacks: Vec<StageFallback>,
}

impl JobReport {
    pub fn status(&self) -> JobStatus {
        match self.outcome {
            Ok(_) => JobStatus::Succeeded,
            Err(_) => JobStatus::Failed,
        }
    }

    pub fn artifact(&self) -> Option<&OutputArtifact> {
        self.outcome.as_ref().ok()
    }
}

/// Runs every configured strategy against one pair of inputs
pub struct StrategyOrchestrator {
    engine: Arc<dyn NativeAudioEngine>,
    config: MixerConfig,
    strategies: Vec<MixStrategyConfig>,
}

impl StrategyOrchestrator {
    /// Orchestrator running the full strategy catalogue
    pub fn new(engine: Arc<dyn NativeAudioEngine>, config: MixerConfig) -> Self {
        Self {
            engine,
            config,
            strategies: MixStrategyConfig::all(),
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<MixStrategyConfig>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn strategies(&self) -> &[MixStrategyConfig] {
        &self.strategies
    }

    /// Shared analysis of both inputs; never fails
    pub fn analyze(&self, background: &Path, clip: &Path) -> AnalysisResult {
        AnalysisResult::from_paths(background, clip, &self.config)
    }

    /// Start the batch for two files on disk
    pub fn run(&self, background: &Path, clip: &Path) -> Result<BatchStream, MixError> {
        let analysis = self.analyze(background, clip);
        self.dispatch(background, clip, analysis, None)
    }

    /// Stage two uploaded streams into a scratch space and start the batch
    ///
    /// The scratch space lives as long as the returned stream.
    pub fn run_uploads<B: Read, C: Read>(
        &self,
        background: (&str, B),
        clip: (&str, C),
    ) -> Result<BatchStream, MixError> {
        let scratch = ScratchSpace::new()?;
        let background_path = scratch.stage_reader(background.0, background.1)?;
        let clip_name = if Path::new(clip.0).file_name() == Path::new(background.0).file_name() {
            format!("clip_{}", clip.0)
        } else {
            clip.0.to_string()
        };
        let clip_path = scratch.stage_reader(&clip_name, clip.1)?;

        let analysis = self.analyze(&background_path, &clip_path);
        self.dispatch(&background_path, &clip_path, analysis, Some(scratch))
    }

    fn dispatch(
        &self,
        background: &Path,
        clip: &Path,
        analysis: AnalysisResult,
        scratch: Option<ScratchSpace>,
    ) -> Result<BatchStream, MixError> {
        let analysis = Arc::new(analysis);
        let inputs = Arc::new(MixInputs {
            background: background.to_path_buf(),
            clip: clip.to_path_buf(),
            sample_rate: self.config.sample_rate,
        });

        let jobs: Vec<(String, Task<JobOutput>)> = self
            .strategies
            .iter()
            .map(|config| {
                let strategy = MixStrategy::new(config.clone());
                let identifier = strategy.identifier();
                let engine = Arc::clone(&self.engine);
                let inputs = Arc::clone(&inputs);
                let analysis = Arc::clone(&analysis);
                let task: Task<JobOutput> =
                    Box::new(move || strategy.run(engine.as_ref(), &inputs, &analysis));
                (identifier, task)
            })
            .collect();

        let deadline = self
            .config
            .batch_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let pool = WorkerPool::new(self.config.pool_size);
        info!(
            jobs = jobs.len(),
            pool_size = pool.size(),
            timeout_secs = ?self.config.batch_timeout.map(|t| t.as_secs_f64()),
            "Batch started"
        );
        let handle = pool.submit(jobs, deadline)?;

        Ok(BatchStream {
            pool: handle,
            analysis,
            completed: 0,
            succeeded: 0,
            _scratch: scratch,
        })
    }
}

/// Lazy, completion-ordered view of a running batch
///
/// Dropping the stream early fails the jobs that have not started and
/// waits for running ones before the scratch space is removed.
pub struct BatchStream {
    pool: PoolHandle<JobOutput>,
    analysis: Arc<AnalysisResult>,
    completed: usize,
    succeeded: usize,
    // Declared after `pool` so it is dropped once every worker has exited
    _scratch: Option<ScratchSpace>,
}

impl BatchStream {
    pub fn total(&self) -> usize {
        self.pool.total()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    pub fn analysis(&self) -> &AnalysisResult {
        &self.analysis
    }

    /// Per-job state, by submission order
    pub fn states(&self) -> Vec<JobState> {
        self.pool.states()
    }

    /// Drain the stream; fails only when no job succeeded
    pub fn collect_batch(mut self) -> Result<BatchResult, MixError> {
        let reports: Vec<JobReport> = self.by_ref().collect();

        if !self.any_succeeded() {
            let failures: Vec<JobFailure> = reports
                .iter()
                .filter_map(|r| r.outcome.as_ref().err().cloned())
                .collect();
            error!(failed = failures.len(), "Batch failed, no job succeeded");
            return Err(MixError::BatchFailure { failures });
        }

        Ok(BatchResult {
            analysis: Arc::clone(&self.analysis),
            reports,
        })
    }
}

impl Iterator for BatchStream {
    type Item = JobReport;

    fn next(&mut self) -> Option<JobReport> {
        let completion = self.pool.next_completion()?;
        self.completed += 1;
        let progress = Progress {
            completed: self.completed,
            total: self.pool.total(),
        };

        let report = match completion.result {
            Ok(output) => {
                self.succeeded += 1;
                info!(job = %output.identifier, %progress, "Job completed");
                JobReport {
                    identifier: output.identifier,
                    progress,
                    outcome: Ok(output.artifact),
                    fallbacks: output.fallbacks,
                }
            }
            Err(failure) => {
                warn!(job = %completion.identifier, %progress, error = %failure, "Job completed with failure");
                JobReport {
                    identifier: completion.identifier,
                    progress,
                    outcome: Err(failure),
                    fallbacks: Vec::new(),
                }
            }
        };
        Some(report)
    }
}

/// Every report of a batch in which at least one job succeeded
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub analysis: Arc<AnalysisResult>,
    /// In completion order
    pub reports: Vec<JobReport>,
}

impl BatchResult {
    /// Successful artifacts with their identifiers
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &OutputArtifact)> {
        self.reports
            .iter()
            .filter_map(|r| r.artifact().map(|a| (r.identifier.as_str(), a)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobFailure> {
        self.reports.iter().filter_map(|r| r.outcome.as_ref().err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn test_progress_display() {
        let progress = Progress {
            completed: 3,
            total: 4,
        };
        assert_eq!(progress.to_string(), "3/4");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_report_status() {
        let failed = JobReport {
            identifier: "v1_mixed.wav".into(),
            progress: Progress {
                completed: 1,
                total: 4,
            },
            outcome: Err(JobFailure::new("v1_mixed.wav", Stage::Mix, "unavailable")),
            fallbacks: Vec::new(),
        };
        assert_eq!(failed.status(), JobStatus::Failed);
        assert!(failed.artifact().is_none());
    }
}
