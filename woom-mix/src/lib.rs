//! Mix strategies and their orchestration for Woom
//!
//! - `MixStrategy`: one parameterized pipeline per `MixStrategyConfig`
//! - `StrategyOrchestrator`: shared analysis, bounded pool, completion-ordered stream
//! - `TempoBatch`: the same input at several speeds
//! - `BatchRecord`: line-delimited JSON form of a job report

mod analysis;
mod error;
mod orchestrator;
mod pool;
mod record;
mod strategy;
mod tempo;

pub use analysis::AnalysisResult;
pub use error::{AnalysisFallback, InputRole, JobFailure, MixError, Stage, StageFallback};
pub use orchestrator::{
    BatchResult, BatchStream, JobReport, JobStatus, Progress, StrategyOrchestrator,
};
pub use pool::{Completion, JobState, PoolHandle, Task, WorkerPool};
pub use record::BatchRecord;
pub use strategy::{
    ClipAlignment, ClipLength, Denoise, JobOutput, MixInputs, MixStrategy, MixStrategyConfig,
    StrategyKind,
};
pub use tempo::{
    resolve_factor, sanitize_token, SpeedJob, SpeedOutput, SpeedPlan, SpeedPreset,
    TempoBatch, TempoBatchResult,
};
