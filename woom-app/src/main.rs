//! woom CLI entry point

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use woom_audio::{DspEngine, NativeAudioEngine};
use woom_mix::{BatchRecord, MixStrategyConfig, StrategyOrchestrator, TempoBatch};
use woom_source::MixerConfig;

use cli::{AnalyzeArgs, Cli, Command, MixArgs, TempoArgs};

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let engine: Arc<dyn NativeAudioEngine> = Arc::new(DspEngine::new());

    match cli.command {
        Command::Mix(args) => run_mix(args, config, engine),
        Command::Tempo(args) => run_tempo(args, config, engine),
        Command::Analyze(args) => run_analyze(args, config, engine),
    }
}

/// File, then environment
fn load_config(cli: &Cli) -> anyhow::Result<MixerConfig> {
    let mut config = match &cli.config {
        Some(path) => MixerConfig::load_from(path)
            .with_context(|| format!("Could not read config {}", path.display()))?,
        None => MixerConfig::load_from(&MixerConfig::config_path()).unwrap_or_default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn run_mix(
    args: MixArgs,
    mut config: MixerConfig,
    engine: Arc<dyn NativeAudioEngine>,
) -> anyhow::Result<ExitCode> {
    if let Some(jobs) = args.jobs {
        config.pool_size = jobs;
    }
    if let Some(timeout) = &args.timeout {
        config.set("batch_timeout_secs", timeout)?;
    }
    if !args.ndjson {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("Could not create {}", args.out.display()))?;
    }

    let mut orchestrator = StrategyOrchestrator::new(engine, config);
    if !args.strategies.is_empty() {
        let mut kinds = Vec::new();
        for kind in &args.strategies {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        orchestrator =
            orchestrator.with_strategies(kinds.into_iter().map(MixStrategyConfig::for_kind).collect());
    }
    let mut stream = orchestrator.run(&args.background, &args.clip)?;
    let total = stream.total();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for report in stream.by_ref() {
        if args.ndjson {
            writeln!(out, "{}", BatchRecord::from_report(&report).to_json_line()?)?;
            out.flush()?;
            continue;
        }

        match &report.outcome {
            Ok(artifact) => {
                let path = args.out.join(&report.identifier);
                write_artifact(&path, &artifact.bytes)?;
                writeln!(out, "[{}] {} -> {}", report.progress, report.identifier, path.display())?;
                for fallback in &report.fallbacks {
                    writeln!(out, "      fallback {}", fallback)?;
                }
            }
            Err(failure) => {
                writeln!(out, "[{}] {} failed: {}", report.progress, report.identifier, failure)?;
            }
        }
    }

    if !stream.any_succeeded() {
        eprintln!("All {} strategies failed", total);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_tempo(
    args: TempoArgs,
    mut config: MixerConfig,
    engine: Arc<dyn NativeAudioEngine>,
) -> anyhow::Result<ExitCode> {
    if let Some(jobs) = args.jobs {
        config.pool_size = jobs;
    }

    let result = TempoBatch::new(engine, config).run(&args.input, &args.speeds)?;
    for token in &result.skipped {
        eprintln!("Skipped speed token {:?}", token);
    }
    if result.outputs.is_empty() && result.failures.is_empty() {
        bail!("No usable speed tokens");
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("Could not create {}", args.out.display()))?;
    for output in &result.outputs {
        let path = args.out.join(&output.identifier);
        write_artifact(&path, &output.artifact.bytes)?;
        println!("{:>5.2}x -> {}", output.factor, path.display());
    }
    for failure in &result.failures {
        println!("{}", failure);
    }

    info!(
        written = result.outputs.len(),
        failed = result.failures.len(),
        "Tempo batch finished"
    );
    Ok(ExitCode::SUCCESS)
}

fn run_analyze(
    args: AnalyzeArgs,
    config: MixerConfig,
    engine: Arc<dyn NativeAudioEngine>,
) -> anyhow::Result<ExitCode> {
    let analysis = StrategyOrchestrator::new(engine, config).analyze(&args.background, &args.clip);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(ExitCode::SUCCESS)
}

fn write_artifact(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    fs::write(path, bytes).with_context(|| format!("Could not write {}", path.display()))
}
