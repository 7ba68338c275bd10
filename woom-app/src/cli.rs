//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use woom_mix::StrategyKind;
use woom_source::parse_pool_size;

/// woom - blend a short clip into a background track
///
/// Runs several competing mix strategies concurrently and writes every
/// result that succeeds.
#[derive(Parser, Debug)]
#[command(name = "woom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to <config dir>/woom/config.txt)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mix a clip into a background with every strategy
    Mix(MixArgs),
    /// Write the input at several speeds
    Tempo(TempoArgs),
    /// Print the shared tempo analysis as JSON
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct MixArgs {
    /// Background track
    #[arg(short, long, value_name = "FILE")]
    pub background: PathBuf,

    /// Short clip to blend in
    #[arg(short, long, value_name = "FILE")]
    pub clip: PathBuf,

    /// Directory artifacts are written to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Jobs run at once (1-8)
    #[arg(short, long, value_name = "N", value_parser = parse_pool_size)]
    pub jobs: Option<usize>,

    /// Fail jobs not started after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<String>,

    /// Only run these strategies (v1-v4 or their names); all by default
    #[arg(short = 's', long = "strategy", value_name = "NAME")]
    pub strategies: Vec<StrategyKind>,

    /// Print one JSON record per finished job instead of writing files
    #[arg(long, default_value = "false")]
    pub ndjson: bool,
}

#[derive(Args, Debug)]
pub struct TempoArgs {
    /// Audio to adjust
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Speed token: Slow, Normal, Fast or a factor such as 1.5
    #[arg(short, long = "speed", value_name = "TOKEN", required = true, num_args = 1..)]
    pub speeds: Vec<String>,

    /// Directory outputs are written to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Jobs run at once (1-8)
    #[arg(short, long, value_name = "N", value_parser = parse_pool_size)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[arg(short, long, value_name = "FILE")]
    pub background: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    pub clip: PathBuf,
}

impl Cli {
    /// Default log filter from the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
