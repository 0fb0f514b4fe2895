//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Keel - a declarative build orchestrator
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run targets of the build descriptor
    Run(RunArgs),

    /// List the targets of the build descriptor
    Targets(TargetsArgs),
}

/// Output format for build events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    /// Human-readable output
    #[default]
    Human,
    /// One JSON object per event
    Json,
}

#[derive(Args)]
pub struct RunArgs {
    /// Targets to run in order (defaults to the project's default target)
    pub targets: Vec<String>,

    /// Build descriptor to use instead of searching for Keel.toml
    #[arg(short, long, value_name = "FILE", env = "KEEL_FILE")]
    pub file: Option<PathBuf>,

    /// Define a property (`name=value`, or `ref:name=value` for a referenced project)
    #[arg(short = 'D', value_name = "NAME=VALUE", value_parser = keel::ops::parse_define)]
    pub define: Vec<(String, String)>,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format for build events
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,
}

#[derive(Args)]
pub struct TargetsArgs {
    /// Build descriptor to use instead of searching for Keel.toml
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Print the execution order of a target (the default target if none given)
    #[arg(long, value_name = "TARGET", num_args = 0..=1, default_missing_value = "")]
    pub order: Option<String>,

    /// Print targets as JSON
    #[arg(long)]
    pub json: bool,
}
