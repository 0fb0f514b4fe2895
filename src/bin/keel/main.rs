//! Keel CLI - a declarative build orchestrator

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod console;

use cli::{Cli, Commands};
use keel::util::diagnostic::{emit, Diagnostic};
use keel::util::GlobalContext;

fn main() {
    let cli = Cli::parse();
    let color = !cli.no_color && std::io::stderr().is_terminal();

    if let Err(e) = run(cli, color) {
        emit(&Diagnostic::from_error(&e), color);
        std::process::exit(1);
    }
}

fn run(cli: Cli, color: bool) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("keel=debug")
    } else {
        EnvFilter::new("keel=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let mut ctx = GlobalContext::new()?;
    ctx.set_verbose(cli.verbose);
    ctx.set_color(color);

    // Execute command
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &ctx),
        Commands::Targets(args) => commands::targets::execute(args, &ctx),
    }
}
