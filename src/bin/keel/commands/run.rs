//! `keel run` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::RunArgs;
use crate::console::ConsoleListener;
use keel::execution::MessageLevel;
use keel::ops::keel_run::{run, RunOptions};
use keel::util::GlobalContext;

pub fn execute(args: RunArgs, ctx: &GlobalContext) -> Result<()> {
    let threshold = if args.quiet {
        MessageLevel::Warning
    } else if ctx.is_verbose() {
        MessageLevel::Verbose
    } else {
        MessageLevel::Info
    };
    let console = ConsoleListener::new(args.message_format, threshold, ctx.color());

    let opts = RunOptions {
        descriptor: args.file,
        targets: args.targets,
        properties: args.define,
        listeners: vec![Arc::new(console)],
    };
    run(ctx, opts)
}
