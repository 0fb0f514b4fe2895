//! `keel targets` command

use anyhow::Result;

use crate::cli::TargetsArgs;
use keel::ops::keel_run::load;
use keel::ops::keel_targets::{execution_order, list_targets};
use keel::util::GlobalContext;

pub fn execute(args: TargetsArgs, ctx: &GlobalContext) -> Result<()> {
    let loaded = load(ctx, args.file.as_deref())?;

    if let Some(target) = args.order {
        let target = Some(target.as_str()).filter(|t| !t.is_empty());
        for name in execution_order(&loaded.project, target)? {
            println!("{}", name);
        }
        return Ok(());
    }

    let targets = list_targets(&loaded.project);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("no targets defined in {}", loaded.descriptor.display());
        return Ok(());
    }

    let width = targets.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for target in &targets {
        let marker = if target.is_default { " (default)" } else { "" };
        match &target.description {
            Some(description) => println!(
                "{:width$}  {}{}",
                target.name,
                description,
                marker,
                width = width
            ),
            None => println!("{}{}", target.name, marker),
        }
    }
    Ok(())
}
