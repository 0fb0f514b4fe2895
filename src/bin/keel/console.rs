//! Console output for build events.

use std::io::Write;

use keel::execution::{BuildEvent, BuildListener, MessageLevel};

use crate::cli::MessageFormat;

/// Prints build events to the terminal.
///
/// Messages above `threshold` are dropped. In JSON mode every other event
/// is printed as one object per line on stdout.
pub struct ConsoleListener {
    format: MessageFormat,
    threshold: MessageLevel,
    color: bool,
}

impl ConsoleListener {
    pub fn new(format: MessageFormat, threshold: MessageLevel, color: bool) -> Self {
        ConsoleListener {
            format,
            threshold,
            color,
        }
    }

    fn human(&self, event: &BuildEvent) {
        match event {
            BuildEvent::TargetStarted { target } if self.threshold >= MessageLevel::Info => {
                println!("\n{}:", target.name);
            }
            BuildEvent::MessageLogged {
                level,
                message,
                source,
            } => {
                let text = match source {
                    Some(source) => format!("[{}] {}", source, message),
                    None => message.clone(),
                };
                match level {
                    MessageLevel::Error | MessageLevel::Warning => {
                        eprintln!("{}: {}", self.paint(*level), text);
                    }
                    _ => println!("    {}", text),
                }
            }
            BuildEvent::BuildFinished { failure, .. } => {
                let status = if failure.is_none() {
                    "BUILD SUCCESSFUL"
                } else {
                    "BUILD FAILED"
                };
                if failure.is_some() || self.threshold >= MessageLevel::Info {
                    println!("\n{}", status);
                }
            }
            _ => {}
        }
        let _ = std::io::stdout().flush();
    }

    fn paint(&self, level: MessageLevel) -> String {
        match (self.color, level) {
            (true, MessageLevel::Error) => "\x1b[1;31merror\x1b[0m".to_string(),
            (true, MessageLevel::Warning) => "\x1b[1;33mwarning\x1b[0m".to_string(),
            _ => level.to_string(),
        }
    }
}

impl BuildListener for ConsoleListener {
    fn on_event(&self, event: &BuildEvent) {
        if let BuildEvent::MessageLogged { level, .. } = event {
            if *level > self.threshold {
                return;
            }
        }
        match self.format {
            MessageFormat::Human => self.human(event),
            MessageFormat::Json => println!("{}", event.to_json()),
        }
    }
}
