mod cli;
mod commands;
mod config;
mod prompt;
mod source;
mod state;
mod ui;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use stacks::CommandStatus;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Project directory
    pub dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        dir: cli.dir,
    };

    let result = match &cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, args),
        Command::Undeploy(args) => commands::undeploy::run(&ctx, args),
        Command::List(args) => commands::list::run(&ctx, args),
        Command::DependencyGraph(args) => commands::dependency_graph::run(&ctx, args),
    };

    match result {
        Ok(CommandStatus::Success) => Ok(()),
        Ok(status) => {
            log::debug!("Command finished with status {status}");
            std::process::exit(1);
        }
        Err(err) => {
            ui::error(&format!("{err:#}"));
            if let Some(err) = err.downcast_ref::<stacks::Error>() {
                if ctx.verbose > 0 {
                    ui::dim(err.category().description());
                }
                ui::dim(err.advice());
            }
            std::process::exit(1);
        }
    }
}
