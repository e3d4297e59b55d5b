mod artifacts;
mod cli;
mod commands;
mod config;
mod configurations;
mod engine;
mod layout;
mod progress;
mod resource;
mod runner;
mod transport;
mod ui;
mod validate;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
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
    };

    match cli.command {
        Command::Apply(args) => commands::deploy::apply(&ctx, args),
        Command::Plan(args) => commands::deploy::plan(&ctx, args),
        Command::Status(args) => commands::deploy::status(&ctx, args),
        Command::Validate(args) => commands::deploy::validate(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "sqlfleet", &mut io::stdout());
            Ok(())
        }
    }
}
