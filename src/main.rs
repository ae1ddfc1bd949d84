mod cli;
mod commands;
mod config;
mod connect;
mod credentials;
mod paths;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use connect::BackendKind;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub backend: BackendKind,
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
        backend: cli.backend,
    };
    log::debug!("verbosity {}, backend {:?}", ctx.verbose, ctx.backend);

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Status(args) => commands::status::run(&ctx, args),
        Command::Show { name, json } => commands::show::run(&ctx, &name, json),
        Command::Provide(args) => commands::provide::run(&ctx, args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "keyward", &mut io::stdout());
            Ok(())
        }
    }
}
