//! launchpad - A time-aware dashboard for Home Assistant scripts and scenes
//!
//! Serves a small web page listing scripts and scenes grouped by area, with
//! the ones you usually run around this time of day on top.

mod api;
mod cache;
mod cli;
mod commands;
mod config;
mod dashboard;
mod error;
mod gateway;
mod output;
mod ranking;
mod server;
mod usage;
mod websocket;

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command, ServeArgs};
use crate::config::RuntimeContext;

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr(), "Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RuntimeContext::new(&cli.global)?;
    ctx.init_logging()?;

    log::debug!("Config loaded from: {:?}", ctx.config_path());

    // Request handlers and background refreshes share the runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));
    runtime.block_on(run_command(&ctx, command))
}

async fn run_command(ctx: &RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Serve(args) => commands::serve::run(ctx, args).await,
        Command::Activate { entity_id } => commands::activate::run(ctx, &entity_id).await,
        Command::Usage { command } => commands::usage::run(ctx, command).await,
        Command::Cache { command } => commands::cache::run(ctx, command),
        Command::Config { command } => commands::config::run(ctx, command),
        Command::Completions { shell } => commands::completions::run(shell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_is_the_default() {
        let cli = Cli::try_parse_from(["launchpad"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["launchpad", "serve", "--port", "8080"]).unwrap();
        match cli.command {
            Some(Command::Serve(args)) => assert_eq!(args.port, Some(8080)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
