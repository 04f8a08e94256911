//! CLI argument parsing and command definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// A time-aware dashboard for Home Assistant scripts and scenes
#[derive(Debug, Parser)]
#[command(
    name = "launchpad",
    author,
    version,
    about = "A time-aware dashboard for Home Assistant scripts and scenes",
    propagate_version = true,
    after_help = "Runs the dashboard server when no command is given."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Global options available to all commands
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalOpts {
    /// Output format (json, yaml, table, auto)
    #[arg(short = 'o', long = "output", value_enum, global = true)]
    pub output_format: Option<OutputFormat>,

    /// Home Assistant base URL
    #[arg(short = 's', long, env = "HA_URL", global = true)]
    pub server: Option<String>,

    /// Long-lived access token
    #[arg(long, env = "HA_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Skip SSL certificate verification (REST only; WebSocket registry calls are skipped over TLS)
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Override config file path
    #[arg(long, value_name = "PATH", env = "LAUNCHPAD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase logging verbosity (stackable: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable trace logging
    #[arg(long, global = true)]
    pub trace: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Hide table headers
    #[arg(long, global = true)]
    pub no_headers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[non_exhaustive]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
    Auto,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the dashboard web server
    Serve(ServeArgs),

    /// Trigger a script or scene and record the activation
    Activate {
        /// Entity ID (e.g., script.good_morning)
        entity_id: String,
    },

    /// Inspect recorded usage
    Usage {
        #[command(subcommand)]
        command: UsageCommand,
    },

    /// Inspect and manage the dashboard cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Debug, Subcommand)]
pub enum UsageCommand {
    /// Show the scripts and scenes most relevant right now
    Now,

    /// Show how many activations have been recorded
    Count,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cached keys and their freshness
    Status,

    /// Remove the cache snapshot
    Clear,

    /// Print the cache snapshot path
    Path,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show effective configuration
    Show,

    /// Print config file path
    Path,

    /// Get a specific configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: Option<String>,
    },

    /// Reset configuration to defaults
    Reset,
}
