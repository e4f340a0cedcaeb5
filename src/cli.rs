// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the run, once, check and init subcommands and shared flags.

use clap::{Args, Parser, Subcommand, ValueEnum};
use lookout::config::{Overrides, parse_duration};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lookout")]
#[command(about = "Keeps containers on Docker hosts and swarms on their latest images")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: discover lookout.yml in the working directory)
    #[arg(short, long, global = true, env = "LOOKOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent: scheduled scans, HTTP API and signal triggers
    Run {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Run one session per provider and exit (status 1 if any failed)
    Once {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Validate the configuration and ping every provider
    Check {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Write a commented lookout.yml template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct OverrideArgs {
    /// Docker endpoint, replacing the configured providers
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Time between scheduled scans, e.g. 30m or 6h
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Scan once right after startup
    #[arg(long)]
    pub run_on_start: bool,

    /// Report stale containers without replacing them
    #[arg(long)]
    pub monitor_only: bool,

    /// Remove old images after a successful replacement
    #[arg(long)]
    pub cleanup: bool,

    /// Enable the HTTP API on this address
    #[arg(long, value_name = "ADDR")]
    pub api_listen: Option<SocketAddr>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Overrides {
            host: args.host,
            poll_interval: args.interval,
            run_on_start: args.run_on_start,
            monitor_only: args.monitor_only,
            cleanup: args.cleanup,
            api_listen: args.api_listen,
        }
    }
}
