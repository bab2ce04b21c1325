//! Clap derive structures for the `hcmqtt` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hcmqtt -- mirror Home Connect appliances onto an MQTT broker
#[derive(Debug, Parser)]
#[command(
    name = "hcmqtt",
    version,
    about = "Bridge Home Connect appliances to MQTT",
    long_about = "Mirrors the state of every Home Connect appliance on the account into\n\
        retained MQTT topics and accepts appliance commands over MQTT.\n\n\
        Run `hcmqtt authorize-url`, open the printed URL, then pass the returned\n\
        code to `hcmqtt authorize --code <CODE>` once before the first run.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "HCMQTT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Print the URL that grants this bridge access to the account
    AuthorizeUrl,

    /// Exchange an authorization code and store the refresh token
    Authorize {
        /// The `code` query parameter from the redirect
        #[arg(long)]
        code: String,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}
