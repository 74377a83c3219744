//! Command-line interface definitions for keygate.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use logging::LogArgs;

/// Command-line interface for the `keygate` binary.
#[derive(Parser, Debug)]
#[command(
    name = "keygate",
    about = "Readiness, ownership and token coordination for the remapping engine",
    version
)]
pub struct Cli {
    /// Logging controls.
    #[command(flatten)]
    pub log: LogArgs,

    /// Settings file (RON). Defaults to the per-user config location.
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Engine executable, overriding the settings file.
    #[arg(long, global = true, value_name = "PATH")]
    pub engine: Option<PathBuf>,

    /// Engine control endpoint, overriding the settings file.
    #[arg(long, global = true, value_name = "ADDR")]
    pub control_addr: Option<SocketAddr>,

    /// Never contact the engine's control endpoint.
    #[arg(long, global = true)]
    pub no_control: bool,

    /// Emit JSON instead of text where supported.
    #[arg(long, global = true)]
    pub json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one full validation and print the state and issues.
    Status,
    /// Keep validating and print every state change.
    Watch {
        /// Interval between unforced validation requests.
        #[arg(
            long,
            value_parser = humantime::parse_duration,
            default_value = "5s",
            value_name = "DURATION"
        )]
        interval: Duration,
    },
    /// Print the permission snapshot for keygate and the engine.
    Permissions {
        /// Bypass the snapshot cache.
        #[arg(long)]
        refresh: bool,
    },
    /// Print engine ownership and any conflicting instances.
    Ownership,
    /// Terminate an orphaned engine and drop its record.
    Reclaim,
    /// Launch the engine and record ownership.
    Start {
        /// Return without waiting for the control endpoint.
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop the engine we own.
    Stop,
    /// Manage the control-protocol session token.
    Token {
        /// Token action.
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Ask the engine to reload its configuration.
    Reload,
    /// Ask the engine to restart, then refresh permissions.
    Restart,
}

/// Token subcommands.
#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Generate and store a token if none exists.
    Ensure,
    /// Print the current token.
    Show,
    /// Replace the token.
    Set {
        /// New token value.
        token: String,
    },
    /// Remove the token from every backend.
    Clear,
}
