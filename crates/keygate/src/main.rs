#![warn(missing_docs)]

//! Entry point for the `keygate` binary.

mod app;
mod cli;
mod commands;
mod error;
mod settings;

use std::process;

use clap::Parser;
use tokio::runtime::Builder;
use tracing::error;

use crate::{
    app::App,
    cli::{Cli, Commands},
    error::Result,
    settings::Settings,
};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

/// Parse CLI arguments, install logging, and dispatch to the chosen subcommand.
fn run() -> Result<bool> {
    let cli = Cli::parse();
    logging::init(&cli.log.spec());

    let mut settings = Settings::load(cli.settings.as_deref())?;
    if let Some(exe) = cli.engine {
        settings.engine.executable = Some(exe);
    }
    if let Some(addr) = cli.control_addr {
        settings.control.addr = Some(addr);
    }
    if cli.no_control {
        settings.control.enabled = Some(false);
    }

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let app = App::build(settings)?;
        let json = cli.json;
        match cli.command {
            Commands::Status => commands::status(&app, json).await,
            Commands::Watch { interval } => commands::watch(&app, interval, json).await,
            Commands::Permissions { refresh } => commands::permissions(&app, refresh, json).await,
            Commands::Ownership => commands::ownership(&app, json),
            Commands::Reclaim => commands::reclaim(&app).await,
            Commands::Start { no_wait } => commands::start(&app, no_wait).await,
            Commands::Stop => commands::stop(&app).await,
            Commands::Token { action } => commands::token(&app, action),
            Commands::Reload => commands::reload(&app).await,
            Commands::Restart => commands::restart(&app, json).await,
        }
    })
}
