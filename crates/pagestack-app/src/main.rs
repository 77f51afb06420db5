// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pagestack — multi-page scan capture and page editing
//
// Entry point. Initialises logging, restores the persisted session, runs one
// command, and prints its result as JSON on stdout. Diagnostics go to stderr.

mod commands;
mod services;

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use pagestack_core::data_dir;
use pagestack_core::human_errors::humanize_error;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use commands::{Cli, CliError};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Cli { command } = Cli::parse();
    if let Err(message) = command.validate() {
        Cli::command().error(ErrorKind::ValueValidation, message).exit();
    }

    let dir = data_dir::data_dir();
    let mut session = match services::session::open(&dir) {
        Ok(session) => session,
        Err(e) => return report(&CliError::from(e)),
    };
    tracing::debug!(pages = session.len(), "session ready");

    match commands::run(command, &mut session).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

fn report(err: &CliError) -> ExitCode {
    match err {
        CliError::NoSuchPage(_) => {
            tracing::error!(error = %err, "command failed");
            println!("{:#}", json!({ "error": err.to_string() }));
            ExitCode::FAILURE
        }
        CliError::Pipeline(e) => {
            tracing::error!(error = %e, "command failed");
            println!(
                "{:#}",
                json!({ "error": e.to_string(), "notice": humanize_error(e) })
            );
            ExitCode::FAILURE
        }
    }
}
