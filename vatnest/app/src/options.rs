// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub fn parse() -> Options {
    Options::parse()
}

#[derive(Parser, Debug)]
#[command(version)]
pub struct Options {
    /// Home directory; the data dir in settings is resolved against it.
    #[arg(long, default_value = ".vatnest", env = "VATNEST_HOME")]
    pub home_dir: PathBuf,

    /// Set a custom directory for configuration files.
    ///
    /// By default the application looks for `<home>/config`.
    #[arg(short, long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Turn debugging information on.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    pub fn config_dir(&self) -> PathBuf {
        match &self.config_dir {
            Some(dir) => dir.clone(),
            None => self.home_dir.join("config"),
        }
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the kernel, listening for operator RPC calls.
    Run(RunArgs),
    /// Wipe every key from the kernel store. The kernel must not be running.
    ClearState(ClearStateArgs),
    /// Run a query against the kernel store and print the rows.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Optionally override the default configuration.
    #[arg(short, long, default_value = "dev")]
    pub mode: String,
}

#[derive(Args, Debug)]
pub struct ClearStateArgs {
    #[arg(short, long, default_value = "dev")]
    pub mode: String,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(short, long, default_value = "dev")]
    pub mode: String,
    /// e.g. "SELECT key, value FROM kv WHERE key LIKE 'vat.%'"
    pub query: String,
}
