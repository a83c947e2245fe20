mod cli;
mod config;
mod error;
mod manifest;
mod publish;
mod python;
mod reconcile;
mod repository;
mod utils;
mod workflow;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::RunConfig;
use std::process;
use tracing_subscriber::EnvFilter;

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dependapy={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = RunConfig::from_cli(&cli);
    if let Err(e) = workflow::execute(&config) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
