/// # dir_sv
///
/// A minimal HTTP server that exposes one directory tree for browsing and
/// download. Directory requests render an HTML listing, file requests stream
/// the file with caching headers, and nothing outside the root is reachable.
///
/// The `run` function parses command-line arguments, validates the root and
/// serves until SIGINT or SIGTERM.
pub mod cli;
pub mod config;
pub mod content;
pub mod deadline;
pub mod error;
pub mod fs;
pub mod http;
pub mod listing;
pub mod resolver;
pub mod response;
pub mod router;
pub mod server;
pub mod templates;


use crate::cli::Cli;
use crate::config::ServerConfig;
use clap::Parser;
use log::{error, info};
use std::sync::mpsc;

/// Initializes the logger, parses command-line arguments, and starts the server.
///
/// Startup failures (bad root, port in use, no signal handler) are logged
/// and end the process with exit code 1. A signal-triggered shutdown
/// returns normally.
pub fn run() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::debug!("Log level set to: {log_level}");

    let config = match ServerConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received termination signal");
        let _ = shutdown_tx.send(());
    }) {
        error!("Failed to install signal handler: {e}");
        std::process::exit(1);
    }

    if let Err(e) = server::run_server(config, Some(shutdown_rx), None) {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
