//! Patchup CLI - Command-line interface
//!
//! Brings a local directory up to the newest version published by an
//! update server.

mod commands;
mod error;
mod observer;

use std::process;

use clap::{Parser, Subcommand};
use patchup::logging::{init_logging, LogConfig};

use commands::GlobalArgs;
use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "patchup")]
#[command(version = patchup::VERSION)]
#[command(about = "Incremental update client")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and apply every missing version
    Update,

    /// Show local and server versions without changing anything
    Status,
}

fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().verbose(cli.global.verbose);
    if let Some(path) = &cli.global.log_file {
        log_config = log_config.with_file(path.clone());
    }
    let guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Update => {
            commands::update::run(&cli.global, guard.log_file().map(|p| p.to_path_buf()))
        }
        Commands::Status => commands::status::run(&cli.global),
    };

    if let Err(e) = result {
        report_error(&e);
        drop(guard);
        process::exit(e.exit_code());
    }
}

fn report_error(e: &CliError) {
    if e.exit_code() == error::EXIT_INTERRUPTED {
        eprintln!("Update interrupted");
    } else {
        eprintln!("Error: {}", e);
    }
}
