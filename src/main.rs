//! lifecycle - state machine definition tool
//!
//! Validates machine definitions, lists available events and replays event
//! sequences against a fresh instance.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{Config, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(about = "Validate and exercise lifecycle state machine definitions")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Validate a definition file and summarize it
    Validate {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,
    },

    /// List events available from a state
    Events {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,

        /// State to inspect (defaults to the initial state)
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Replay events against a fresh instance
    Run {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,

        /// Events to apply, in order
        #[arg(short, long, value_delimiter = ',', required = true)]
        events: Vec<String>,

        /// Context entries as KEY=VALUE (VALUE parsed as JSON, else string)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Continue after a rejected event
        #[arg(long)]
        keep_going: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", error_line(&e));
            std::process::exit(1);
        }
    };
    if cli.json {
        config.output.format = OutputFormat::Json;
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !config.output.color {
        colored::control::set_override(false);
    }

    match commands::execute(cli.command, &config) {
        Ok(report) => {
            println!("{}", report.output);
            if !report.success {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", error_line(&e));
            std::process::exit(1);
        }
    }
}

/// Formats a fatal error for stderr.
fn error_line(e: &dyn std::fmt::Display) -> String {
    format!("{}: {}", "Error".red(), e)
}
