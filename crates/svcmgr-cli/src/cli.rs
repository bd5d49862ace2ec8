//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a manager and a client on an in-memory bus and round-trip a file
    Demo {
        /// File to upload and download back
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the default configuration as TOML
    Config,
    /// Load and validate a configuration file
    Check,
}
