mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{cmd_inspect, cmd_lookup};

#[derive(Parser)]
#[command(name = "mmdb-lookup")]
#[command(
    about = "Look up IP addresses in MaxMind DB (MMDB) files",
    long_about = "mmdb-lookup - Query MaxMind DB files from the command line\n\n\
    Looks up IPv4/IPv6 addresses and prints the matching record as JSON.\n\
    Set RUST_LOG=debug for reader diagnostics on stderr.\n\n\
    Examples:\n\
      mmdb-lookup lookup GeoLite2-City.mmdb 81.2.69.160\n\
      mmdb-lookup lookup GeoLite2-City.mmdb 81.2.69.160 2001:218:: --prefix\n\
      mmdb-lookup inspect GeoLite2-City.mmdb --json"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one or more IP addresses
    Lookup {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IP addresses to look up
        #[arg(value_name = "IP", required = true)]
        ips: Vec<String>,

        /// Include the matched network and prefix length
        #[arg(short, long)]
        prefix: bool,

        /// No output, exit status only (0 if every address matched)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show database metadata
    Inspect {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Lookup {
            database,
            ips,
            prefix,
            quiet,
        } => cmd_lookup(database, ips, prefix, quiet),
        Commands::Inspect { database, json } => cmd_inspect(database, json),
    }
}
