//! Blobtally command line
//!
//! `scan` crawls the storage tree and writes CSV manifests per container,
//! publishing them with `--upload`. `status` prints the saved progress.
//!
//! Exit codes: 0 on a complete run, 1 on a fatal error, 2 when some units
//! could not be listed.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "blobtally", version, about = "Storage inventory crawler")]
struct Cli {
    /// Mirror info logs on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl accounts, containers and objects into CSV manifests
    Scan(cli::scan::ScanArgs),
    /// Show crawl progress
    Status(cli::status::StatusArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan(args) => cli::scan::run(args, cli.verbose),
        Commands::Status(args) => cli::status::run(args).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}
