//! # resid CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers on
//! a single-threaded Tokio runtime.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use resid_cli::credential::{run_reconcile, run_status, ReconcileArgs, StatusArgs};
use resid_cli::ledger::{run_check_address, run_probe, CheckAddressArgs, ProbeArgs};

/// Residency credential operator tool.
///
/// Reconciles local issuance records against the ledger and inspects
/// ledger and store state.
#[derive(Parser, Debug)]
#[command(name = "resid", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild a missing local record from the token the wallet holds.
    Reconcile(ReconcileArgs),

    /// Show the local issuance record for a subject.
    Status(StatusArgs),

    /// Check whether a wallet holds a residency token.
    Probe(ProbeArgs),

    /// Validate a wallet address and print its canonical form.
    CheckAddress(CheckAddressArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(async {
        match &cli.command {
            Commands::Reconcile(args) => run_reconcile(args).await,
            Commands::Status(args) => run_status(args).await,
            Commands::Probe(args) => run_probe(args).await,
            Commands::CheckAddress(args) => run_check_address(args),
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
