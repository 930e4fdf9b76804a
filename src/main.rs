//! oxstruct - structured-output LLM jobs from the command line.
//!
//! Thin binary entry point: builds the Tokio runtime, initialises tracing,
//! parses arguments, and maps pipeline errors onto the documented exit
//! codes.

use anyhow::Context;
use clap::Parser;
use oxstruct_core::error::{ExitCode, OxError};

mod cli;
mod render;

use cli::args::{Cli, Commands};

fn main() -> std::process::ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::InternalError.into();
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::Success.into(),
        Err(err) => {
            eprintln!("Error: {}", err.user_message());
            err.exit_code().into()
        }
    }
}

async fn run() -> Result<(), OxError> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cli::run::handle(args).await,
        Commands::Runx(args) => cli::runx::handle(args).await,
    }
}

/// `RUST_LOG`-driven tracing to stderr; errors only by default so stdout
/// stays clean for the JSON result.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
