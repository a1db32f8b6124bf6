mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Run(args) => {
            let report = commands::run(args).await?;
            output::render_run(&report, cli.format, cli.pretty)?;

            if cli.strict {
                let providers_failed = report.providers_failed();
                let pipelines_failed = report.pipelines_failed();
                if providers_failed + pipelines_failed > 0 {
                    return Err(CliError::StrictModeViolation {
                        providers_failed,
                        pipelines_failed,
                    });
                }
            }
        }
        Command::Validate(args) => {
            let report = commands::validate(args)?;
            output::render_validation(&report, cli.format, cli.pretty)?;
        }
    }

    Ok(())
}

/// Log events go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
