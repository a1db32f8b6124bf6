//! CLI argument definitions for gpuport.
//!
//! # Commands
//!
//! | Command    | Description |
//! |------------|-------------|
//! | `run`      | Collect offers from a provider and run export pipelines |
//! | `validate` | Validate an export configuration file |
//!
//! # Examples
//!
//! ```bash
//! # Collect RunPod offers and print a JSON report
//! gpuport run runpod --pretty
//!
//! # Collect and export through configured pipelines
//! gpuport run runpod --export-config pipelines.yaml
//!
//! # Validate a configuration in CI
//! gpuport validate pipelines.yaml
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// GPU compute-offer collection and export.
#[derive(Debug, Parser)]
#[command(
    name = "gpuport",
    version,
    about = "Collect GPU availability and pricing data and export it through pipelines"
)]
pub struct Cli {
    /// Output format for the run report.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat any provider or pipeline failure as a failure exit (code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON report.
    Json,
    /// Short human-readable summary.
    Summary,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Collect offers from a provider, optionally exporting them.
    Run(RunArgs),
    /// Validate an export configuration file without running anything.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Provider to collect from (currently: runpod).
    pub provider: String,

    /// Export configuration file; collected records run through its
    /// pipelines after collection.
    #[arg(long)]
    pub export_config: Option<PathBuf>,

    /// Whole-fetch budget per provider, in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Maximum concurrent API requests per provider.
    #[arg(long, default_value_t = 3)]
    pub max_concurrent: usize,

    /// Retry attempts for transient API failures.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the export configuration file.
    pub config: PathBuf,
}
