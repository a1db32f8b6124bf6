use serde::Serialize;

use gpuport_export::load_export_config;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Report for a successful `gpuport validate`.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub pipeline_count: usize,
    pub pipelines: Vec<PipelineSummary>,
}

#[derive(Debug, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    pub enabled: bool,
    pub filter_count: usize,
    pub output_count: usize,
}

/// Validate a configuration file. Any defect surfaces as a [`CliError`]
/// before this returns.
pub fn validate(args: &ValidateArgs) -> Result<ValidationReport, CliError> {
    let config = load_export_config(&args.config)?;

    let pipelines = config
        .pipelines
        .iter()
        .map(|pipeline| PipelineSummary {
            name: pipeline.name.clone(),
            enabled: pipeline.enabled,
            filter_count: pipeline.filters.len(),
            output_count: pipeline.outputs.len(),
        })
        .collect::<Vec<_>>();

    Ok(ValidationReport {
        valid: true,
        pipeline_count: pipelines.len(),
        pipelines,
    })
}
