use serde::Serialize;

use crate::cli::OutputFormat;
use crate::commands::{RunReport, ValidationReport};
use crate::error::CliError;

pub fn render_run(report: &RunReport, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => render_json(report, pretty),
        OutputFormat::Summary => {
            println!("run_id          : {}", report.run_id);
            println!("generated_at    : {}", report.generated_at);
            for provider in &report.providers {
                let status = if provider.ok { "ok" } else { "failed" };
                print!(
                    "provider {:<8}: {status}, {} instances, {}ms",
                    provider.provider, provider.instance_count, provider.duration_ms
                );
                match &provider.error {
                    Some(error) => println!(" ({error})"),
                    None => println!(),
                }
            }
            println!("total_instances : {}", report.total_instances);

            if !report.pipelines.is_empty() {
                println!("pipelines:");
                for pipeline in &report.pipelines {
                    println!(
                        "  {:<24} {} ({} -> {} records)",
                        pipeline.name, pipeline.state, pipeline.input_count, pipeline.filtered_count
                    );
                    for outcome in &pipeline.sink_outcomes {
                        let mark = if outcome.success { "ok" } else { "failed" };
                        println!("    {:<6} {}: {}", mark, outcome.sink, outcome.detail);
                    }
                    if let Some(error) = &pipeline.error {
                        println!("    error  {error}");
                    }
                }
            }
            Ok(())
        }
    }
}

pub fn render_validation(
    report: &ValidationReport,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => render_json(report, pretty),
        OutputFormat::Summary => {
            println!("configuration valid: {} pipeline(s)", report.pipeline_count);
            for pipeline in &report.pipelines {
                let state = if pipeline.enabled { "enabled" } else { "disabled" };
                println!(
                    "  {:<24} {state}, {} filter(s), {} output(s)",
                    pipeline.name, pipeline.filter_count, pipeline.output_count
                );
            }
            Ok(())
        }
    }
}

fn render_json(value: &impl Serialize, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{payload}");
    Ok(())
}
