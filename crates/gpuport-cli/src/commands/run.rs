use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use gpuport_core::{
    collect_all, merge_instances, Collector, CollectorConfig, ProviderId, RetryPolicy,
    RunPodCollector,
};
use gpuport_export::{load_export_config, run_pipelines, PipelineResult, PipelineState, SinkContext};

use crate::cli::RunArgs;
use crate::error::CliError;

/// Per-provider slice of the run report.
#[derive(Debug, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    pub ok: bool,
    pub instance_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete report of one `gpuport run` invocation.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub generated_at: String,
    pub providers: Vec<ProviderReport>,
    pub total_instances: usize,
    pub pipelines: Vec<PipelineResult>,
}

impl RunReport {
    pub fn providers_failed(&self) -> usize {
        self.providers.iter().filter(|p| !p.ok).count()
    }

    pub fn pipelines_failed(&self) -> usize {
        self.pipelines
            .iter()
            .filter(|p| {
                matches!(
                    p.state,
                    PipelineState::Failed | PipelineState::PartiallyFailed
                )
            })
            .count()
    }
}

/// Collect from the requested provider, then run export pipelines when a
/// configuration was given.
pub async fn run(args: &RunArgs) -> Result<RunReport, CliError> {
    let provider: ProviderId = args.provider.parse()?;
    tracing::info!(%provider, export = args.export_config.is_some(), "starting collection run");

    let config = CollectorConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        max_concurrent_requests: args.max_concurrent,
        retry: RetryPolicy::exponential(args.max_retries),
        rate_quota: None,
    }
    .validated();
    let fetch_timeout = config.timeout;

    let collector: Arc<dyn Collector> = match provider {
        ProviderId::Runpod => Arc::new(RunPodCollector::new(config)?),
    };

    let outcomes = collect_all(vec![collector], fetch_timeout).await;
    let instances = merge_instances(&outcomes);

    let pipelines: Vec<PipelineResult> = match &args.export_config {
        Some(path) => {
            let export = load_export_config(path)?;
            run_pipelines(instances.clone(), &export, &SinkContext::default()).await
        }
        None => Vec::new(),
    };

    let providers = outcomes
        .into_iter()
        .map(|outcome| ProviderReport {
            provider: outcome.provider.to_string(),
            ok: outcome.is_ok(),
            instance_count: outcome.instance_count(),
            duration_ms: outcome.duration.as_millis() as u64,
            error: outcome.result.err().map(|e| e.to_string()),
        })
        .collect();

    Ok(RunReport {
        run_id: Uuid::new_v4().to_string(),
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        providers,
        total_instances: instances.len(),
        pipelines,
    })
}
