//! Pipeline orchestrator: filter → transform → output with failure
//! isolation.
//!
//! Each pipeline run walks a fixed state machine. Filtering cannot fail.
//! Transforming fails the pipeline only on structural errors. Outputting
//! always attempts every configured sink; the terminal state summarizes
//! how many succeeded.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;

use gpuport_core::GpuInstance;

use crate::config::{ExportConfig, PipelineConfig};
use crate::filter::{apply_filters, compile_filters};
use crate::sink::{deliver, Payload, SinkContext};
use crate::transform::render;

/// Pipeline run states. `Idle` exists only before a run starts; every run
/// finishes in one of the four terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Filtering,
    Transforming,
    Outputting,
    Succeeded,
    PartiallyFailed,
    Failed,
    Skipped,
}

impl PipelineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Filtering => "filtering",
            Self::Transforming => "transforming",
            Self::Outputting => "outputting",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartiallyFailed | Self::Failed | Self::Skipped
        )
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one sink delivery within a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    pub sink: String,
    pub success: bool,
    /// Written path, object key, delivery report, or error message.
    pub detail: String,
}

/// Complete record of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub name: String,
    pub state: PipelineState,
    pub input_count: usize,
    pub filtered_count: usize,
    pub sink_outcomes: Vec<SinkOutcome>,
    /// Terminal error for Failed runs that never reached the sinks.
    pub error: Option<String>,
    #[serde(skip)]
    pub filter_duration: Duration,
    #[serde(skip)]
    pub transform_duration: Duration,
    #[serde(skip)]
    pub output_duration: Duration,
    #[serde(skip)]
    pub total_duration: Duration,
}

impl PipelineResult {
    fn skipped(name: &str, input_count: usize) -> Self {
        Self {
            name: name.to_owned(),
            state: PipelineState::Skipped,
            input_count,
            filtered_count: 0,
            sink_outcomes: Vec::new(),
            error: None,
            filter_duration: Duration::ZERO,
            transform_duration: Duration::ZERO,
            output_duration: Duration::ZERO,
            total_duration: Duration::ZERO,
        }
    }

    fn failed(name: &str, input_count: usize, error: String) -> Self {
        Self {
            name: name.to_owned(),
            state: PipelineState::Failed,
            input_count,
            filtered_count: 0,
            sink_outcomes: Vec::new(),
            error: Some(error),
            filter_duration: Duration::ZERO,
            transform_duration: Duration::ZERO,
            output_duration: Duration::ZERO,
            total_duration: Duration::ZERO,
        }
    }
}

/// Run one pipeline over the shared record set.
pub async fn run_pipeline(
    config: &PipelineConfig,
    instances: &[GpuInstance],
    ctx: &SinkContext,
) -> PipelineResult {
    let started = Instant::now();

    if !config.enabled {
        tracing::info!(pipeline = %config.name, "pipeline disabled, skipping");
        return PipelineResult::skipped(&config.name, instances.len());
    }

    let mut state = PipelineState::Filtering;
    tracing::info!(
        pipeline = %config.name,
        input_count = instances.len(),
        %state,
        "pipeline started"
    );

    // Filters were validated at load; a compile failure here still lands in
    // a clean Failed result instead of a panic.
    let filters = match compile_filters(&config.name, &config.filters) {
        Ok(filters) => filters,
        Err(error) => return PipelineResult::failed(&config.name, instances.len(), error.to_string()),
    };

    let filter_started = Instant::now();
    let filtered = apply_filters(&filters, instances);
    let filter_duration = filter_started.elapsed();

    state = PipelineState::Transforming;
    tracing::info!(
        pipeline = %config.name,
        filtered_count = filtered.len(),
        %state,
        "records filtered"
    );

    let transform_started = Instant::now();
    let rendered = match render(&config.transformer, &filtered) {
        Ok(rendered) => rendered,
        Err(error) => {
            tracing::error!(pipeline = %config.name, %error, "transform failed");
            let mut result =
                PipelineResult::failed(&config.name, instances.len(), error.to_string());
            result.filtered_count = filtered.len();
            result.filter_duration = filter_duration;
            result.transform_duration = transform_started.elapsed();
            result.total_duration = started.elapsed();
            return result;
        }
    };
    let transform_duration = transform_started.elapsed();

    let payload = Payload {
        body: rendered.body,
        format: rendered.format.to_owned(),
        extension: rendered.extension.to_owned(),
        content_type: rendered.content_type,
        pipeline: config.name.clone(),
        provider: provider_label(&filtered),
        generated_at: OffsetDateTime::now_utc(),
    };

    state = PipelineState::Outputting;
    let output_started = Instant::now();
    let mut sink_outcomes = Vec::with_capacity(config.outputs.len());
    for output in &config.outputs {
        let label = output.label();
        match deliver(output, &payload, ctx).await {
            Ok(detail) => sink_outcomes.push(SinkOutcome {
                sink: label,
                success: true,
                detail,
            }),
            Err(error) => {
                tracing::error!(
                    pipeline = %config.name,
                    sink = %label,
                    %error,
                    "sink delivery failed"
                );
                sink_outcomes.push(SinkOutcome {
                    sink: label,
                    success: false,
                    detail: error.to_string(),
                });
            }
        }
    }
    let output_duration = output_started.elapsed();

    let succeeded = sink_outcomes.iter().filter(|o| o.success).count();
    state = if succeeded == sink_outcomes.len() {
        PipelineState::Succeeded
    } else if succeeded > 0 {
        PipelineState::PartiallyFailed
    } else {
        PipelineState::Failed
    };

    let total_duration = started.elapsed();
    tracing::info!(
        pipeline = %config.name,
        %state,
        sinks_ok = succeeded,
        sinks_total = sink_outcomes.len(),
        duration_ms = total_duration.as_millis() as u64,
        "pipeline finished"
    );

    PipelineResult {
        name: config.name.clone(),
        state,
        input_count: instances.len(),
        filtered_count: filtered.len(),
        sink_outcomes,
        error: None,
        filter_duration,
        transform_duration,
        output_duration,
        total_duration,
    }
}

/// Run every configured pipeline concurrently over the shared immutable
/// record set. Results come back in configuration order; one pipeline's
/// failure never disturbs another.
pub async fn run_pipelines(
    instances: Vec<GpuInstance>,
    config: &ExportConfig,
    ctx: &SinkContext,
) -> Vec<PipelineResult> {
    let instances: Arc<Vec<GpuInstance>> = Arc::new(instances);

    let mut handles = Vec::with_capacity(config.pipelines.len());
    for pipeline in &config.pipelines {
        let pipeline = pipeline.clone();
        let instances = Arc::clone(&instances);
        let ctx = ctx.clone();
        handles.push((
            pipeline.name.clone(),
            tokio::spawn(async move { run_pipeline(&pipeline, &instances, &ctx).await }),
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(join_error) => {
                results.push(PipelineResult::failed(
                    &name,
                    instances.len(),
                    format!("pipeline task panicked: {join_error}"),
                ));
            }
        }
    }
    results
}

/// Provider label for templating: the single provider when the surviving
/// set is homogeneous, "all" otherwise.
fn provider_label(instances: &[GpuInstance]) -> String {
    let mut providers = instances.iter().map(|i| i.provider);
    match providers.next() {
        Some(first) if providers.all(|p| p == first) => first.as_str().to_owned(),
        _ => String::from("all"),
    }
}
