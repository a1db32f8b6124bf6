//! Export pipelines for gpuport.
//!
//! This crate contains:
//! - Pipeline-set configuration model and YAML loader
//! - Record filter engine
//! - Transformers (JSON records, CSV tables, aggregate metrics)
//! - Output sinks (local filesystem, object storage, webhooks)
//! - The pipeline orchestrator

pub mod config;
pub mod filter;
pub mod loader;
pub mod pipeline;
pub mod sink;
pub mod template;
pub mod transform;

pub use config::{ExportConfig, FieldMapping, NullHandling, PipelineConfig};
pub use filter::{apply_filters, compile_filters, Filter, FilterConfig, FilterOperator};
pub use loader::{load_export_config, parse_export_config, validate, ConfigError};
pub use pipeline::{run_pipeline, run_pipelines, PipelineResult, PipelineState, SinkOutcome};
pub use sink::{
    deliver, InMemoryObjectStore, LocalSinkConfig, ObjectStoreClient, ObjectStoreSinkConfig,
    OutputConfig, Payload, PutObjectRequest, SinkContext, SinkError, WebhookSinkConfig,
};
pub use transform::{render, Rendered, TransformError, TransformerConfig};
