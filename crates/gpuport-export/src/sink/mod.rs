//! Output sinks: local filesystem, object storage, and webhooks.
//!
//! Dispatch is exhaustive over [`OutputConfig`]; each delivery acquires and
//! releases its resources within the call. Sink failures are reported per
//! sink and never abort sibling deliveries.

mod local;
mod object_store;
mod webhook;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use gpuport_core::{HttpClient, ReqwestHttpClient, Retryable};

pub use local::LocalSinkConfig;
pub use object_store::{
    InMemoryObjectStore, ObjectStoreClient, ObjectStoreSinkConfig, PutObjectRequest,
    StoredCredentials,
};
pub use webhook::{DeliveryReport, WebhookMethod, WebhookSinkConfig};

use crate::template::TemplateContext;

/// One output destination, tagged by `type` in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    Local(LocalSinkConfig),
    #[serde(rename = "s3")]
    ObjectStore(ObjectStoreSinkConfig),
    #[serde(rename = "https")]
    Webhook(WebhookSinkConfig),
}

impl OutputConfig {
    /// Short human label used in outcomes and log events.
    pub fn label(&self) -> String {
        match self {
            Self::Local(local) => format!("local:{}", local.directory.display()),
            Self::ObjectStore(store) => format!("s3:{}", store.bucket),
            Self::Webhook(webhook) => format!("https:{}", webhook.url),
        }
    }
}

/// Per-sink delivery failure.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connectivity: {0}")]
    Connectivity(String),
    #[error("authentication: {0}")]
    Auth(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("template: {0}")]
    Template(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for SinkError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::QuotaExceeded(_))
    }
}

/// Rendered body plus the run metadata sinks need for naming and batching.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: String,
    /// Format label for `{format}` templating ("json", "csv", "metrics").
    pub format: String,
    pub extension: String,
    pub content_type: &'static str,
    pub pipeline: String,
    pub provider: String,
    pub generated_at: OffsetDateTime,
}

impl Payload {
    pub(crate) fn template_context(&self) -> TemplateContext {
        TemplateContext {
            pipeline: self.pipeline.clone(),
            provider: self.provider.clone(),
            // `{format}` renders the filename extension so patterns like
            // "{pipeline}.{format}" produce usable names for metrics too.
            format: self.extension.clone(),
            generated_at: self.generated_at,
        }
    }
}

/// External collaborators shared by sink deliveries.
#[derive(Clone)]
pub struct SinkContext {
    pub http: Arc<dyn HttpClient>,
    pub object_store: Arc<dyn ObjectStoreClient>,
}

impl SinkContext {
    pub fn new(http: Arc<dyn HttpClient>, object_store: Arc<dyn ObjectStoreClient>) -> Self {
        Self { http, object_store }
    }
}

impl Default for SinkContext {
    fn default() -> Self {
        Self {
            http: Arc::new(ReqwestHttpClient::new()),
            object_store: Arc::new(InMemoryObjectStore::default()),
        }
    }
}

impl std::fmt::Debug for SinkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkContext").finish_non_exhaustive()
    }
}

/// Deliver one payload to one destination. Returns a short human detail
/// (written path, object key, or delivery report).
pub async fn deliver(
    output: &OutputConfig,
    payload: &Payload,
    ctx: &SinkContext,
) -> Result<String, SinkError> {
    match output {
        OutputConfig::Local(config) => local::deliver(config, payload).await,
        OutputConfig::ObjectStore(config) => {
            object_store::deliver(config, payload, ctx.object_store.as_ref()).await
        }
        OutputConfig::Webhook(config) => webhook::deliver(config, payload, ctx).await,
    }
}

/// Gzip-compress a rendered body for file and object sinks.
pub(crate) fn gzip(body: &[u8]) -> Result<Vec<u8>, SinkError> {
    use std::io::Write;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
pub(crate) fn test_payload(body: &str) -> Payload {
    Payload {
        body: body.to_owned(),
        format: String::from("json"),
        extension: String::from("json"),
        content_type: "application/json",
        pipeline: String::from("test-pipeline"),
        provider: String::from("runpod"),
        generated_at: time::macros::datetime!(2026-08-23 12:00:00 UTC),
    }
}
