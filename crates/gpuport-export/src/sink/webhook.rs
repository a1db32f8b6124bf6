//! Webhook sink: HTTP delivery with batching and status-driven retries.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gpuport_core::{
    retry_with_backoff, HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient, RetryPolicy,
    Retryable, TlsOptions,
};

use crate::loader::{substitute_env_str, ConfigError};
use crate::sink::{Payload, SinkContext, SinkError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl WebhookMethod {
    const fn as_http(self) -> HttpMethod {
        match self {
            Self::Post => HttpMethod::Post,
            Self::Put => HttpMethod::Put,
            Self::Patch => HttpMethod::Patch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSinkConfig {
    pub url: String,
    #[serde(default)]
    pub method: WebhookMethod,
    /// Header values may reference `${NAME}`; resolved from the environment
    /// at send time and never logged.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Split a JSON-array body into chunks of this many records, one
    /// request per chunk. The last chunk may be smaller.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Pause between consecutive batch requests.
    #[serde(default)]
    pub batch_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Response statuses that count as transient.
    #[serde(default = "default_retry_statuses")]
    pub retry_on_status: Vec<u16>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Environment variable NAME holding a PEM client identity for mTLS.
    #[serde(default)]
    pub client_identity_pem_env: Option<String>,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_max_retries() -> u32 {
    3
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

const fn default_true() -> bool {
    true
}

/// Summary of one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_items: usize,
}

impl Display for DeliveryReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} requests delivered, {} items",
            self.successful_requests, self.total_requests, self.total_items
        )
    }
}

/// Per-attempt failure with retryability decided by the sink's allow-list.
#[derive(Debug)]
struct AttemptError {
    error: SinkError,
    retryable: bool,
}

impl Display for AttemptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

pub(crate) async fn deliver(
    config: &WebhookSinkConfig,
    payload: &Payload,
    ctx: &SinkContext,
) -> Result<String, SinkError> {
    let headers = resolve_headers(&config.headers)?;
    let client = select_client(config, ctx)?;
    let batches = split_batches(config, payload)?;

    let policy = RetryPolicy {
        max_retries: config.max_retries,
        retry_on_status: config.retry_on_status.clone(),
        ..RetryPolicy::default()
    };

    let mut report = DeliveryReport {
        total_requests: batches.len(),
        successful_requests: 0,
        failed_requests: 0,
        total_items: batches.iter().map(|b| b.items).sum(),
    };
    let mut last_error: Option<SinkError> = None;

    for (index, batch) in batches.iter().enumerate() {
        if index > 0 && config.batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.batch_delay_ms)).await;
        }

        let attempt = retry_with_backoff(&policy, "webhook.send", || {
            send_once(config, &policy, client.as_ref(), &headers, payload, &batch.body)
        })
        .await;

        match attempt {
            Ok(()) => report.successful_requests += 1,
            Err(attempt_error) => {
                report.failed_requests += 1;
                tracing::error!(
                    url = %config.url,
                    batch = index + 1,
                    total_batches = batches.len(),
                    error = %attempt_error,
                    "webhook batch delivery failed"
                );
                last_error = Some(attempt_error.error);
            }
        }
    }

    tracing::info!(url = %config.url, %report, "webhook delivery finished");

    match last_error {
        None => Ok(report.to_string()),
        Some(error) => Err(augment(error, &report)),
    }
}

async fn send_once(
    config: &WebhookSinkConfig,
    policy: &RetryPolicy,
    client: &dyn HttpClient,
    headers: &BTreeMap<String, String>,
    payload: &Payload,
    body: &str,
) -> Result<(), AttemptError> {
    let mut request = HttpRequest::new(config.method.as_http(), &config.url)
        .with_body(body.to_owned())
        .with_header("content-type", payload.content_type)
        .with_timeout_ms(config.timeout_ms);
    for (name, value) in headers {
        request = request.with_header(name.clone(), value.clone());
    }

    let response = client.execute(request).await.map_err(|e| AttemptError {
        retryable: (e.is_timeout() && policy.retry_on_timeout)
            || (e.is_connect() && policy.retry_on_connect),
        error: SinkError::Connectivity(e.message().to_owned()),
    })?;

    if response.is_success() {
        return Ok(());
    }

    let status = response.status;
    let retryable = policy.should_retry_status(status);
    let error = match status {
        401 | 403 => SinkError::Auth(format!("webhook responded with HTTP {status}")),
        429 => SinkError::QuotaExceeded(format!("webhook responded with HTTP {status}")),
        _ => SinkError::Connectivity(format!("webhook responded with HTTP {status}")),
    };
    Err(AttemptError { error, retryable })
}

struct Batch {
    body: String,
    items: usize,
}

/// Chunk a JSON-array body per `batch_size`; any other body is delivered
/// whole in a single request.
fn split_batches(config: &WebhookSinkConfig, payload: &Payload) -> Result<Vec<Batch>, SinkError> {
    let records: Option<Vec<Value>> = match config.batch_size {
        Some(_) => serde_json::from_str(&payload.body).ok(),
        None => None,
    };

    match (config.batch_size, records) {
        (Some(size), Some(records)) if size > 0 => {
            if records.is_empty() {
                return Ok(vec![Batch {
                    body: String::from("[]"),
                    items: 0,
                }]);
            }
            records
                .chunks(size)
                .map(|chunk| {
                    let body = serde_json::to_string(chunk).map_err(|e| {
                        SinkError::Template(format!("batch serialization failed: {e}"))
                    })?;
                    Ok(Batch {
                        body,
                        items: chunk.len(),
                    })
                })
                .collect()
        }
        _ => Ok(vec![Batch {
            body: payload.body.clone(),
            items: 1,
        }]),
    }
}

/// Resolve `${NAME}` references in header values at send time. Values are
/// never logged; failures name the header and variable only.
fn resolve_headers(
    headers: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, SinkError> {
    let mut resolved = BTreeMap::new();
    for (name, value) in headers {
        let value = substitute_env_str(value).map_err(|e| match e {
            ConfigError::MissingEnvVar { name: var } => SinkError::Template(format!(
                "header '{name}': environment variable '{var}' is not set"
            )),
            other => SinkError::Template(other.to_string()),
        })?;
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

fn select_client(
    config: &WebhookSinkConfig,
    ctx: &SinkContext,
) -> Result<Arc<dyn HttpClient>, SinkError> {
    if config.verify_tls && config.client_identity_pem_env.is_none() {
        return Ok(Arc::clone(&ctx.http));
    }

    let identity = match &config.client_identity_pem_env {
        Some(env_name) => {
            let pem = std::env::var(env_name).map_err(|_| {
                SinkError::Auth(format!("environment variable '{env_name}' is not set"))
            })?;
            Some(pem.into_bytes())
        }
        None => None,
    };

    Ok(Arc::new(ReqwestHttpClient::with_tls(TlsOptions {
        danger_accept_invalid_certs: !config.verify_tls,
        client_identity_pem: identity,
    })))
}

fn augment(error: SinkError, report: &DeliveryReport) -> SinkError {
    let detail = format!("{report}; last error: {error}");
    match error {
        SinkError::Auth(_) => SinkError::Auth(detail),
        SinkError::QuotaExceeded(_) => SinkError::QuotaExceeded(detail),
        SinkError::Template(_) => SinkError::Template(detail),
        SinkError::Io(io) => SinkError::Io(io),
        SinkError::Connectivity(_) => SinkError::Connectivity(detail),
    }
}
