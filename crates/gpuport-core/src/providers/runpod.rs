//! RunPod collector using the GraphQL API.
//!
//! Query strategy (three phases):
//! 1. enumerate all GPU types
//! 2. enumerate all datacenters
//! 3. for each GPU type, one combined `lowestPrice` query aliasing every
//!    datacenter, so request payloads stay O(datacenters) while per-request
//!    overhead amortizes across all locations
//!
//! Availability is decided client-side: an (offer, datacenter) pair counts
//! only when the pricing response carries a non-null `stockStatus` for that
//! exact pair. The catalog's `nodeGroupDatacenters` metadata must never gate
//! which datacenters are queried; it reports empty arrays for GPU types that
//! are in stock in several datacenters, so it is ignored entirely.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::collector::{Collector, CollectorConfig};
use crate::error::ProviderError;
use crate::gate::ConcurrencyGate;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::retry::retry_with_backoff;
use crate::{Availability, GpuInstance, ProviderId};

const GRAPHQL_ENDPOINT: &str = "https://api.runpod.io/graphql";
const API_KEY_ENV: &str = "RUNPOD_API_KEY";

/// Collector for RunPod GPU availability and pricing.
#[derive(Clone)]
pub struct RunPodCollector {
    http: Arc<dyn HttpClient>,
    config: CollectorConfig,
    gate: ConcurrencyGate,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GpuTypeMeta {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "memoryInGb", default)]
    memory_in_gb: Option<f64>,
    #[serde(rename = "cudaCores", default)]
    cuda_cores: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DatacenterMeta {
    id: String,
}

impl RunPodCollector {
    /// Build a production collector. The API key is resolved only from the
    /// `RUNPOD_API_KEY` environment variable.
    pub fn new(config: CollectorConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ProviderError::Auth(format!("{API_KEY_ENV} must be set")))?;
        Ok(Self::with_transport(
            config,
            Arc::new(ReqwestHttpClient::new()),
            api_key,
        ))
    }

    /// Build a collector over an injected transport, for tests and custom
    /// client configuration.
    pub fn with_transport(
        config: CollectorConfig,
        http: Arc<dyn HttpClient>,
        api_key: impl Into<String>,
    ) -> Self {
        let config = config.validated();
        let gate = ConcurrencyGate::new(config.max_concurrent_requests);
        Self {
            http,
            config,
            gate,
            api_key: api_key.into(),
            endpoint: String::from(GRAPHQL_ENDPOINT),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Execute one GraphQL query with the gate, rate quota, and retry policy.
    async fn execute_graphql(&self, query: &str) -> Result<Value, ProviderError> {
        let _permit = self.gate.acquire().await;

        retry_with_backoff(&self.config.retry, "runpod.graphql", || async move {
            if let Some(quota) = &self.config.rate_quota {
                quota.acquire().await;
            }

            let request = HttpRequest::post(&self.endpoint)
                .with_auth(&HttpAuth::BearerToken(self.api_key.clone()))
                .with_json_body(&json!({ "query": query, "variables": {} }))
                .map_err(|e| ProviderError::Unknown(format!("query serialization: {e}")))?
                .with_timeout_ms(self.config.timeout.as_millis() as u64);

            let response = self.http.execute(request).await.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.message().to_owned())
                } else {
                    ProviderError::Unknown(e.message().to_owned())
                }
            })?;

            if !response.is_success() {
                return Err(classify_status(response.status, &response.body));
            }

            let body: Value = serde_json::from_str(&response.body).map_err(|e| {
                ProviderError::SchemaChanged(format!("response is not valid JSON: {e}"))
            })?;

            if let Some(errors) = body.get("errors") {
                return Err(ProviderError::SchemaChanged(format!(
                    "GraphQL errors: {errors}"
                )));
            }

            Ok(body.get("data").cloned().unwrap_or(Value::Null))
        })
        .await
    }

    /// Phase 1: enumerate the GPU type catalog.
    async fn fetch_gpu_types(&self) -> Result<Vec<GpuTypeMeta>, ProviderError> {
        let data = self
            .execute_graphql("query { gpuTypes { id displayName memoryInGb cudaCores } }")
            .await?;

        let raw = data
            .get("gpuTypes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // A single malformed catalog entry is skipped, not fatal.
        let mut gpu_types = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_value::<GpuTypeMeta>(entry.clone()) {
                Ok(meta) => gpu_types.push(meta),
                Err(error) => {
                    tracing::warn!(%error, raw = %entry, "skipping malformed gpu type");
                }
            }
        }

        tracing::info!(gpu_type_count = gpu_types.len(), "fetched gpu types");
        Ok(gpu_types)
    }

    /// Phase 2: enumerate the datacenter catalog.
    async fn fetch_datacenters(&self) -> Result<Vec<String>, ProviderError> {
        let data = self
            .execute_graphql("query { dataCenters { id name } }")
            .await?;

        let raw = data
            .get("dataCenters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut ids: Vec<String> = raw
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_value::<DatacenterMeta>(entry)
                    .ok()
                    .map(|dc| dc.id)
            })
            .collect();
        ids.sort();

        tracing::info!(datacenter_count = ids.len(), "fetched datacenters");
        Ok(ids)
    }

    /// Phase 3 query: pricing for one GPU type across every datacenter in a
    /// single round-trip. Breadth is the datacenter count, not the product
    /// of offers and locations.
    fn build_pricing_query(gpu_id: &str, datacenters: &[String]) -> String {
        let mut aliases = String::new();
        for dc in datacenters {
            let alias = datacenter_alias(dc);
            aliases.push_str(&format!(
                "{alias}: lowestPrice(input: {{ dataCenterId: \"{dc}\", gpuCount: 1 }}) {{ \
                 stockStatus uninterruptablePrice minimumBidPrice availableGpuCounts }}\n"
            ));
        }
        format!(
            "query {{ gpuTypes(input: {{ id: \"{gpu_id}\" }}) {{ \
             id displayName memoryInGb cudaCores\n{aliases} }} }}"
        )
    }

    /// Fetch pricing for one GPU type. A failed query logs and yields `None`
    /// so the remaining types still complete.
    async fn fetch_gpu_pricing(&self, gpu_id: &str, datacenters: &[String]) -> Option<Value> {
        let query = Self::build_pricing_query(gpu_id, datacenters);

        match self.execute_graphql(&query).await {
            Ok(data) => {
                let first = data
                    .get("gpuTypes")
                    .and_then(Value::as_array)
                    .and_then(|types| types.first())
                    .cloned();
                if first.is_none() {
                    tracing::warn!(gpu_id, "no pricing data returned for gpu type");
                }
                first
            }
            Err(error) => {
                tracing::error!(gpu_id, kind = error.kind(), %error, "pricing query failed");
                None
            }
        }
    }

    /// Normalize one GPU type's pricing payload into canonical records,
    /// one per datacenter with actual availability.
    fn parse_gpu_offers(
        gpu: &Value,
        datacenters: &[String],
        collected_at: i64,
    ) -> Vec<GpuInstance> {
        let Some(gpu_id) = gpu.get("id").and_then(Value::as_str) else {
            tracing::warn!(raw = %gpu, "skipping pricing payload without gpu id");
            return Vec::new();
        };
        let Some(display_name) = gpu.get("displayName").and_then(Value::as_str) else {
            tracing::warn!(gpu_id, "skipping pricing payload without display name");
            return Vec::new();
        };
        let memory_in_gb = gpu.get("memoryInGb").and_then(Value::as_f64);

        let mut instances = Vec::new();
        for dc in datacenters {
            let alias = datacenter_alias(dc);
            let Some(pricing) = gpu.get(alias.as_str()).filter(|p| !p.is_null()) else {
                continue;
            };

            // Non-null stockStatus is the sole availability signal.
            let Some(stock_status) = pricing.get("stockStatus").and_then(Value::as_str) else {
                continue;
            };

            let price = pricing
                .get("uninterruptablePrice")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let spot_price = pricing
                .get("minimumBidPrice")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let quantity = parse_gpu_counts(pricing.get("availableGpuCounts"));

            let built = GpuInstance::builder(ProviderId::Runpod, gpu_id, display_name, dc)
                .availability(map_stock_status(stock_status))
                .price(price)
                .spot_price(Some(spot_price))
                .quantity(quantity)
                .accelerator_count(1)
                .accelerator_mem_gib(memory_in_gb.filter(|mem| *mem > 0.0))
                .collected_at(collected_at)
                .raw_data(json!({
                    "gpu_type": {
                        "id": gpu_id,
                        "displayName": display_name,
                        "memoryInGb": gpu.get("memoryInGb").cloned().unwrap_or(Value::Null),
                        "cudaCores": gpu.get("cudaCores").cloned().unwrap_or(Value::Null),
                    },
                    "pricing": pricing.clone(),
                    "datacenter": dc,
                }))
                .build();

            match built {
                Ok(instance) => instances.push(instance),
                Err(error) => {
                    tracing::warn!(gpu_id, datacenter = %dc, %error, "skipping invalid offer");
                }
            }
        }
        instances
    }
}

#[async_trait]
impl Collector for RunPodCollector {
    fn provider(&self) -> ProviderId {
        ProviderId::Runpod
    }

    async fn fetch(&self) -> Result<Vec<GpuInstance>, ProviderError> {
        let gpu_types = self.fetch_gpu_types().await?;
        if gpu_types.is_empty() {
            tracing::warn!("no gpu types discovered");
            return Ok(Vec::new());
        }

        let datacenters = self.fetch_datacenters().await?;
        if datacenters.is_empty() {
            tracing::warn!("no datacenters discovered");
            return Ok(Vec::new());
        }

        tracing::info!(
            gpu_type_count = gpu_types.len(),
            datacenter_count = datacenters.len(),
            "fetching pricing data"
        );

        // One gate-bounded pricing query per GPU type; the gate caps how
        // many are in flight at once.
        let datacenters = Arc::new(datacenters);
        let mut handles = Vec::with_capacity(gpu_types.len());
        for gpu in &gpu_types {
            let collector = self.clone();
            let gpu_id = gpu.id.clone();
            let datacenters = Arc::clone(&datacenters);
            handles.push(tokio::spawn(async move {
                collector.fetch_gpu_pricing(&gpu_id, &datacenters).await
            }));
        }

        let mut pricing_payloads = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(payload) => pricing_payloads.push(payload),
                Err(join_error) => {
                    tracing::error!(%join_error, "pricing task panicked");
                    pricing_payloads.push(None);
                }
            }
        }

        // Normalization is pure computation; every call has joined by now.
        let collected_at = OffsetDateTime::now_utc().unix_timestamp();
        let instances: Vec<GpuInstance> = pricing_payloads
            .iter()
            .flatten()
            .flat_map(|gpu| Self::parse_gpu_offers(gpu, &datacenters, collected_at))
            .collect();

        let available = instances.iter().filter(|i| i.is_available()).count();
        tracing::info!(
            gpu_type_count = gpu_types.len(),
            datacenter_count = datacenters.len(),
            total_instances = instances.len(),
            available_instances = available,
            "fetched gpu availability data"
        );

        Ok(instances)
    }
}

fn datacenter_alias(dc: &str) -> String {
    dc.to_ascii_lowercase().replace('-', "_")
}

fn map_stock_status(status: &str) -> Availability {
    match status {
        "High" => Availability::High,
        "Medium" => Availability::Medium,
        "Low" => Availability::Low,
        _ => Availability::NotAvailable,
    }
}

/// `availableGpuCounts` arrives as a list, a scalar, or null.
fn parse_gpu_counts(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Array(counts)) => counts
            .iter()
            .filter_map(Value::as_u64)
            .sum::<u64>()
            .min(u32::MAX as u64) as u32,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32,
        _ => 0,
    }
}

fn classify_status(status: u16, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        401 | 403 => ProviderError::Auth(format!("HTTP {status}: {snippet}")),
        429 => ProviderError::RateLimited(format!("HTTP {status}: {snippet}")),
        408 | 504 => ProviderError::Timeout(format!("HTTP {status}: {snippet}")),
        400..=499 => ProviderError::SchemaChanged(format!("HTTP {status}: {snippet}")),
        _ => ProviderError::Unknown(format!("HTTP {status}: {snippet}")),
    }
}
