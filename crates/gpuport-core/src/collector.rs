//! Collector contract and the multi-provider collection runner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use crate::throttle::RateQuota;
use crate::{GpuInstance, ProviderId};

/// Settings shared by provider collectors.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Budget for one whole fetch, including retries and backoff.
    pub timeout: Duration,
    /// Concurrency gate width for phase-3 pricing calls.
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
    /// Optional request-rate budget layered under the gate.
    pub rate_quota: Option<RateQuota>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrent_requests: 3,
            retry: RetryPolicy::default(),
            rate_quota: None,
        }
    }
}

impl CollectorConfig {
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);
    pub const MAX_RETRIES: u32 = 10;

    /// Clamp settings into sane operational bounds.
    pub fn validated(mut self) -> Self {
        if self.timeout > Self::MAX_TIMEOUT {
            self.timeout = Self::MAX_TIMEOUT;
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(30);
        }
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
        self.retry.max_retries = self.retry.max_retries.min(Self::MAX_RETRIES);
        self
    }
}

/// Provider collection strategy.
///
/// `fetch` returns every normalized offer the provider currently exposes.
/// A malformed individual item must be skipped, never abort the fetch;
/// [`ProviderError`] is reserved for failures of the fetch as a whole.
#[async_trait]
pub trait Collector: Send + Sync {
    fn provider(&self) -> ProviderId;

    async fn fetch(&self) -> Result<Vec<GpuInstance>, ProviderError>;
}

/// Outcome of one provider's fetch within a collection cycle.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: ProviderId,
    pub result: Result<Vec<GpuInstance>, ProviderError>,
    pub duration: Duration,
}

impl ProviderOutcome {
    pub fn instance_count(&self) -> usize {
        self.result.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every collector concurrently, bounding each fetch by `fetch_timeout`.
///
/// Providers share nothing mutable; one provider's terminal failure never
/// prevents the others from completing, and each outcome is reported
/// independently in input order.
pub async fn collect_all(
    collectors: Vec<Arc<dyn Collector>>,
    fetch_timeout: Duration,
) -> Vec<ProviderOutcome> {
    let mut handles = Vec::with_capacity(collectors.len());
    for collector in collectors {
        let provider = collector.provider();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            tracing::info!(%provider, "fetching instances");

            let result = match tokio::time::timeout(fetch_timeout, collector.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "fetch exceeded {}s budget",
                    fetch_timeout.as_secs()
                ))),
            };

            let duration = started.elapsed();
            match &result {
                Ok(instances) => tracing::info!(
                    %provider,
                    instance_count = instances.len(),
                    duration_ms = duration.as_millis() as u64,
                    "fetch completed"
                ),
                Err(error) => tracing::error!(
                    %provider,
                    kind = error.kind(),
                    %error,
                    "fetch failed"
                ),
            }

            ProviderOutcome {
                provider,
                result,
                duration,
            }
        });
        handles.push((provider, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (provider, handle) in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                // A panicked collector task is reported, not propagated.
                outcomes.push(ProviderOutcome {
                    provider,
                    result: Err(ProviderError::Unknown(format!(
                        "collector task panicked: {join_error}"
                    ))),
                    duration: Duration::ZERO,
                });
            }
        }
    }
    outcomes
}

/// Flatten successful outcomes into one immutable record set for export.
pub fn merge_instances(outcomes: &[ProviderOutcome]) -> Vec<GpuInstance> {
    outcomes
        .iter()
        .filter_map(|outcome| outcome.result.as_ref().ok())
        .flat_map(|instances| instances.iter().cloned())
        .collect()
}
