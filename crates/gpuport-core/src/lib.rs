//! Core contracts for gpuport.
//!
//! This crate contains:
//! - Canonical compute-offer model and validation
//! - Provider identifiers and structured errors
//! - HTTP transport abstraction for provider adapters
//! - Retry policy, concurrency gate, and rate quota
//! - Collector trait, the RunPod collector, and the multi-provider runner

pub mod collector;
pub mod domain;
pub mod error;
pub mod gate;
pub mod http_client;
pub mod providers;
pub mod retry;
pub mod source;
pub mod throttle;

pub use collector::{collect_all, merge_instances, Collector, CollectorConfig, ProviderOutcome};
pub use domain::{Availability, GpuInstance, FIELD_NAMES};
pub use error::{ProviderError, ValidationError};
pub use gate::ConcurrencyGate;
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient, TlsOptions,
};
pub use providers::RunPodCollector;
pub use retry::{retry_with_backoff, Backoff, RetryPolicy, Retryable};
pub use source::ProviderId;
pub use throttle::RateQuota;
