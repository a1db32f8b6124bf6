use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{ProviderId, ValidationError};

/// Standardized availability status, identical across all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    NotAvailable,
    Low,
    Medium,
    High,
}

impl Availability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAvailable => "Not Available",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl Display for Availability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical schema field names, in declaration order. Used by the export
/// layer to validate filter and projection configuration at load time.
pub const FIELD_NAMES: [&str; 14] = [
    "provider",
    "instance_type",
    "accelerator_name",
    "accelerator_count",
    "accelerator_mem_gib",
    "region",
    "availability",
    "quantity",
    "price",
    "spot_price",
    "v_cpus",
    "memory_gib",
    "collected_at",
    "raw_data",
];

/// Normalized compute-offer record.
///
/// Created by a provider collector at normalization time and immutable
/// thereafter; pipelines consume it read-only. The schema is identical for
/// every provider so records can be compared fairly across clouds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInstance {
    pub provider: ProviderId,
    pub instance_type: String,
    pub accelerator_name: String,
    pub accelerator_count: u32,
    pub accelerator_mem_gib: Option<f64>,
    pub region: String,
    pub availability: Availability,
    pub quantity: u32,
    /// On-demand price in USD per hour. 0.0 when the provider reports
    /// availability without a price.
    pub price: f64,
    pub spot_price: Option<f64>,
    pub v_cpus: Option<u32>,
    pub memory_gib: Option<f64>,
    /// Unix timestamp set once when the record was normalized.
    pub collected_at: i64,
    /// Original provider payload, passed through opaquely for auditing.
    #[serde(default)]
    pub raw_data: Value,
}

impl GpuInstance {
    pub fn builder(
        provider: ProviderId,
        instance_type: impl Into<String>,
        accelerator_name: impl Into<String>,
        region: impl Into<String>,
    ) -> GpuInstanceBuilder {
        GpuInstanceBuilder {
            provider,
            instance_type: instance_type.into(),
            accelerator_name: accelerator_name.into(),
            region: region.into(),
            accelerator_count: 1,
            accelerator_mem_gib: None,
            availability: Availability::NotAvailable,
            quantity: 0,
            price: 0.0,
            spot_price: None,
            v_cpus: None,
            memory_gib: None,
            collected_at: None,
            raw_data: Value::Null,
        }
    }

    /// Dynamic field access by canonical name.
    ///
    /// Returns `None` for names outside the canonical schema. Absent
    /// optional values are reported as JSON null so filter operators can
    /// distinguish "missing field" from "null value".
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "provider" => Value::from(self.provider.label()),
            "instance_type" => Value::from(self.instance_type.as_str()),
            "accelerator_name" => Value::from(self.accelerator_name.as_str()),
            "accelerator_count" => Value::from(self.accelerator_count),
            "accelerator_mem_gib" => opt_f64(self.accelerator_mem_gib),
            "region" => Value::from(self.region.as_str()),
            "availability" => Value::from(self.availability.as_str()),
            "quantity" => Value::from(self.quantity),
            "price" => Value::from(self.price),
            "spot_price" => opt_f64(self.spot_price),
            "v_cpus" => self.v_cpus.map(Value::from).unwrap_or(Value::Null),
            "memory_gib" => opt_f64(self.memory_gib),
            "collected_at" => Value::from(self.collected_at),
            "raw_data" => self.raw_data.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn is_available(&self) -> bool {
        self.availability != Availability::NotAvailable
    }
}

fn opt_f64(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Builder enforcing the canonical-record invariants at construction.
#[derive(Debug, Clone)]
pub struct GpuInstanceBuilder {
    provider: ProviderId,
    instance_type: String,
    accelerator_name: String,
    region: String,
    accelerator_count: u32,
    accelerator_mem_gib: Option<f64>,
    availability: Availability,
    quantity: u32,
    price: f64,
    spot_price: Option<f64>,
    v_cpus: Option<u32>,
    memory_gib: Option<f64>,
    collected_at: Option<i64>,
    raw_data: Value,
}

impl GpuInstanceBuilder {
    pub fn accelerator_count(mut self, count: u32) -> Self {
        self.accelerator_count = count;
        self
    }

    pub fn accelerator_mem_gib(mut self, mem_gib: Option<f64>) -> Self {
        self.accelerator_mem_gib = mem_gib;
        self
    }

    pub fn availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn spot_price(mut self, spot_price: Option<f64>) -> Self {
        self.spot_price = spot_price;
        self
    }

    pub fn v_cpus(mut self, v_cpus: Option<u32>) -> Self {
        self.v_cpus = v_cpus;
        self
    }

    pub fn memory_gib(mut self, memory_gib: Option<f64>) -> Self {
        self.memory_gib = memory_gib;
        self
    }

    /// Pin the collection timestamp. A whole normalization batch shares
    /// one timestamp; omitting this uses the current time.
    pub fn collected_at(mut self, unix_seconds: i64) -> Self {
        self.collected_at = Some(unix_seconds);
        self
    }

    pub fn raw_data(mut self, raw_data: Value) -> Self {
        self.raw_data = raw_data;
        self
    }

    pub fn build(self) -> Result<GpuInstance, ValidationError> {
        let instance_type = validate_identity("instance_type", self.instance_type)?;
        let accelerator_name = validate_identity("accelerator_name", self.accelerator_name)?;
        let region = validate_identity("region", self.region)?;

        validate_price("price", self.price)?;
        if let Some(spot) = self.spot_price {
            validate_price("spot_price", spot)?;
        }
        validate_optional_positive("accelerator_mem_gib", self.accelerator_mem_gib)?;
        validate_optional_positive("memory_gib", self.memory_gib)?;

        Ok(GpuInstance {
            provider: self.provider,
            instance_type,
            accelerator_name,
            accelerator_count: self.accelerator_count,
            accelerator_mem_gib: self.accelerator_mem_gib,
            region,
            availability: self.availability,
            quantity: self.quantity,
            price: self.price,
            spot_price: self.spot_price,
            v_cpus: self.v_cpus,
            memory_gib: self.memory_gib,
            collected_at: self
                .collected_at
                .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp()),
            raw_data: self.raw_data,
        })
    }
}

fn validate_identity(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(trimmed.to_owned())
}

fn validate_price(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    if value > 1000.0 {
        return Err(ValidationError::UnreasonablePrice { value });
    }
    Ok(())
}

fn validate_optional_positive(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(v) = value {
        if !v.is_finite() {
            return Err(ValidationError::NonFiniteValue { field });
        }
        if v <= 0.0 {
            return Err(ValidationError::NonPositiveValue { field });
        }
    }
    Ok(())
}
