//! Record transformers: JSON records, CSV tables, and aggregate metrics.
//!
//! A transformer converts the filtered record set into one rendered body.
//! Only structural invalidity (a metric without its field, a projection of
//! an unknown field) is an error; an empty input renders an empty-but-valid
//! body in every format.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use gpuport_core::GpuInstance;

use crate::config::{FieldMapping, NullHandling};

/// Transformer selection, tagged by output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum TransformerConfig {
    /// One JSON object per record.
    Json(RecordTransform),
    /// CSV table with a fixed column order.
    Csv(TabularTransform),
    /// Aggregated metrics document.
    Metrics(AggregateTransform),
}

impl TransformerConfig {
    pub const fn format_label(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Csv(_) => "csv",
            Self::Metrics(_) => "metrics",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTransform {
    /// Optional ordered projection; omitted means the full canonical record.
    #[serde(default)]
    pub fields: Option<FieldMapping>,
    /// Raw provider payloads are bulky; opt in explicitly.
    #[serde(default)]
    pub include_raw_data: bool,
    #[serde(default)]
    pub pretty: bool,
    #[serde(default)]
    pub null_handling: NullHandling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularTransform {
    /// Mandatory; fixes column order and header names.
    pub fields: FieldMapping,
    #[serde(default = "default_true")]
    pub include_header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_quote")]
    pub quote: char,
    /// Rendered in place of null values.
    #[serde(default)]
    pub null_string: String,
}

const fn default_true() -> bool {
    true
}

const fn default_delimiter() -> char {
    ','
}

const fn default_quote() -> char {
    '"'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateTransform {
    pub metrics: Vec<MetricSpec>,
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
    #[serde(default = "default_true")]
    pub include_collection_info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Count,
    Avg,
    Min,
    Max,
    Sum,
    Unique,
}

impl MetricKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Unique => "unique",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(alias = "type")]
    pub kind: MetricKind,
    /// Required for every kind except `count`.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
    /// `unique` reports a distinct count; this adds the value list.
    #[serde(default)]
    pub include_values: bool,
}

/// Structural transform failure. Fails the pipeline; record-level oddities
/// never reach here.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("metric '{metric}' of kind '{kind}' requires a field")]
    MissingMetricField { metric: String, kind: &'static str },
    #[error("{context} references unknown field '{field}'")]
    UnknownField { context: String, field: String },
    #[error("csv rendering failed: {0}")]
    Csv(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A rendered pipeline body plus its format metadata.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub body: String,
    /// Format label used by filename templating ("json", "csv", "metrics").
    pub format: &'static str,
    /// Filename extension.
    pub extension: &'static str,
    pub content_type: &'static str,
}

/// Render the filtered record set with the configured transformer.
pub fn render(
    config: &TransformerConfig,
    instances: &[GpuInstance],
) -> Result<Rendered, TransformError> {
    match config {
        TransformerConfig::Json(record) => render_json(record, instances),
        TransformerConfig::Csv(tabular) => render_csv(tabular, instances),
        TransformerConfig::Metrics(aggregate) => render_metrics(aggregate, instances),
    }
}

fn render_json(
    config: &RecordTransform,
    instances: &[GpuInstance],
) -> Result<Rendered, TransformError> {
    let mut records = Vec::with_capacity(instances.len());

    for instance in instances {
        let mut object = match &config.fields {
            Some(mapping) => {
                let mut object = Map::with_capacity(mapping.len());
                for (source, target) in mapping.iter() {
                    let value = instance.field(source).ok_or_else(|| {
                        TransformError::UnknownField {
                            context: String::from("json projection"),
                            field: source.clone(),
                        }
                    })?;
                    object.insert(target.clone(), value);
                }
                object
            }
            None => {
                let Value::Object(mut object) = serde_json::to_value(instance)? else {
                    unreachable!("a record always serializes to an object");
                };
                if !config.include_raw_data {
                    object.remove("raw_data");
                }
                object
            }
        };

        apply_null_handling(&mut object, config.null_handling);
        records.push(Value::Object(object));
    }

    let array = Value::Array(records);
    let body = if config.pretty {
        serde_json::to_string_pretty(&array)?
    } else {
        serde_json::to_string(&array)?
    };

    Ok(Rendered {
        body,
        format: "json",
        extension: "json",
        content_type: "application/json",
    })
}

fn apply_null_handling(object: &mut Map<String, Value>, handling: NullHandling) {
    match handling {
        NullHandling::Null => {}
        NullHandling::Omit => object.retain(|_, value| !value.is_null()),
        NullHandling::Empty => {
            for value in object.values_mut() {
                if value.is_null() {
                    *value = Value::from("");
                }
            }
        }
    }
}

fn render_csv(
    config: &TabularTransform,
    instances: &[GpuInstance],
) -> Result<Rendered, TransformError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(ascii_or(config.delimiter, b','))
        .quote(ascii_or(config.quote, b'"'))
        .from_writer(Vec::new());

    if config.include_header {
        let header: Vec<&str> = config.fields.iter().map(|(_, target)| target.as_str()).collect();
        writer
            .write_record(&header)
            .map_err(|e| TransformError::Csv(e.to_string()))?;
    }

    for instance in instances {
        let mut row = Vec::with_capacity(config.fields.len());
        for (source, _) in config.fields.iter() {
            let value = instance
                .field(source)
                .ok_or_else(|| TransformError::UnknownField {
                    context: String::from("csv column mapping"),
                    field: source.clone(),
                })?;
            row.push(render_cell(&value, &config.null_string));
        }
        writer
            .write_record(&row)
            .map_err(|e| TransformError::Csv(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TransformError::Csv(e.to_string()))?;
    let body = String::from_utf8(bytes).map_err(|e| TransformError::Csv(e.to_string()))?;

    Ok(Rendered {
        body,
        format: "csv",
        extension: "csv",
        content_type: "text/csv",
    })
}

fn render_cell(value: &Value, null_string: &str) -> String {
    match value {
        Value::Null => null_string.to_owned(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn render_metrics(
    config: &AggregateTransform,
    instances: &[GpuInstance],
) -> Result<Rendered, TransformError> {
    let mut metrics = Map::with_capacity(config.metrics.len());
    for spec in &config.metrics {
        metrics.insert(spec.name.clone(), compute_metric(spec, instances)?);
    }

    let mut document = Map::new();
    if config.include_timestamp {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        document.insert(String::from("timestamp"), Value::from(timestamp));
    }
    if config.include_collection_info {
        document.insert(
            String::from("collection_info"),
            json!({ "total_instances": instances.len() }),
        );
    }
    document.insert(String::from("metrics"), Value::Object(metrics));

    Ok(Rendered {
        body: serde_json::to_string_pretty(&Value::Object(document))?,
        format: "metrics",
        extension: "json",
        content_type: "application/json",
    })
}

fn compute_metric(spec: &MetricSpec, instances: &[GpuInstance]) -> Result<Value, TransformError> {
    if spec.kind != MetricKind::Count && spec.field.is_none() {
        return Err(TransformError::MissingMetricField {
            metric: spec.name.clone(),
            kind: spec.kind.as_str(),
        });
    }

    match &spec.group_by {
        None => compute_scalar(spec, instances),
        Some(group_field) => {
            // BTreeMap keeps group output deterministic; absent keys group
            // under the literal "null".
            let mut groups: BTreeMap<String, Vec<&GpuInstance>> = BTreeMap::new();
            for instance in instances {
                let key = instance
                    .field(group_field)
                    .ok_or_else(|| TransformError::UnknownField {
                        context: format!("metric '{}' group_by", spec.name),
                        field: group_field.clone(),
                    })?;
                groups.entry(value_key(&key)).or_default().push(instance);
            }

            let mut out = Map::with_capacity(groups.len());
            for (key, members) in groups {
                let members: Vec<GpuInstance> = members.into_iter().cloned().collect();
                out.insert(key, compute_scalar(spec, &members)?);
            }
            Ok(Value::Object(out))
        }
    }
}

fn compute_scalar(spec: &MetricSpec, instances: &[GpuInstance]) -> Result<Value, TransformError> {
    let field_values = |field: &str| -> Result<Vec<Value>, TransformError> {
        instances
            .iter()
            .map(|instance| {
                instance
                    .field(field)
                    .ok_or_else(|| TransformError::UnknownField {
                        context: format!("metric '{}'", spec.name),
                        field: field.to_owned(),
                    })
            })
            .collect()
    };

    Ok(match spec.kind {
        MetricKind::Count => match &spec.field {
            // With a field, count records where it is non-null.
            Some(field) => {
                let non_null = field_values(field)?.iter().filter(|v| !v.is_null()).count();
                Value::from(non_null)
            }
            None => Value::from(instances.len()),
        },
        MetricKind::Avg | MetricKind::Min | MetricKind::Max | MetricKind::Sum => {
            let field = spec.field.as_deref().unwrap_or_default();
            let numbers: Vec<f64> = field_values(field)?
                .iter()
                .filter_map(Value::as_f64)
                .collect();
            if numbers.is_empty() {
                // No numeric observations renders null, never an error.
                return Ok(Value::Null);
            }
            let value = match spec.kind {
                MetricKind::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
                MetricKind::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                MetricKind::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                MetricKind::Sum => numbers.iter().sum(),
                _ => unreachable!(),
            };
            Value::from(value)
        }
        MetricKind::Unique => {
            let field = spec.field.as_deref().unwrap_or_default();
            let distinct: BTreeSet<String> = field_values(field)?
                .iter()
                .filter(|v| !v.is_null())
                .map(value_key)
                .collect();
            if spec.include_values {
                json!({
                    "count": distinct.len(),
                    "values": distinct.into_iter().collect::<Vec<String>>(),
                })
            } else {
                Value::from(distinct.len())
            }
        }
    })
}

fn ascii_or(c: char, fallback: u8) -> u8 {
    if c.is_ascii() {
        c as u8
    } else {
        fallback
    }
}

/// Stable string key for grouping and distinct counting.
fn value_key(value: &Value) -> String {
    match value {
        Value::Null => String::from("null"),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use gpuport_core::{Availability, ProviderId};

    use super::*;

    fn instance(region: &str, gpu: &str, price: f64, spot: Option<f64>) -> GpuInstance {
        GpuInstance::builder(ProviderId::Runpod, gpu, gpu, region)
            .price(price)
            .spot_price(spot)
            .availability(Availability::High)
            .quantity(1)
            .build()
            .unwrap()
    }

    fn sample() -> Vec<GpuInstance> {
        vec![
            instance("EU-RO-1", "RTX 4090", 0.79, Some(0.39)),
            instance("US-KS-2", "RTX 4090", 0.69, None),
            instance("EU-RO-1", "A100", 1.89, Some(1.19)),
        ]
    }

    fn mapping(pairs: &[(&str, &str)]) -> FieldMapping {
        FieldMapping(
            pairs
                .iter()
                .map(|(s, t)| ((*s).to_owned(), (*t).to_owned()))
                .collect(),
        )
    }

    fn metric(name: &str, kind: MetricKind, field: Option<&str>) -> MetricSpec {
        MetricSpec {
            name: name.to_owned(),
            kind,
            field: field.map(str::to_owned),
            group_by: None,
            include_values: false,
        }
    }

    #[test]
    fn json_projection_renames_and_orders_keys() {
        let config = RecordTransform {
            fields: Some(mapping(&[("region", "location"), ("price", "usd_per_hour")])),
            ..RecordTransform::default()
        };

        let rendered = render_json(&config, &sample()).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&rendered.body).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0]["location"], "EU-RO-1");
        assert_eq!(parsed[0]["usd_per_hour"], 0.79);
        assert!(parsed[0].get("region").is_none());
    }

    #[test]
    fn json_full_record_drops_raw_data_by_default() {
        let rendered = render_json(&RecordTransform::default(), &sample()).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&rendered.body).unwrap();
        assert!(parsed[0].get("raw_data").is_none());
        assert_eq!(parsed[0]["provider"], "runpod");
    }

    #[test]
    fn json_null_handling_omit_drops_absent_optionals() {
        let config = RecordTransform {
            fields: Some(mapping(&[("region", "region"), ("spot_price", "spot")])),
            null_handling: NullHandling::Omit,
            ..RecordTransform::default()
        };

        let rendered = render_json(&config, &sample()).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&rendered.body).unwrap();
        assert!(parsed[0].get("spot").is_some());
        assert!(parsed[1].get("spot").is_none());
    }

    #[test]
    fn json_empty_input_renders_empty_array() {
        let rendered = render_json(&RecordTransform::default(), &[]).unwrap();
        assert_eq!(rendered.body, "[]");
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let config = TabularTransform {
            fields: mapping(&[("region", "location"), ("price", "price"), ("spot_price", "spot")]),
            include_header: true,
            delimiter: ',',
            quote: '"',
            null_string: String::from("n/a"),
        };

        let rendered = render_csv(&config, &sample()).unwrap();
        let lines: Vec<&str> = rendered.body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "location,price,spot");
        assert_eq!(lines[1], "EU-RO-1,0.79,0.39");
        assert_eq!(lines[2], "US-KS-2,0.69,n/a");
    }

    #[test]
    fn csv_respects_custom_delimiter() {
        let config = TabularTransform {
            fields: mapping(&[("region", "region"), ("price", "price")]),
            include_header: false,
            delimiter: ';',
            quote: '"',
            null_string: String::new(),
        };

        let rendered = render_csv(&config, &sample()[..1]).unwrap();
        assert_eq!(rendered.body.trim_end(), "EU-RO-1;0.79");
    }

    #[test]
    fn metrics_compute_over_numeric_fields() {
        let config = AggregateTransform {
            metrics: vec![
                metric("total", MetricKind::Count, None),
                metric("avg_price", MetricKind::Avg, Some("price")),
                metric("min_price", MetricKind::Min, Some("price")),
                metric("max_price", MetricKind::Max, Some("price")),
                metric("regions", MetricKind::Unique, Some("region")),
            ],
            include_timestamp: true,
            include_collection_info: true,
        };

        let rendered = render_metrics(&config, &sample()).unwrap();
        let doc: Value = serde_json::from_str(&rendered.body).unwrap();

        assert_eq!(doc["collection_info"]["total_instances"], 3);
        assert!(doc["timestamp"].as_str().is_some());
        let metrics = &doc["metrics"];
        assert_eq!(metrics["total"], 3);
        let avg = metrics["avg_price"].as_f64().unwrap();
        assert!((avg - 1.123_333).abs() < 1e-5);
        assert_eq!(metrics["min_price"], 0.69);
        assert_eq!(metrics["max_price"], 1.89);
        assert_eq!(metrics["regions"], 2);
    }

    #[test]
    fn metrics_tolerate_empty_input() {
        let config = AggregateTransform {
            metrics: vec![
                metric("total", MetricKind::Count, None),
                metric("avg_price", MetricKind::Avg, Some("price")),
                metric("sum_price", MetricKind::Sum, Some("price")),
                metric("regions", MetricKind::Unique, Some("region")),
            ],
            include_timestamp: false,
            include_collection_info: true,
        };

        let rendered = render_metrics(&config, &[]).unwrap();
        let doc: Value = serde_json::from_str(&rendered.body).unwrap();

        assert_eq!(doc["collection_info"]["total_instances"], 0);
        assert_eq!(doc["metrics"]["total"], 0);
        assert_eq!(doc["metrics"]["avg_price"], Value::Null);
        assert_eq!(doc["metrics"]["sum_price"], Value::Null);
        assert_eq!(doc["metrics"]["regions"], 0);
    }

    #[test]
    fn group_by_places_null_values_under_null_key() {
        let spec = MetricSpec {
            name: String::from("count_by_spot"),
            kind: MetricKind::Count,
            field: None,
            group_by: Some(String::from("spot_price")),
            include_values: false,
        };

        let value = compute_metric(&spec, &sample()).unwrap();
        assert_eq!(value["null"], 1);
        assert_eq!(value["0.39"], 1);
        assert_eq!(value["1.19"], 1);
    }

    #[test]
    fn group_by_region_counts_members() {
        let spec = MetricSpec {
            name: String::from("count_by_region"),
            kind: MetricKind::Count,
            field: None,
            group_by: Some(String::from("region")),
            include_values: false,
        };

        let value = compute_metric(&spec, &sample()).unwrap();
        assert_eq!(value["EU-RO-1"], 2);
        assert_eq!(value["US-KS-2"], 1);
    }

    #[test]
    fn unique_can_include_the_value_list() {
        let spec = MetricSpec {
            name: String::from("gpus"),
            kind: MetricKind::Unique,
            field: Some(String::from("accelerator_name")),
            group_by: None,
            include_values: true,
        };

        let value = compute_metric(&spec, &sample()).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["values"], json!(["A100", "RTX 4090"]));
    }

    #[test]
    fn non_count_metric_without_field_is_structural_error() {
        let spec = metric("avg_price", MetricKind::Avg, None);
        let err = compute_metric(&spec, &sample()).unwrap_err();
        assert!(matches!(err, TransformError::MissingMetricField { .. }));
    }

    #[test]
    fn transformer_tag_selects_format() {
        let yaml = "format: csv\nfields:\n  region: region\n";
        let config: TransformerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.format_label(), "csv");
    }
}
