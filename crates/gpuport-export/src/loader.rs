//! YAML configuration loading: env substitution and load-time validation.
//!
//! Every configuration mistake is fatal here, before any pipeline runs.
//! `${VAR}` references are substituted from the environment across the
//! whole document, except inside webhook header maps, which interpolate at
//! send time so secret values never live in the parsed configuration.

use std::path::Path;

use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;

use gpuport_core::FIELD_NAMES;

use crate::config::ExportConfig;
use crate::filter::compile_filters;
use crate::sink::OutputConfig;
use crate::template::validate_pattern;
use crate::transform::{MetricKind, TransformerConfig};

/// Fatal configuration error. Nothing runs until the file is fixed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate pipeline name '{name}'")]
    DuplicatePipeline { name: String },
    #[error("pipeline '{pipeline}': unknown field '{field}'")]
    InvalidField { pipeline: String, field: String },
    #[error("pipeline '{pipeline}': {detail}")]
    MissingRequired { pipeline: String, detail: String },
    #[error("pipeline '{pipeline}': invalid pattern '{pattern}': {detail}")]
    InvalidPattern {
        pipeline: String,
        pattern: String,
        detail: String,
    },
    #[error("environment variable '{name}' is not set")]
    MissingEnvVar { name: String },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Load, substitute, deserialize, and validate an export configuration.
pub fn load_export_config(path: impl AsRef<Path>) -> Result<ExportConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    parse_export_config(&raw)
}

/// Same as [`load_export_config`] over an in-memory document.
pub fn parse_export_config(raw: &str) -> Result<ExportConfig, ConfigError> {
    let mut document: Value = serde_yaml::from_str(raw)?;
    substitute_env(&mut document, false)?;
    let config: ExportConfig = serde_yaml::from_value(document)?;
    validate(&config)?;
    Ok(config)
}

/// Structural validation of a parsed configuration.
pub fn validate(config: &ExportConfig) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();

    for pipeline in &config.pipelines {
        if !seen.insert(pipeline.name.as_str()) {
            return Err(ConfigError::DuplicatePipeline {
                name: pipeline.name.clone(),
            });
        }

        if pipeline.outputs.is_empty() {
            return Err(ConfigError::MissingRequired {
                pipeline: pipeline.name.clone(),
                detail: String::from("at least one output is required"),
            });
        }

        // Compiling the filters performs all operand and field checks.
        compile_filters(&pipeline.name, &pipeline.filters)?;

        validate_transformer(&pipeline.name, &pipeline.transformer)?;

        for output in &pipeline.outputs {
            validate_output(&pipeline.name, output)?;
        }
    }
    Ok(())
}

fn validate_transformer(pipeline: &str, config: &TransformerConfig) -> Result<(), ConfigError> {
    let check_field = |field: &str| -> Result<(), ConfigError> {
        if FIELD_NAMES.contains(&field) {
            Ok(())
        } else {
            Err(ConfigError::InvalidField {
                pipeline: pipeline.to_owned(),
                field: field.to_owned(),
            })
        }
    };

    match config {
        TransformerConfig::Json(record) => {
            if let Some(mapping) = &record.fields {
                for source in mapping.sources() {
                    check_field(source)?;
                }
            }
        }
        TransformerConfig::Csv(tabular) => {
            if tabular.fields.is_empty() {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("csv transformer requires a field mapping"),
                });
            }
            for source in tabular.fields.sources() {
                check_field(source)?;
            }
        }
        TransformerConfig::Metrics(aggregate) => {
            if aggregate.metrics.is_empty() {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("metrics transformer requires at least one metric"),
                });
            }
            for metric in &aggregate.metrics {
                if metric.kind != MetricKind::Count && metric.field.is_none() {
                    return Err(ConfigError::MissingRequired {
                        pipeline: pipeline.to_owned(),
                        detail: format!(
                            "metric '{}' of kind '{}' requires a field",
                            metric.name,
                            metric.kind.as_str()
                        ),
                    });
                }
                if let Some(field) = &metric.field {
                    check_field(field)?;
                }
                if let Some(group_by) = &metric.group_by {
                    check_field(group_by)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_output(pipeline: &str, output: &OutputConfig) -> Result<(), ConfigError> {
    match output {
        OutputConfig::Local(local) => {
            if local.directory.as_os_str().is_empty() {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("local output requires a directory"),
                });
            }
            validate_pattern(pipeline, &local.filename_pattern)
        }
        OutputConfig::ObjectStore(store) => {
            if store.bucket.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("object store output requires a bucket"),
                });
            }
            validate_pattern(pipeline, &store.filename_pattern)
        }
        OutputConfig::Webhook(webhook) => {
            if webhook.url.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("webhook output requires a url"),
                });
            }
            if webhook.batch_size == Some(0) {
                return Err(ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: String::from("webhook batch_size must be at least 1"),
                });
            }
            Ok(())
        }
    }
}

/// Substitute `${VAR}` references in every string scalar. Webhook header
/// maps are left untouched; the webhook sink interpolates those per send.
fn substitute_env(value: &mut Value, in_webhook_headers: bool) -> Result<(), ConfigError> {
    if in_webhook_headers {
        return Ok(());
    }
    match value {
        Value::String(text) => {
            *text = substitute_env_str(text)?;
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_env(item, false)?;
            }
        }
        Value::Mapping(mapping) => {
            let is_webhook = mapping
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t == "https");
            for (key, item) in mapping.iter_mut() {
                let skip = is_webhook && key.as_str() == Some("headers");
                substitute_env(item, skip)?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn substitute_env_str(text: &str) -> Result<String, ConfigError> {
    // Unwrap is safe: the pattern is a constant.
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let whole = captures.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let name = &captures[1];
        let value = std::env::var(name).map_err(|_| ConfigError::MissingEnvVar {
            name: name.to_owned(),
        })?;
        out.push_str(&text[last..whole.0]);
        out.push_str(&value);
        last = whole.1;
    }
    out.push_str(&text[last..]);
    Ok(out)
}
