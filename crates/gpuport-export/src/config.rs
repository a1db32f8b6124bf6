//! Pipeline-set configuration model.
//!
//! The full shape of an export configuration file:
//!
//! ```yaml
//! version: "1.0"
//! pipelines:
//!   - name: cheap-gpus
//!     filters:
//!       - field: price
//!         operator: lte
//!         value: 1.0
//!     transformer:
//!       format: json
//!     outputs:
//!       - type: local
//!         directory: /var/lib/gpuport
//! ```

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::filter::FilterConfig;
use crate::sink::OutputConfig;
use crate::transform::TransformerConfig;

/// Top-level export configuration: an ordered set of pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

fn default_version() -> String {
    String::from("1.0")
}

/// One filter → transform → output pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Unique within the configuration, enforced at load time.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Applied in declaration order; an empty list passes every record.
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    pub transformer: TransformerConfig,
    /// At least one, enforced at load time.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

const fn default_enabled() -> bool {
    true
}

/// How null field values are rendered by record transformers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullHandling {
    /// Emit JSON null.
    #[default]
    Null,
    /// Drop the key entirely.
    Omit,
    /// Emit an empty string.
    Empty,
}

/// Ordered source-field → output-name mapping.
///
/// Deserialized from a plain mapping while preserving declaration order,
/// which fixes projection key order and tabular column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping(pub Vec<(String, String)>);

impl FieldMapping {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    /// Source field names, in declaration order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(source, _)| source.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = FieldMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of source field name to output name")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((source, target)) = access.next_entry::<String, String>()? {
                    entries.push((source, target));
                }
                Ok(FieldMapping(entries))
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

impl Serialize for FieldMapping {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (source, target) in &self.0 {
            map.serialize_entry(source, target)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_mapping_preserves_declaration_order() {
        let yaml = "region: location\nprice: usd_per_hour\naccelerator_name: gpu\n";
        let mapping: FieldMapping = serde_yaml::from_str(yaml).unwrap();

        let sources: Vec<&str> = mapping.sources().collect();
        assert_eq!(sources, ["region", "price", "accelerator_name"]);
        assert_eq!(mapping.0[1].1, "usd_per_hour");
    }

    #[test]
    fn pipeline_defaults_apply() {
        let yaml = r#"
name: everything
transformer:
  format: json
outputs:
  - type: local
    directory: /tmp/out
"#;
        let pipeline: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(pipeline.enabled);
        assert!(pipeline.filters.is_empty());
        assert_eq!(pipeline.outputs.len(), 1);
    }

    #[test]
    fn null_handling_parses_all_modes() {
        for (raw, expected) in [
            // Quoted so YAML sees a string, not a null scalar.
            ("\"null\"", NullHandling::Null),
            ("omit", NullHandling::Omit),
            ("empty", NullHandling::Empty),
        ] {
            let parsed: NullHandling = serde_yaml::from_str(raw).unwrap();
            assert_eq!(parsed, expected);
        }
    }
}
