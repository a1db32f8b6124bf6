//! Behavior-driven tests for the export pipeline engine.
//!
//! These tests verify HOW records flow from filtering through
//! transformation to delivery: filter algebra, aggregate correctness,
//! webhook batching, and pipeline terminal states.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use gpuport_core::GpuInstance;
use gpuport_export::{
    apply_filters, compile_filters, parse_export_config, run_pipeline, run_pipelines, ConfigError,
    FilterConfig, FilterOperator, InMemoryObjectStore, PipelineState, SinkContext,
};
use gpuport_tests::{offer, ScriptedHttpClient};

fn five_offers() -> Vec<GpuInstance> {
    vec![
        offer("RTX 4090", "EU-RO-1", 0.79),
        offer("RTX 4090", "US-KS-2", 0.69),
        offer("A100", "EU-RO-1", 1.89),
        offer("H100", "US-KS-2", 2.99),
        offer("L40S", "EU-RO-1", 1.14),
    ]
}

fn price_filter(operator: FilterOperator, value: Value) -> FilterConfig {
    FilterConfig {
        field: String::from("price"),
        operator,
        value: Some(value),
        values: None,
        min: None,
        max: None,
    }
}

// =============================================================================
// Filter algebra
// =============================================================================

#[test]
fn filtering_yields_an_order_preserving_subset() {
    // Given: a record set and a single predicate
    let records = five_offers();
    let filters = compile_filters("t", &[price_filter(FilterOperator::Lt, json!(2.0))])
        .expect("filters compile");

    // When: the filter runs
    let kept = apply_filters(&filters, &records);

    // Then: every survivor is from the input, in input order
    assert!(kept.len() <= records.len());
    let mut cursor = 0;
    for survivor in &kept {
        let position = records[cursor..]
            .iter()
            .position(|r| r == survivor)
            .expect("survivor must come from the input");
        cursor += position + 1;
    }
}

#[test]
fn sequential_filtering_equals_combined_filtering() {
    // Given: two predicates
    let records = five_offers();
    let p1 = price_filter(FilterOperator::Gt, json!(0.7));
    let p2 = price_filter(FilterOperator::Lt, json!(2.0));

    // When: applied together and applied one after the other
    let combined = apply_filters(
        &compile_filters("t", &[p1.clone(), p2.clone()]).expect("filters compile"),
        &records,
    );
    let first = apply_filters(&compile_filters("t", &[p1]).expect("compiles"), &records);
    let sequential = apply_filters(&compile_filters("t", &[p2]).expect("compiles"), &first);

    // Then: the results are identical
    assert_eq!(combined, sequential);
}

// =============================================================================
// Scenario: aggregate pipeline over a mixed record set
// =============================================================================

#[tokio::test]
async fn aggregate_pipeline_counts_and_averages_the_whole_set() {
    // Given: 5 offers across 2 regions and a metrics pipeline
    let dir = tempfile::tempdir().expect("tempdir");
    let yaml = format!(
        r#"
pipelines:
  - name: fleet-metrics
    transformer:
      format: metrics
      metrics:
        - name: total
          kind: count
        - name: by_region
          kind: count
          group_by: region
        - name: avg_price
          kind: avg
          field: price
    outputs:
      - type: local
        directory: {}
        filename_pattern: "{{pipeline}}.{{format}}"
"#,
        dir.path().display()
    );
    let config = parse_export_config(&yaml).expect("config is valid");

    // When: the pipeline runs over the records
    let results = run_pipelines(five_offers(), &config, &SinkContext::default()).await;

    // Then: count is 5, group counts sum to 5, avg is the arithmetic mean
    assert_eq!(results[0].state, PipelineState::Succeeded);
    let body =
        std::fs::read_to_string(dir.path().join("fleet-metrics.json")).expect("file written");
    let doc: Value = serde_json::from_str(&body).expect("valid json");

    assert_eq!(doc["metrics"]["total"], 5);
    let by_region = doc["metrics"]["by_region"]
        .as_object()
        .expect("grouped counts");
    let group_sum: u64 = by_region.values().filter_map(Value::as_u64).sum();
    assert_eq!(group_sum, 5);

    let expected_avg = (0.79 + 0.69 + 1.89 + 2.99 + 1.14) / 5.0;
    let avg = doc["metrics"]["avg_price"].as_f64().expect("avg present");
    assert!((avg - expected_avg).abs() < 1e-9);
}

// =============================================================================
// Scenario: webhook batching
// =============================================================================

#[tokio::test]
async fn webhook_with_batch_size_two_sends_three_spaced_requests_for_five_records() {
    // Given: a webhook pipeline with batch_size 2 and a 30ms batch delay
    const DELAY_MS: u64 = 30;
    let yaml = format!(
        r#"
pipelines:
  - name: hook
    transformer:
      format: json
    outputs:
      - type: https
        url: https://example.test/ingest
        batch_size: 2
        batch_delay_ms: {DELAY_MS}
"#
    );
    let config = parse_export_config(&yaml).expect("config is valid");

    let mut accepting = ScriptedHttpClient::new(Vec::new());
    accepting.fallback_status = 200;
    let client = Arc::new(accepting);
    let ctx = SinkContext::new(
        Arc::clone(&client) as Arc<dyn gpuport_core::HttpClient>,
        Arc::new(InMemoryObjectStore::default()),
    );

    // When: the pipeline delivers 5 records
    let result = run_pipeline(&config.pipelines[0], &five_offers(), &ctx).await;

    // Then: exactly 3 requests of sizes 2, 2, 1, separated by the delay
    assert_eq!(result.state, PipelineState::Succeeded);
    let requests = client.recorded_requests();
    assert_eq!(requests.len(), 3);

    let sizes: Vec<usize> = requests
        .iter()
        .map(|(_, r)| {
            let body: Vec<Value> =
                serde_json::from_str(r.body.as_deref().unwrap_or("[]")).expect("array body");
            body.len()
        })
        .collect();
    assert_eq!(sizes, [2, 2, 1]);

    let min_gap = Duration::from_millis(DELAY_MS - 5);
    assert!(requests[1].0 - requests[0].0 >= min_gap, "delay before batch 2");
    assert!(requests[2].0 - requests[1].0 >= min_gap, "delay before batch 3");
}

// =============================================================================
// Tabular round-trip
// =============================================================================

#[tokio::test]
async fn csv_projection_round_trips_field_values() {
    // Given: a csv pipeline projecting two fields
    let dir = tempfile::tempdir().expect("tempdir");
    let yaml = format!(
        r#"
pipelines:
  - name: table
    transformer:
      format: csv
      fields:
        accelerator_name: gpu
        price: usd
    outputs:
      - type: local
        directory: {}
        filename_pattern: "{{pipeline}}.{{format}}"
"#,
        dir.path().display()
    );
    let config = parse_export_config(&yaml).expect("config is valid");
    let records = five_offers();

    // When: the pipeline writes the table
    let results = run_pipelines(records.clone(), &config, &SinkContext::default()).await;
    assert_eq!(results[0].state, PipelineState::Succeeded);

    // Then: re-parsing the CSV recovers the original values in order
    let body = std::fs::read_to_string(dir.path().join("table.csv")).expect("file written");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "gpu,usd");
    assert_eq!(lines.len(), records.len() + 1);

    for (line, record) in lines[1..].iter().zip(&records) {
        let cells: Vec<&str> = line.split(',').collect();
        assert_eq!(cells[0], record.accelerator_name);
        let price: f64 = cells[1].parse().expect("numeric cell");
        assert_eq!(price, record.price);
    }
}

// =============================================================================
// Pipeline terminal states and isolation
// =============================================================================

#[tokio::test]
async fn failing_sink_degrades_pipeline_without_touching_siblings() {
    // Given: two pipelines, the first writing somewhere impossible
    let dir = tempfile::tempdir().expect("tempdir");
    let yaml = format!(
        r#"
pipelines:
  - name: doomed
    transformer:
      format: json
    outputs:
      - type: local
        directory: /proc/gpuport-nowhere
        create_dirs: false
  - name: healthy
    transformer:
      format: json
    outputs:
      - type: local
        directory: {}
        filename_pattern: "{{pipeline}}.{{format}}"
"#,
        dir.path().display()
    );
    let config = parse_export_config(&yaml).expect("config is valid");

    // When: both pipelines run over the same record set
    let results = run_pipelines(five_offers(), &config, &SinkContext::default()).await;

    // Then: the doomed pipeline fails alone
    assert_eq!(results[0].name, "doomed");
    assert_eq!(results[0].state, PipelineState::Failed);
    assert_eq!(results[1].state, PipelineState::Succeeded);
    assert!(dir.path().join("healthy.json").exists());
}

#[tokio::test]
async fn disabled_pipeline_reports_skipped() {
    let yaml = r#"
pipelines:
  - name: dormant
    enabled: false
    transformer:
      format: json
    outputs:
      - type: local
        directory: /tmp/never-used
"#;
    let config = parse_export_config(yaml).expect("config is valid");

    let results = run_pipelines(five_offers(), &config, &SinkContext::default()).await;

    assert_eq!(results[0].state, PipelineState::Skipped);
    assert!(results[0].sink_outcomes.is_empty());
}

// =============================================================================
// Load-time validation
// =============================================================================

#[test]
fn loader_rejects_defective_configurations_before_any_run() {
    // Duplicate names
    let duplicate = r#"
pipelines:
  - name: same
    transformer: { format: json }
    outputs: [{ type: local, directory: /tmp/a }]
  - name: same
    transformer: { format: json }
    outputs: [{ type: local, directory: /tmp/b }]
"#;
    assert!(matches!(
        parse_export_config(duplicate).unwrap_err(),
        ConfigError::DuplicatePipeline { .. }
    ));

    // Unknown filter field
    let unknown_field = r#"
pipelines:
  - name: bad
    filters:
      - field: cost
        operator: lt
        value: 1
    transformer: { format: json }
    outputs: [{ type: local, directory: /tmp/a }]
"#;
    assert!(matches!(
        parse_export_config(unknown_field).unwrap_err(),
        ConfigError::InvalidField { .. }
    ));

    // Missing outputs
    let sinkless = r#"
pipelines:
  - name: bad
    transformer: { format: json }
"#;
    assert!(matches!(
        parse_export_config(sinkless).unwrap_err(),
        ConfigError::MissingRequired { .. }
    ));

    // Malformed filename pattern
    let bad_pattern = r#"
pipelines:
  - name: bad
    transformer: { format: json }
    outputs:
      - type: local
        directory: /tmp/a
        filename_pattern: "{bogus}.json"
"#;
    assert!(matches!(
        parse_export_config(bad_pattern).unwrap_err(),
        ConfigError::InvalidPattern { .. }
    ));
}
