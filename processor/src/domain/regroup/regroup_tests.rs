use std::sync::Arc;

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{Metric, ScopeMetrics};
use opentelemetry_proto::tonic::trace::v1::{ScopeSpans, Span};

use super::*;
use crate::data::MemorySink;
use crate::utils::otlp::string_kv;

fn resource(key: &str, value: &str) -> Option<Resource> {
    Some(Resource {
        attributes: vec![string_kv(key, value)],
        ..Default::default()
    })
}

fn resource_spans(key: &str, value: &str, span: &str) -> ResourceSpans {
    ResourceSpans {
        resource: resource(key, value),
        scope_spans: vec![ScopeSpans {
            spans: vec![Span {
                name: span.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn resource_metrics(key: &str, value: &str, metric: &str) -> ResourceMetrics {
    ResourceMetrics {
        resource: resource(key, value),
        scope_metrics: vec![ScopeMetrics {
            metrics: vec![Metric {
                name: metric.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn resource_logs(key: &str, value: &str, body: &str) -> ResourceLogs {
    ResourceLogs {
        resource: resource(key, value),
        scope_logs: vec![ScopeLogs {
            log_records: vec![LogRecord {
                body: Some(AnyValue {
                    value: Some(any_value::Value::StringValue(body.to_string())),
                }),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// attr_key = 1,2,3,4,1,2,3,4 followed by one resource keyed on diff_attr_key
fn scenario<G>(make: impl Fn(&str, &str, &str) -> G) -> Vec<G> {
    let mut groups: Vec<G> = ["1", "2", "3", "4", "1", "2", "3", "4"]
        .iter()
        .enumerate()
        .map(|(i, value)| make("attr_key", value, &format!("item-{i}")))
        .collect();
    groups.push(make("diff_attr_key", "1", "item-8"));
    groups
}

/// Expected delivery: pairs (0,4) (1,5) (2,6) (3,7) in first-seen order, then the keyless resource
fn expected_parts<G: Clone>(groups: &[G]) -> Vec<Vec<G>> {
    let pair = |a: usize, b: usize| vec![groups[a].clone(), groups[b].clone()];
    vec![
        pair(0, 4),
        pair(1, 5),
        pair(2, 6),
        pair(3, 7),
        vec![groups[8].clone()],
    ]
}

#[test]
fn test_split_traces_into_different_batches() {
    let groups = scenario(resource_spans);
    let sink = Arc::new(MemorySink::<ExportTraceServiceRequest>::new());
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));

    bpr.consume(ExportTraceServiceRequest::from_groups(groups.clone()))
        .unwrap();

    let delivered: Vec<_> = sink.take().into_iter().map(|b| b.resource_spans).collect();
    assert_eq!(delivered, expected_parts(&groups));
}

#[test]
fn test_split_metrics_into_different_batches() {
    let groups = scenario(resource_metrics);
    let sink = Arc::new(MemorySink::<ExportMetricsServiceRequest>::new());
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));

    bpr.consume(ExportMetricsServiceRequest::from_groups(groups.clone()))
        .unwrap();

    let delivered: Vec<_> = sink
        .take()
        .into_iter()
        .map(|b| b.resource_metrics)
        .collect();
    assert_eq!(delivered, expected_parts(&groups));
}

#[test]
fn test_split_logs_into_different_batches() {
    let groups = scenario(resource_logs);
    let sink = Arc::new(MemorySink::<ExportLogsServiceRequest>::new());
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));

    bpr.consume(ExportLogsServiceRequest::from_groups(groups.clone()))
        .unwrap();

    let delivered: Vec<_> = sink.take().into_iter().map(|b| b.resource_logs).collect();
    assert_eq!(delivered, expected_parts(&groups));
}

#[test]
fn test_split_concatenation_reproduces_input() {
    let groups = scenario(resource_spans);
    let parts = split(ExportTraceServiceRequest::from_groups(groups.clone()), "attr_key");
    assert_eq!(parts.len(), 5);

    let total: usize = parts.iter().map(|p| p.resource_spans.len()).sum();
    assert_eq!(total, groups.len());
    for part in &parts {
        // Relative order inside a part follows the input order
        let positions: Vec<usize> = part
            .resource_spans
            .iter()
            .map(|rs| groups.iter().position(|g| g == rs).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_split_is_idempotent() {
    let groups = scenario(resource_metrics);
    for part in split(ExportMetricsServiceRequest::from_groups(groups), "attr_key") {
        let again = split(part.clone(), "attr_key");
        assert_eq!(again, vec![part]);
    }
}

#[test]
fn test_single_resource_forwarded_unchanged() {
    let batch = ExportTraceServiceRequest::from_groups(vec![resource_spans("attr_key", "1", "a")]);
    let sink = Arc::new(MemorySink::new());
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));

    bpr.consume(batch.clone()).unwrap();
    assert_eq!(sink.take(), vec![batch]);
}

#[test]
fn test_same_attribute_value_forwarded_as_one_batch() {
    let batch = ExportLogsServiceRequest::from_groups(vec![
        resource_logs("same_attr_val", "1", "a"),
        resource_logs("same_attr_val", "1", "b"),
        resource_logs("same_attr_val", "1", "c"),
        resource_logs("same_attr_val", "1", "d"),
    ]);
    let sink = Arc::new(MemorySink::new());
    let bpr = BatchPerResourceAttr::new("same_attr_val", Arc::clone(&sink));

    bpr.consume(batch.clone()).unwrap();
    assert_eq!(sink.calls(), 1);
    assert_eq!(sink.take(), vec![batch]);
}

#[test]
fn test_empty_batch_forwarded() {
    let sink = Arc::new(MemorySink::new());
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));
    bpr.consume(ExportMetricsServiceRequest::default()).unwrap();
    assert_eq!(sink.take(), vec![ExportMetricsServiceRequest::default()]);
}

#[test]
fn test_first_delivery_error_stops_delivery() {
    let sink = Arc::new(MemorySink::<ExportTraceServiceRequest>::failing(
        ConsumerError::Rejected("test_error".to_string()),
    ));
    let bpr = BatchPerResourceAttr::new("attr_key", Arc::clone(&sink));

    let err = bpr
        .consume(ExportTraceServiceRequest::from_groups(scenario(resource_spans)))
        .unwrap_err();
    assert_eq!(err, ConsumerError::Rejected("test_error".to_string()));
    assert_eq!(sink.calls(), 1);
}

#[test]
fn test_single_group_error_is_returned() {
    let sink = MemorySink::failing(ConsumerError::BufferFull);
    let bpr = BatchPerResourceAttr::new("attr_key", sink);
    let batch = ExportMetricsServiceRequest::from_groups(vec![
        resource_metrics("attr_key", "1", "a"),
        resource_metrics("attr_key", "1", "b"),
    ]);
    assert_eq!(bpr.consume(batch), Err(ConsumerError::BufferFull));
}

#[test]
fn test_non_string_attribute_values_group_by_string_form() {
    let int_resource = |value: i64| ResourceSpans {
        resource: Some(Resource {
            attributes: vec![KeyValue {
                key: "shard".to_string(),
                value: Some(AnyValue {
                    value: Some(any_value::Value::IntValue(value)),
                }),
            }],
            ..Default::default()
        }),
        ..Default::default()
    };
    let batch = ExportTraceServiceRequest::from_groups(vec![
        int_resource(7),
        resource_spans("shard", "7", "string-seven"),
        int_resource(8),
    ]);
    let parts = split(batch, "shard");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].resource_spans.len(), 2);
}
