use std::sync::Arc;

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Histogram, HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
    Sum, metric::Data, number_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;

use super::*;
use crate::data::MemorySink;
use crate::domain::metrics::matcher::{MetricFilter, StringMatcher};
use crate::domain::metrics::operations::LabelOperation;
use crate::domain::metrics::rule::AggregationType;
use crate::utils::otlp::{get_attribute_string, string_kv};

// ============================================================================
// HELPERS
// ============================================================================

fn point(attrs: &[(&str, &str)], value: i64) -> NumberDataPoint {
    NumberDataPoint {
        attributes: attrs.iter().map(|(k, v)| string_kv(k, v)).collect(),
        time_unix_nano: 1_000,
        value: Some(number_data_point::Value::AsInt(value)),
        ..Default::default()
    }
}

fn sum(name: &str, points: Vec<NumberDataPoint>) -> Metric {
    Metric {
        name: name.to_string(),
        unit: "1".to_string(),
        data: Some(Data::Sum(Sum {
            data_points: points,
            aggregation_temporality: 2,
            is_monotonic: true,
        })),
        ..Default::default()
    }
}

fn gauge(name: &str, points: Vec<NumberDataPoint>) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(Data::Gauge(Gauge {
            data_points: points,
        })),
        ..Default::default()
    }
}

fn histogram(name: &str) -> Metric {
    Metric {
        name: name.to_string(),
        unit: "1".to_string(),
        data: Some(Data::Histogram(Histogram {
            data_points: vec![HistogramDataPoint {
                attributes: vec![string_kv("host", "a")],
                count: 1,
                ..Default::default()
            }],
            aggregation_temporality: 2,
        })),
        ..Default::default()
    }
}

fn request(metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(Resource {
                attributes: vec![string_kv("service.name", "api")],
                ..Default::default()
            }),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(InstrumentationScope {
                    name: "meter".to_string(),
                    ..Default::default()
                }),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn metrics_of(request: &ExportMetricsServiceRequest, resource: usize) -> &[Metric] {
    &request.resource_metrics[resource].scope_metrics[0].metrics
}

fn names(metrics: &[Metric]) -> Vec<&str> {
    metrics.iter().map(|m| m.name.as_str()).collect()
}

fn int_values(metric: &Metric) -> Vec<i64> {
    let points = match &metric.data {
        Some(Data::Sum(s)) => &s.data_points,
        Some(Data::Gauge(g)) => &g.data_points,
        _ => return Vec::new(),
    };
    points
        .iter()
        .map(|dp| match dp.value {
            Some(number_data_point::Value::AsInt(i)) => i,
            _ => panic!("expected int value"),
        })
        .collect()
}

fn host_filter(name: &str, host: &str) -> MetricFilter {
    MetricFilter::strict(name).with_attribute("host", StringMatcher::Strict(host.to_string()))
}

// ============================================================================
// TRANSFORM METRIC
// ============================================================================

#[test]
fn test_transform_metric_literal_rename() {
    let rule = TransformRule::new(TransformAction::Insert, MetricFilter::strict("a"))
        .with_new_name("b");
    let mut metric = sum("a", vec![point(&[], 1)]);
    assert!(transform_metric(&mut metric, &rule));
    assert_eq!(metric.name, "b");
}

#[test]
fn test_transform_metric_template_rename() {
    let filter = MetricFilter::regexp(r"^system\.(\w+)\.usage$").unwrap();
    let rule = TransformRule::new(TransformAction::Update, filter).with_new_name("host.$1.used");
    let mut metric = sum("system.cpu.usage", vec![point(&[], 1)]);
    assert!(transform_metric(&mut metric, &rule));
    assert_eq!(metric.name, "host.cpu.used");
}

#[test]
fn test_transform_metric_gates_structural_edits_on_partial_update() {
    let rule = TransformRule::new(TransformAction::Update, host_filter("m", "a"))
        .with_new_name("renamed")
        .with_operation(LabelOperation::AddLabel {
            new_label: "env".to_string(),
            new_value: "prod".to_string(),
        })
        .with_operation(LabelOperation::ScaleValue { factor: 10.0 });
    let mut metric = sum("m", vec![point(&[("host", "a")], 1), point(&[("host", "b")], 2)]);

    assert!(transform_metric(&mut metric, &rule));
    // Partial match: no rename, no label added, but matching points are scaled
    assert_eq!(metric.name, "m");
    assert_eq!(int_values(&metric), vec![10, 2]);
    let Some(Data::Sum(s)) = &metric.data else {
        panic!("expected sum");
    };
    assert!(get_attribute_string(&s.data_points[0].attributes, "env").is_none());
}

#[test]
fn test_transform_metric_reports_emptied_metric() {
    let rule = TransformRule::new(TransformAction::Update, MetricFilter::strict("m"))
        .with_operation(LabelOperation::DeleteLabelValue {
            label: "host".to_string(),
            label_value: "a".to_string(),
        });

    let mut emptied = sum("m", vec![point(&[("host", "a")], 1)]);
    assert!(!transform_metric(&mut emptied, &rule));

    let mut already_empty = sum("m", Vec::new());
    assert!(transform_metric(&mut already_empty, &rule));
}

// ============================================================================
// UPDATE
// ============================================================================

#[test]
fn test_update_drops_metric_emptied_by_operations() {
    let rule = TransformRule::new(TransformAction::Update, MetricFilter::strict("m"))
        .with_operation(LabelOperation::DeleteLabelValue {
            label: "host".to_string(),
            label_value: "a".to_string(),
        });
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![
        sum("m", vec![point(&[("host", "a")], 1)]),
        sum("m", Vec::new()),
        sum("other", vec![point(&[("host", "a")], 1)]),
    ]);
    processor.process(&mut batch);

    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["m", "other"]);
    assert!(points::count_points(&metrics[0]) == 0);
}

#[test]
fn test_update_prunes_empty_scope_and_resource() {
    let rule = TransformRule::new(TransformAction::Update, MetricFilter::strict("m"))
        .with_operation(LabelOperation::DeleteLabelValue {
            label: "host".to_string(),
            label_value: "a".to_string(),
        });
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum("m", vec![point(&[("host", "a")], 1)])]);
    processor.process(&mut batch);
    assert!(batch.resource_metrics.is_empty());
}

#[test]
fn test_rules_apply_in_order() {
    let first = TransformRule::new(TransformAction::Update, MetricFilter::strict("a"))
        .with_new_name("b");
    let second = TransformRule::new(TransformAction::Update, MetricFilter::strict("b"))
        .with_new_name("c");
    let processor = MetricsTransformProcessor::new(vec![first, second]);

    let mut batch = request(vec![sum("a", vec![point(&[], 1)])]);
    processor.process(&mut batch);
    assert_eq!(names(metrics_of(&batch, 0)), vec!["c"]);
}

// ============================================================================
// INSERT
// ============================================================================

#[test]
fn test_insert_duplicates_full_match() {
    let rule = TransformRule::new(TransformAction::Insert, MetricFilter::strict("a"))
        .with_new_name("a.copy");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum("a", vec![point(&[("host", "x")], 1)]), gauge("b", vec![])]);
    processor.process(&mut batch);

    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["a", "b", "a.copy"]);
    assert_eq!(metrics[0].data, metrics[2].data);
}

#[test]
fn test_insert_copies_only_matching_points() {
    let rule = TransformRule::new(TransformAction::Insert, host_filter("a", "x"))
        .with_new_name("a.x");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum(
        "a",
        vec![point(&[("host", "x")], 1), point(&[("host", "y")], 2)],
    )]);
    processor.process(&mut batch);

    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["a", "a.x"]);
    assert_eq!(int_values(&metrics[0]), vec![1, 2]);
    assert_eq!(int_values(&metrics[1]), vec![1]);
}

// ============================================================================
// COMBINE
// ============================================================================

#[test]
fn test_combine_replaces_inputs() {
    let filter = MetricFilter::regexp("^(?:a|b)$").unwrap();
    let rule = TransformRule::new(TransformAction::Combine, filter)
        .with_new_name("combined")
        .with_aggregation(AggregationType::Sum);
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![
        sum("a", vec![point(&[("host", "x")], 1), point(&[("host", "y")], 2)]),
        gauge("keep", vec![point(&[], 9)]),
        sum("b", vec![point(&[("host", "x")], 10), point(&[("host", "z")], 5)]),
    ]);
    let report = processor.process(&mut batch);
    assert!(report.is_clean());

    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["keep", "combined"]);
    assert_eq!(int_values(&metrics[1]), vec![11, 2, 5]);
    let Some(Data::Sum(s)) = &metrics[1].data else {
        panic!("expected sum");
    };
    assert_eq!(s.aggregation_temporality, 2);
    assert!(s.is_monotonic);
    let hosts: Vec<_> = s
        .data_points
        .iter()
        .filter_map(|dp| get_attribute_string(&dp.attributes, "host"))
        .collect();
    assert_eq!(hosts, vec!["x", "y", "z"]);
}

#[test]
fn test_combine_incompatible_metrics_is_skipped() {
    let filter = MetricFilter::regexp("^(?:a|b)$").unwrap();
    let rule = TransformRule::new(TransformAction::Combine, filter).with_new_name("combined");
    let rename = TransformRule::new(TransformAction::Update, MetricFilter::strict("a"))
        .with_new_name("a.renamed");
    let processor = MetricsTransformProcessor::new(vec![rule, rename]);

    let original = vec![sum("a", vec![point(&[("host", "a")], 1)]), histogram("b")];
    let mut batch = request(original.clone());
    let report = processor.process(&mut batch);

    assert_eq!(report.skipped.len(), 1);
    assert!(matches!(
        report.skipped[0],
        CombineError::DifferentTypes { .. }
    ));
    // Both inputs untouched by the skipped rule; the next rule still ran
    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["a.renamed", "b"]);
    assert_eq!(metrics[0].data, original[0].data);
    assert_eq!(metrics[1], original[1]);
}

#[test]
fn test_combine_without_matches_is_noop() {
    let filter = MetricFilter::regexp("^nothing$").unwrap();
    let rule = TransformRule::new(TransformAction::Combine, filter).with_new_name("combined");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum("a", vec![point(&[], 1)])]);
    let before = batch.clone();
    assert!(processor.process(&mut batch).is_clean());
    assert_eq!(batch, before);
}

#[test]
fn test_combine_applies_operations_to_result() {
    let filter = MetricFilter::regexp(r"^disk\.(\w+)$").unwrap();
    let rule = TransformRule::new(TransformAction::Combine, filter)
        .with_new_name("disk.ops")
        .with_operation(LabelOperation::UpdateLabel {
            label: "$1".to_string(),
            new_label: Some("direction".to_string()),
            value_actions: Default::default(),
        });
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![
        sum("disk.read", vec![point(&[("dev", "sda")], 1)]),
        sum("disk.write", vec![point(&[("dev", "sda")], 2)]),
    ]);
    processor.process(&mut batch);

    let metrics = metrics_of(&batch, 0);
    assert_eq!(names(metrics), vec!["disk.ops"]);
    let Some(Data::Sum(s)) = &metrics[0].data else {
        panic!("expected sum");
    };
    let directions: Vec<_> = s
        .data_points
        .iter()
        .filter_map(|dp| get_attribute_string(&dp.attributes, "direction"))
        .collect();
    assert_eq!(directions, vec!["read", "write"]);
}

// ============================================================================
// GROUP
// ============================================================================

#[test]
fn test_group_moves_metrics_to_new_resource() {
    let rule = TransformRule::new(TransformAction::Group, MetricFilter::regexp("^db\\.").unwrap())
        .with_group_resource_label("component", "database");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![
        sum("db.queries", vec![point(&[], 1)]),
        sum("http.requests", vec![point(&[], 2)]),
        sum("db.errors", vec![point(&[], 3)]),
    ]);
    processor.process(&mut batch);

    assert_eq!(batch.resource_metrics.len(), 2);
    assert_eq!(names(metrics_of(&batch, 0)), vec!["http.requests"]);
    assert_eq!(names(metrics_of(&batch, 1)), vec!["db.queries", "db.errors"]);

    let grouped = &batch.resource_metrics[1];
    let attrs = &grouped.resource.as_ref().unwrap().attributes;
    assert_eq!(
        get_attribute_string(attrs, "service.name").as_deref(),
        Some("api")
    );
    assert_eq!(
        get_attribute_string(attrs, "component").as_deref(),
        Some("database")
    );
    assert_eq!(
        grouped.scope_metrics[0].scope.as_ref().unwrap().name,
        "meter"
    );
}

#[test]
fn test_group_splits_partial_metrics() {
    let rule = TransformRule::new(TransformAction::Group, host_filter("m", "a"))
        .with_group_resource_label("host.group", "a");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum(
        "m",
        vec![point(&[("host", "a")], 1), point(&[("host", "b")], 2)],
    )]);
    processor.process(&mut batch);

    assert_eq!(int_values(&metrics_of(&batch, 0)[0]), vec![2]);
    assert_eq!(int_values(&metrics_of(&batch, 1)[0]), vec![1]);
}

#[test]
fn test_group_prunes_emptied_source_and_skips_empty_groups() {
    let rule = TransformRule::new(TransformAction::Group, MetricFilter::strict("m"))
        .with_group_resource_label("k", "v");
    let processor = MetricsTransformProcessor::new(vec![rule]);

    let mut batch = request(vec![sum("m", vec![point(&[], 1)])]);
    processor.process(&mut batch);
    assert_eq!(batch.resource_metrics.len(), 1);
    let attrs = &batch.resource_metrics[0].resource.as_ref().unwrap().attributes;
    assert_eq!(get_attribute_string(attrs, "k").as_deref(), Some("v"));

    let mut untouched = request(vec![sum("other", vec![point(&[], 1)])]);
    processor.process(&mut untouched);
    assert_eq!(untouched.resource_metrics.len(), 1);
}

// ============================================================================
// CONSUMER
// ============================================================================

#[test]
fn test_transform_consumer_forwards_processed_batch() {
    let rule = TransformRule::new(TransformAction::Update, MetricFilter::strict("a"))
        .with_new_name("b");
    let sink = Arc::new(MemorySink::<ExportMetricsServiceRequest>::new());
    let consumer = TransformConsumer::new(
        MetricsTransformProcessor::new(vec![rule]),
        Arc::clone(&sink),
    );

    consumer
        .consume(request(vec![sum("a", vec![point(&[], 1)])]))
        .unwrap();

    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(names(metrics_of(&delivered[0], 0)), vec!["b"]);
}

#[test]
fn test_transform_consumer_propagates_error() {
    let sink = MemorySink::failing(ConsumerError::ChannelClosed);
    let consumer = TransformConsumer::new(MetricsTransformProcessor::new(Vec::new()), sink);
    assert_eq!(
        consumer.consume(request(Vec::new())),
        Err(ConsumerError::ChannelClosed)
    );
}
