//! Metric combination
//!
//! Merges several compatible metrics into one. Compatibility is checked up
//! front by [`validate_combinable`]; [`combine`] assumes it passed.

use opentelemetry_proto::tonic::metrics::v1::{AggregationTemporality, Metric, metric::Data};

use super::aggregate::merge_points;
use super::error::CombineError;
use super::points::{self, MetricShape};
use super::rule::TransformRule;
use crate::utils::otlp::upsert_string;

fn temporality_name(value: i32) -> String {
    AggregationTemporality::try_from(value)
        .map(|t| t.as_str_name().to_string())
        .unwrap_or_else(|_| value.to_string())
}

fn temporality(data: &Data) -> Option<i32> {
    match data {
        Data::Sum(s) => Some(s.aggregation_temporality),
        Data::Histogram(h) => Some(h.aggregation_temporality),
        Data::ExponentialHistogram(eh) => Some(eh.aggregation_temporality),
        Data::Gauge(_) | Data::Summary(_) => None,
    }
}

/// Check that every metric can be merged with the first one.
///
/// Checks run in order: Summary shape, shape, unit, attribute key set,
/// temporality, monotonicity. Fewer than two metrics always pass.
pub fn validate_combinable(metrics: &[&Metric]) -> Result<(), CombineError> {
    if metrics.len() <= 1 {
        return Ok(());
    }

    let mut first: Option<&Metric> = None;
    for &metric in metrics {
        if points::shape(metric) == Some(MetricShape::Summary) {
            return Err(CombineError::Summary {
                name: metric.name.clone(),
            });
        }
        let Some(head) = first else {
            first = Some(metric);
            continue;
        };

        let (head_shape, shape) = (points::shape(head), points::shape(metric));
        if head_shape != shape {
            return Err(CombineError::different_types(
                &head.name,
                head_shape,
                &metric.name,
                shape,
            ));
        }

        if head.unit != metric.unit {
            return Err(CombineError::DifferentUnits {
                first: head.name.clone(),
                first_unit: head.unit.clone(),
                other: metric.name.clone(),
                other_unit: metric.unit.clone(),
            });
        }

        let head_keys = points::attribute_keys(head);
        let keys = points::attribute_keys(metric);
        if head_keys != keys {
            return Err(CombineError::DifferentAttributes {
                first: head.name.clone(),
                first_keys: head_keys.into_iter().collect(),
                other: metric.name.clone(),
                other_keys: keys.into_iter().collect(),
            });
        }

        let (Some(head_data), Some(data)) = (head.data.as_ref(), metric.data.as_ref()) else {
            continue;
        };
        if temporality(head_data) != temporality(data) {
            return Err(CombineError::DifferentTemporality {
                first: head.name.clone(),
                first_temporality: temporality(head_data).map(temporality_name).unwrap_or_default(),
                other: metric.name.clone(),
                other_temporality: temporality(data).map(temporality_name).unwrap_or_default(),
            });
        }
        if let (Data::Sum(a), Data::Sum(b)) = (head_data, data)
            && a.is_monotonic != b.is_monotonic
        {
            return Err(CombineError::DifferentMonotonicity {
                first: head.name.clone(),
                first_monotonic: a.is_monotonic,
                other: metric.name.clone(),
                other_monotonic: b.is_monotonic,
            });
        }
    }

    Ok(())
}

/// Inject one attribute per non-empty capture group of the rule's filter
/// into every data point of `metric`.
fn inject_captures(rule: &TransformRule, keys: &[String], metric: &mut Metric) {
    let Some(submatches) = rule.filter.submatches(&metric.name) else {
        return;
    };
    let captures: Vec<(String, String)> = submatches
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, span)| {
            let (start, end) = (*span)?;
            let value = rule.submatch_case.apply(&metric.name[start..end]);
            (!value.is_empty()).then(|| (keys[i].clone(), value))
        })
        .collect();
    if captures.is_empty() {
        return;
    }
    points::for_each_attributes_mut(metric, |attrs| {
        for (key, value) in &captures {
            upsert_string(attrs, key, value);
        }
    });
}

/// Merge `metrics` into a single metric named after the rule.
///
/// Unit, shape, temporality and monotonicity come from the first metric.
/// Points from all inputs are grouped by attributes and reduced with the
/// rule's aggregation type.
pub fn combine(rule: &TransformRule, mut metrics: Vec<Metric>) -> Metric {
    let keys = rule.filter.capture_keys();
    for metric in &mut metrics {
        inject_captures(rule, &keys, metric);
    }

    let mut combined = Metric {
        name: rule.new_name.clone().unwrap_or_default(),
        ..Default::default()
    };
    let Some(first) = metrics.first() else {
        return combined;
    };
    combined.unit = first.unit.clone();
    combined.data = first.data.as_ref().map(points::empty_like);

    let inputs: Vec<Data> = metrics.into_iter().filter_map(|m| m.data).collect();
    if let Some(target) = combined.data.as_mut() {
        merge_points(inputs, target, rule.aggregation);
    }
    combined
}
