//! Label operations
//!
//! Edits applied to a single metric, in rule order, by `transform_metric`.
//! Structural operations only run when the enclosing rule is allowed to change
//! the whole metric; point-level operations touch matching points only.

use std::collections::{BTreeSet, HashMap};

use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, Gauge, Metric, NumberDataPoint, Sum, metric::Data, number_data_point,
};

use super::aggregate::merge_points;
use super::matcher::MetricFilter;
use super::points::{self, empty_like};
use super::rule::AggregationType;
use crate::utils::otlp::{
    any_value_to_string, get_attribute_string, remove_attribute, string_value, upsert_attribute,
    upsert_string,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LabelOperation {
    /// Rename a label and/or rewrite some of its values
    UpdateLabel {
        label: String,
        new_label: Option<String>,
        /// Old value -> new value
        value_actions: HashMap<String, String>,
    },
    /// Keep only `label_set` on every point and merge points that collide
    AggregateLabels {
        label_set: BTreeSet<String>,
        aggregation: AggregationType,
    },
    /// Rewrite `aggregated_values` of `label` to `new_value` and merge points that collide
    AggregateLabelValues {
        label: String,
        aggregated_values: BTreeSet<String>,
        new_value: String,
        aggregation: AggregationType,
    },
    /// Upsert a constant label on every point
    AddLabel { new_label: String, new_value: String },
    /// Drop every point whose `label` equals `label_value`
    DeleteLabelValue { label: String, label_value: String },
    /// Convert Gauge to Sum and Sum to Gauge
    ToggleScalarDataType {
        aggregation_temporality: i32,
        is_monotonic: bool,
    },
    /// Multiply values of matching points by `factor`
    ScaleValue { factor: f64 },
}

impl LabelOperation {
    /// Toggle to a cumulative, non-monotonic Sum (Gauge input) or a Gauge (Sum input)
    pub fn toggle_scalar_data_type() -> Self {
        Self::ToggleScalarDataType {
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateLabel { .. } => "update_label",
            Self::AggregateLabels { .. } => "aggregate_labels",
            Self::AggregateLabelValues { .. } => "aggregate_label_values",
            Self::AddLabel { .. } => "add_label",
            Self::DeleteLabelValue { .. } => "delete_label_value",
            Self::ToggleScalarDataType { .. } => "toggle_scalar_data_type",
            Self::ScaleValue { .. } => "experimental_scale_value",
        }
    }

    /// Whether the operation rewrites the metric as a whole and therefore needs
    /// every data point to have matched the rule's filter
    pub fn requires_full_match(&self) -> bool {
        !matches!(self, Self::UpdateLabel { .. } | Self::ScaleValue { .. })
    }

    /// Apply the operation to `metric`. `filter` selects the points that
    /// point-level operations touch.
    pub fn apply(&self, metric: &mut Metric, filter: &MetricFilter) {
        match self {
            Self::UpdateLabel {
                label,
                new_label,
                value_actions,
            } => points::for_each_attributes_mut(metric, |attrs| {
                if !filter.attributes_match(attrs) {
                    return;
                }
                let Some(kv) = attrs.iter_mut().find(|kv| kv.key == *label) else {
                    return;
                };
                let current = kv.value.as_ref().map(any_value_to_string).unwrap_or_default();
                if let Some(new_value) = value_actions.get(&current) {
                    kv.value = Some(string_value(new_value));
                }
                if let Some(new_label) = new_label
                    && new_label != label
                    && let Some(value) = remove_attribute(attrs, label)
                {
                    upsert_attribute(attrs, new_label, value);
                }
            }),
            Self::AggregateLabels {
                label_set,
                aggregation,
            } => {
                points::for_each_attributes_mut(metric, |attrs| {
                    attrs.retain(|kv| label_set.contains(&kv.key));
                });
                regroup(metric, *aggregation);
            }
            Self::AggregateLabelValues {
                label,
                aggregated_values,
                new_value,
                aggregation,
            } => {
                points::for_each_attributes_mut(metric, |attrs| {
                    if get_attribute_string(attrs, label)
                        .is_some_and(|value| aggregated_values.contains(&value))
                    {
                        upsert_string(attrs, label, new_value);
                    }
                });
                regroup(metric, *aggregation);
            }
            Self::AddLabel {
                new_label,
                new_value,
            } => points::for_each_attributes_mut(metric, |attrs| {
                upsert_string(attrs, new_label, new_value);
            }),
            Self::DeleteLabelValue { label, label_value } => {
                points::retain_points(metric, |attrs| {
                    get_attribute_string(attrs, label).as_deref() != Some(label_value.as_str())
                });
            }
            Self::ToggleScalarDataType {
                aggregation_temporality,
                is_monotonic,
            } => toggle_scalar(metric, *aggregation_temporality, *is_monotonic),
            Self::ScaleValue { factor } => scale_values(metric, filter, *factor),
        }
    }
}

/// Merge points of `metric` that now share attributes and timestamps
fn regroup(metric: &mut Metric, aggregation: AggregationType) {
    if let Some(data) = metric.data.as_mut() {
        let empty = empty_like(data);
        let input = std::mem::replace(data, empty);
        merge_points(vec![input], data, aggregation);
    }
}

fn toggle_scalar(metric: &mut Metric, aggregation_temporality: i32, is_monotonic: bool) {
    let Some(data) = metric.data.take() else {
        return;
    };
    metric.data = Some(match data {
        Data::Gauge(gauge) => Data::Sum(Sum {
            data_points: gauge.data_points,
            aggregation_temporality,
            is_monotonic,
        }),
        Data::Sum(sum) => Data::Gauge(Gauge {
            data_points: sum.data_points,
        }),
        other => other,
    });
}

fn scale_number(dp: &mut NumberDataPoint, factor: f64) {
    dp.value = match dp.value {
        Some(number_data_point::Value::AsDouble(d)) => {
            Some(number_data_point::Value::AsDouble(d * factor))
        }
        Some(number_data_point::Value::AsInt(i)) => {
            Some(number_data_point::Value::AsInt((i as f64 * factor) as i64))
        }
        None => None,
    };
}

fn scale_values(metric: &mut Metric, filter: &MetricFilter, factor: f64) {
    let Some(data) = metric.data.as_mut() else {
        return;
    };
    match data {
        Data::Gauge(Gauge { data_points }) | Data::Sum(Sum { data_points, .. }) => data_points
            .iter_mut()
            .filter(|dp| filter.attributes_match(&dp.attributes))
            .for_each(|dp| scale_number(dp, factor)),
        Data::Histogram(histogram) => histogram
            .data_points
            .iter_mut()
            .filter(|dp| filter.attributes_match(&dp.attributes))
            .for_each(|dp| {
                dp.sum = dp.sum.map(|v| v * factor);
                dp.min = dp.min.map(|v| v * factor);
                dp.max = dp.max.map(|v| v * factor);
                dp.explicit_bounds.iter_mut().for_each(|b| *b *= factor);
            }),
        Data::ExponentialHistogram(_) | Data::Summary(_) => {}
    }
}
