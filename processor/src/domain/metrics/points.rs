//! Data point collections
//!
//! Uniform access to the data points of all 5 OTLP metric shapes:
//! Gauge, Sum, Histogram, ExponentialHistogram, Summary.
//! Selection (`match_any`, `match_all`, `partition`, `extract`) is written once
//! against this view instead of once per shape.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::{
    ExponentialHistogram, ExponentialHistogramDataPoint, Gauge, Histogram, HistogramDataPoint,
    Metric, NumberDataPoint, Sum, Summary, SummaryDataPoint, metric::Data,
};

use super::matcher::MetricFilter;

/// Runs `$body` with `$points` bound to the shape's data point vector.
macro_rules! with_points {
    ($data:expr, |$points:ident| $body:expr) => {
        match $data {
            Data::Gauge(inner) => {
                let $points = &inner.data_points;
                $body
            }
            Data::Sum(inner) => {
                let $points = &inner.data_points;
                $body
            }
            Data::Histogram(inner) => {
                let $points = &inner.data_points;
                $body
            }
            Data::ExponentialHistogram(inner) => {
                let $points = &inner.data_points;
                $body
            }
            Data::Summary(inner) => {
                let $points = &inner.data_points;
                $body
            }
        }
    };
}

/// Mutable counterpart of `with_points!`.
macro_rules! with_points_mut {
    ($data:expr, |$points:ident| $body:expr) => {
        match $data {
            Data::Gauge(inner) => {
                let $points = &mut inner.data_points;
                $body
            }
            Data::Sum(inner) => {
                let $points = &mut inner.data_points;
                $body
            }
            Data::Histogram(inner) => {
                let $points = &mut inner.data_points;
                $body
            }
            Data::ExponentialHistogram(inner) => {
                let $points = &mut inner.data_points;
                $body
            }
            Data::Summary(inner) => {
                let $points = &mut inner.data_points;
                $body
            }
        }
    };
}

// ============================================================================
// DATA POINT TRAIT
// ============================================================================

/// Attribute access shared by every data point type
pub trait DataPoint: Clone {
    fn attributes(&self) -> &[KeyValue];
    fn attributes_mut(&mut self) -> &mut Vec<KeyValue>;
}

macro_rules! impl_data_point {
    ($($ty:ty),*) => {
        $(
            impl DataPoint for $ty {
                fn attributes(&self) -> &[KeyValue] {
                    &self.attributes
                }

                fn attributes_mut(&mut self) -> &mut Vec<KeyValue> {
                    &mut self.attributes
                }
            }
        )*
    };
}

impl_data_point!(
    NumberDataPoint,
    HistogramDataPoint,
    ExponentialHistogramDataPoint,
    SummaryDataPoint
);

// ============================================================================
// METRIC SHAPE
// ============================================================================

/// The five structurally distinct metric representations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricShape {
    Gauge,
    Sum,
    Histogram,
    ExponentialHistogram,
    Summary,
}

impl MetricShape {
    pub fn of(data: &Data) -> Self {
        match data {
            Data::Gauge(_) => Self::Gauge,
            Data::Sum(_) => Self::Sum,
            Data::Histogram(_) => Self::Histogram,
            Data::ExponentialHistogram(_) => Self::ExponentialHistogram,
            Data::Summary(_) => Self::Summary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "Gauge",
            Self::Sum => "Sum",
            Self::Histogram => "Histogram",
            Self::ExponentialHistogram => "ExponentialHistogram",
            Self::Summary => "Summary",
        }
    }
}

impl fmt::Display for MetricShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a metric, `None` when it carries no data
pub fn shape(metric: &Metric) -> Option<MetricShape> {
    metric.data.as_ref().map(MetricShape::of)
}

// ============================================================================
// COLLECTION ACCESS
// ============================================================================

/// Number of data points in a metric
pub fn count_points(metric: &Metric) -> usize {
    match &metric.data {
        Some(data) => with_points!(data, |points| points.len()),
        None => 0,
    }
}

/// Attribute lists of every data point, in order
pub fn point_attributes(metric: &Metric) -> Box<dyn Iterator<Item = &[KeyValue]> + '_> {
    match &metric.data {
        Some(data) => with_points!(data, |points| Box::new(
            points.iter().map(DataPoint::attributes)
        )),
        None => Box::new(std::iter::empty()),
    }
}

/// Call `f` on the attribute list of every data point
pub fn for_each_attributes_mut(metric: &mut Metric, mut f: impl FnMut(&mut Vec<KeyValue>)) {
    if let Some(data) = metric.data.as_mut() {
        with_points_mut!(data, |points| points
            .iter_mut()
            .for_each(|dp| f(dp.attributes_mut())));
    }
}

/// Keep only the data points whose attributes satisfy `keep`
pub fn retain_points(metric: &mut Metric, mut keep: impl FnMut(&[KeyValue]) -> bool) {
    if let Some(data) = metric.data.as_mut() {
        with_points_mut!(data, |points| points.retain(|dp| keep(dp.attributes())));
    }
}

/// Union of attribute keys across all data points
pub fn attribute_keys(metric: &Metric) -> BTreeSet<String> {
    point_attributes(metric)
        .flat_map(|attrs| attrs.iter().map(|kv| kv.key.clone()))
        .collect()
}

/// Same shape and shape metadata (temporality, monotonicity), no data points
pub fn empty_like(data: &Data) -> Data {
    match data {
        Data::Gauge(_) => Data::Gauge(Gauge {
            data_points: Vec::new(),
        }),
        Data::Sum(s) => Data::Sum(Sum {
            data_points: Vec::new(),
            aggregation_temporality: s.aggregation_temporality,
            is_monotonic: s.is_monotonic,
        }),
        Data::Histogram(h) => Data::Histogram(Histogram {
            data_points: Vec::new(),
            aggregation_temporality: h.aggregation_temporality,
        }),
        Data::ExponentialHistogram(eh) => Data::ExponentialHistogram(ExponentialHistogram {
            data_points: Vec::new(),
            aggregation_temporality: eh.aggregation_temporality,
        }),
        Data::Summary(_) => Data::Summary(Summary {
            data_points: Vec::new(),
        }),
    }
}

/// Metric with the same identity (name, description, unit, metadata) and
/// shape as `metric`, but no data points
pub fn metric_like(metric: &Metric) -> Metric {
    Metric {
        name: metric.name.clone(),
        description: metric.description.clone(),
        unit: metric.unit.clone(),
        metadata: metric.metadata.clone(),
        data: metric.data.as_ref().map(empty_like),
    }
}

fn drain_masked<P>(points: &mut Vec<P>, mask: &[bool]) -> Vec<P> {
    let mut taken = Vec::new();
    let mut kept = Vec::with_capacity(points.len());
    for (dp, &selected) in std::mem::take(points).into_iter().zip(mask) {
        if selected {
            taken.push(dp);
        } else {
            kept.push(dp);
        }
    }
    *points = kept;
    taken
}

fn copy_masked<P: Clone>(points: &[P], mask: &[bool]) -> Vec<P> {
    points
        .iter()
        .zip(mask)
        .filter(|(_, selected)| **selected)
        .map(|(dp, _)| dp.clone())
        .collect()
}

/// Pairs matching shapes of `$src` and `$dst` and runs `$body` on their point vectors.
macro_rules! zip_points {
    ($src:expr, $dst:expr, |$s:ident, $d:ident| $body:expr) => {
        match ($src, $dst) {
            (Data::Gauge($s), Data::Gauge($d)) => $body,
            (Data::Sum($s), Data::Sum($d)) => $body,
            (Data::Histogram($s), Data::Histogram($d)) => $body,
            (Data::ExponentialHistogram($s), Data::ExponentialHistogram($d)) => $body,
            (Data::Summary($s), Data::Summary($d)) => $body,
            _ => {}
        }
    };
}

/// Move the data points selected by `mask` into a new metric.
/// The source keeps only the unselected points, in order.
pub fn split_off(metric: &mut Metric, mask: &[bool]) -> Metric {
    let mut taken = metric_like(metric);
    if let (Some(src), Some(dst)) = (metric.data.as_mut(), taken.data.as_mut()) {
        zip_points!(src, dst, |s, d| d.data_points =
            drain_masked(&mut s.data_points, mask));
    }
    taken
}

fn copy_selected(metric: &Metric, mask: &[bool]) -> Metric {
    let mut copy = metric_like(metric);
    if let (Some(src), Some(dst)) = (metric.data.as_ref(), copy.data.as_mut()) {
        zip_points!(src, dst, |s, d| d.data_points =
            copy_masked(&s.data_points, mask));
    }
    copy
}

// ============================================================================
// SELECTION
// ============================================================================

/// True if the metric has no data points or at least one point matches
pub fn match_any(metric: &Metric, filter: &MetricFilter) -> bool {
    let mut points = point_attributes(metric).peekable();
    if points.peek().is_none() {
        return true;
    }
    points.any(|attrs| filter.attributes_match(attrs))
}

/// True if the metric has no data points or every point matches
pub fn match_all(metric: &Metric, filter: &MetricFilter) -> bool {
    point_attributes(metric).all(|attrs| filter.attributes_match(attrs))
}

/// Per-point match mask aligned with data point order, plus the number of matches.
/// For points `[a, b, c]` where only `a` and `c` match: `([true, false, true], 2)`.
pub fn partition(metric: &Metric, filter: &MetricFilter) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = point_attributes(metric)
        .map(|attrs| filter.attributes_match(attrs))
        .collect();
    let matched = mask.iter().filter(|m| **m).count();
    (mask, matched)
}

/// Data points of `metric` matching the filter's attribute predicates.
///
/// - every point matches (including zero points): the original metric, borrowed
/// - no point matches: `None`
/// - otherwise: a new metric of the same shape holding copies of the matched points
pub fn extract<'a>(metric: &'a Metric, filter: &MetricFilter) -> Option<Cow<'a, Metric>> {
    let (mask, matched) = partition(metric, filter);
    if matched == mask.len() {
        return Some(Cow::Borrowed(metric));
    }
    if matched == 0 {
        return None;
    }
    Some(Cow::Owned(copy_selected(metric, &mask)))
}

/// Remove matching metrics (or their matching points) from `metrics`.
///
/// Fully matching metrics are moved out whole. Partially matching metrics are
/// split: matched points move into the returned copy, the rest stay behind.
pub fn take_matched(filter: &MetricFilter, metrics: &mut Vec<Metric>) -> Vec<Metric> {
    let mut extracted = Vec::new();
    let mut kept = Vec::with_capacity(metrics.len());

    for mut metric in metrics.drain(..) {
        if !filter.matches_name(&metric.name) {
            kept.push(metric);
            continue;
        }
        let (mask, matched) = partition(&metric, filter);
        if matched == mask.len() {
            extracted.push(metric);
        } else if matched == 0 {
            kept.push(metric);
        } else {
            extracted.push(split_off(&mut metric, &mask));
            kept.push(metric);
        }
    }

    *metrics = kept;
    extracted
}

#[cfg(test)]
#[path = "points_tests.rs"]
mod tests;
