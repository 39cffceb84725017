//! Data point aggregation
//!
//! Groups data points that share attributes and timestamps, then reduces each
//! group to a single point. Number points use the configured reducer;
//! histogram points are always merged bucket-wise. Groups keep first-seen order.

use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, ExponentialHistogramDataPoint, HistogramDataPoint, NumberDataPoint,
    exponential_histogram_data_point::Buckets, metric::Data, number_data_point,
};
use rustc_hash::FxHashMap;

use super::rule::AggregationType;
use crate::utils::otlp::attributes_fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    attributes: Vec<(String, String)>,
    time_unix_nano: u64,
    /// Only part of the key for delta temporality
    start_time_unix_nano: Option<u64>,
    /// Shape-specific layout identity (bounds, scale, offsets, flags)
    layout: Vec<u64>,
}

struct Groups<P> {
    index: FxHashMap<GroupKey, usize>,
    groups: Vec<Vec<P>>,
}

impl<P> Groups<P> {
    fn new() -> Self {
        Self {
            index: FxHashMap::default(),
            groups: Vec::new(),
        }
    }

    fn push(&mut self, key: GroupKey, point: P) {
        match self.index.get(&key) {
            Some(&idx) => self.groups[idx].push(point),
            None => {
                self.index.insert(key, self.groups.len());
                self.groups.push(vec![point]);
            }
        }
    }
}

fn is_delta(temporality: i32) -> bool {
    temporality == AggregationTemporality::Delta as i32
}

fn number_key(dp: &NumberDataPoint, delta: bool) -> GroupKey {
    GroupKey {
        attributes: attributes_fingerprint(&dp.attributes),
        time_unix_nano: dp.time_unix_nano,
        start_time_unix_nano: delta.then_some(dp.start_time_unix_nano),
        layout: Vec::new(),
    }
}

fn histogram_key(dp: &HistogramDataPoint, delta: bool) -> GroupKey {
    let mut layout: Vec<u64> = dp.explicit_bounds.iter().map(|b| b.to_bits()).collect();
    layout.extend([
        u64::from(dp.min.is_some()),
        u64::from(dp.max.is_some()),
        u64::from(dp.flags),
    ]);
    GroupKey {
        attributes: attributes_fingerprint(&dp.attributes),
        time_unix_nano: dp.time_unix_nano,
        start_time_unix_nano: delta.then_some(dp.start_time_unix_nano),
        layout,
    }
}

fn exp_histogram_key(dp: &ExponentialHistogramDataPoint, delta: bool) -> GroupKey {
    let offset = |b: &Option<Buckets>| b.as_ref().map_or(0, |b| b.offset) as i64 as u64;
    GroupKey {
        attributes: attributes_fingerprint(&dp.attributes),
        time_unix_nano: dp.time_unix_nano,
        start_time_unix_nano: delta.then_some(dp.start_time_unix_nano),
        layout: vec![
            dp.scale as i64 as u64,
            u64::from(dp.min.is_some()),
            u64::from(dp.max.is_some()),
            u64::from(dp.flags),
            offset(&dp.negative),
            offset(&dp.positive),
        ],
    }
}

/// Merge the data points of `inputs` into `target`, one point per group.
/// Inputs whose shape differs from the target are ignored. Summary targets are
/// left untouched.
pub fn merge_points(inputs: Vec<Data>, target: &mut Data, aggregation: AggregationType) {
    match target {
        Data::Gauge(gauge) => {
            let mut groups = Groups::new();
            for input in inputs {
                if let Data::Gauge(g) = input {
                    for dp in g.data_points {
                        groups.push(number_key(&dp, false), dp);
                    }
                }
            }
            gauge.data_points = reduce_all(groups, |g| reduce_numbers(g, aggregation));
        }
        Data::Sum(sum) => {
            let mut groups = Groups::new();
            for input in inputs {
                if let Data::Sum(s) = input {
                    let delta = is_delta(s.aggregation_temporality);
                    for dp in s.data_points {
                        groups.push(number_key(&dp, delta), dp);
                    }
                }
            }
            sum.data_points = reduce_all(groups, |g| reduce_numbers(g, aggregation));
        }
        Data::Histogram(histogram) => {
            let mut groups = Groups::new();
            for input in inputs {
                if let Data::Histogram(h) = input {
                    let delta = is_delta(h.aggregation_temporality);
                    for dp in h.data_points {
                        groups.push(histogram_key(&dp, delta), dp);
                    }
                }
            }
            histogram.data_points = reduce_all(groups, reduce_histograms);
        }
        Data::ExponentialHistogram(exp_histogram) => {
            let mut groups = Groups::new();
            for input in inputs {
                if let Data::ExponentialHistogram(eh) = input {
                    let delta = is_delta(eh.aggregation_temporality);
                    for dp in eh.data_points {
                        groups.push(exp_histogram_key(&dp, delta), dp);
                    }
                }
            }
            exp_histogram.data_points = reduce_all(groups, reduce_exp_histograms);
        }
        Data::Summary(_) => {}
    }
}

fn reduce_all<P>(groups: Groups<P>, reduce: impl Fn(Vec<P>) -> Option<P>) -> Vec<P> {
    groups.groups.into_iter().filter_map(reduce).collect()
}

// ============================================================================
// NUMBER REDUCERS
// ============================================================================

fn as_f64(dp: &NumberDataPoint) -> f64 {
    match dp.value {
        Some(number_data_point::Value::AsDouble(d)) => d,
        Some(number_data_point::Value::AsInt(i)) => i as f64,
        None => 0.0,
    }
}

fn as_i64(dp: &NumberDataPoint) -> i64 {
    match dp.value {
        Some(number_data_point::Value::AsInt(i)) => i,
        Some(number_data_point::Value::AsDouble(d)) => d as i64,
        None => 0,
    }
}

fn reduce_numbers(
    group: Vec<NumberDataPoint>,
    aggregation: AggregationType,
) -> Option<NumberDataPoint> {
    let start = group.iter().map(|dp| dp.start_time_unix_nano).min()?;
    let mut iter = group.into_iter();
    let mut acc = iter.next()?;
    let rest: Vec<NumberDataPoint> = iter.collect();

    acc.value = match acc.value {
        Some(number_data_point::Value::AsDouble(first)) => {
            let values = std::iter::once(first).chain(rest.iter().map(as_f64)).collect();
            Some(number_data_point::Value::AsDouble(reduce_f64(values, aggregation)))
        }
        Some(number_data_point::Value::AsInt(first)) => {
            let values = std::iter::once(first).chain(rest.iter().map(as_i64)).collect();
            Some(number_data_point::Value::AsInt(reduce_i64(values, aggregation)))
        }
        None => None,
    };
    acc.start_time_unix_nano = start;
    for dp in rest {
        acc.exemplars.extend(dp.exemplars);
    }
    Some(acc)
}

fn reduce_f64(mut values: Vec<f64>, aggregation: AggregationType) -> f64 {
    let n = values.len() as f64;
    match aggregation {
        AggregationType::Sum => values.iter().sum(),
        AggregationType::Mean => values.iter().sum::<f64>() / n,
        AggregationType::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationType::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationType::Count => n,
        AggregationType::Median => {
            values.sort_by(f64::total_cmp);
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        }
    }
}

/// Sums wrap on overflow; mean and median are computed exactly.
fn reduce_i64(mut values: Vec<i64>, aggregation: AggregationType) -> i64 {
    let n = values.len() as i64;
    match aggregation {
        AggregationType::Sum => values.iter().copied().fold(0, i64::wrapping_add),
        AggregationType::Mean => {
            let total: i128 = values.iter().map(|&v| i128::from(v)).sum();
            (total / i128::from(n)) as i64
        }
        AggregationType::Min => values.iter().copied().min().unwrap_or_default(),
        AggregationType::Max => values.iter().copied().max().unwrap_or_default(),
        AggregationType::Count => n,
        AggregationType::Median => {
            values.sort_unstable();
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                ((i128::from(values[mid - 1]) + i128::from(values[mid])) / 2) as i64
            } else {
                values[mid]
            }
        }
    }
}

// ============================================================================
// HISTOGRAM REDUCERS
// ============================================================================

fn add_counts(acc: &mut Vec<u64>, other: &[u64]) {
    if acc.len() < other.len() {
        acc.resize(other.len(), 0);
    }
    for (slot, count) in acc.iter_mut().zip(other) {
        *slot = slot.wrapping_add(*count);
    }
}

fn add_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

fn fold_opt(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, _) => a,
    }
}

fn reduce_histograms(group: Vec<HistogramDataPoint>) -> Option<HistogramDataPoint> {
    let mut iter = group.into_iter();
    let mut acc = iter.next()?;
    for dp in iter {
        acc.start_time_unix_nano = acc.start_time_unix_nano.min(dp.start_time_unix_nano);
        if dp.count == 0 {
            continue;
        }
        acc.count = acc.count.wrapping_add(dp.count);
        acc.sum = add_opt(acc.sum, dp.sum);
        acc.min = fold_opt(acc.min, dp.min, f64::min);
        acc.max = fold_opt(acc.max, dp.max, f64::max);
        add_counts(&mut acc.bucket_counts, &dp.bucket_counts);
        acc.exemplars.extend(dp.exemplars);
    }
    Some(acc)
}

fn merge_buckets(acc: &mut Option<Buckets>, other: Option<Buckets>) {
    match (acc.as_mut(), other) {
        (Some(a), Some(b)) => add_counts(&mut a.bucket_counts, &b.bucket_counts),
        (None, Some(b)) => *acc = Some(b),
        (_, None) => {}
    }
}

fn reduce_exp_histograms(
    group: Vec<ExponentialHistogramDataPoint>,
) -> Option<ExponentialHistogramDataPoint> {
    let mut iter = group.into_iter();
    let mut acc = iter.next()?;
    for dp in iter {
        acc.start_time_unix_nano = acc.start_time_unix_nano.min(dp.start_time_unix_nano);
        if dp.count == 0 {
            continue;
        }
        acc.count = acc.count.wrapping_add(dp.count);
        acc.sum = add_opt(acc.sum, dp.sum);
        acc.zero_count = acc.zero_count.wrapping_add(dp.zero_count);
        acc.min = fold_opt(acc.min, dp.min, f64::min);
        acc.max = fold_opt(acc.max, dp.max, f64::max);
        merge_buckets(&mut acc.positive, dp.positive);
        merge_buckets(&mut acc.negative, dp.negative);
        acc.exemplars.extend(dp.exemplars);
    }
    Some(acc)
}
