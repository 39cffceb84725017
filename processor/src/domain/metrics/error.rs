//! Combine rule errors

use thiserror::Error;

use super::points::MetricShape;

/// Why a set of metrics cannot be merged into one
///
/// Every variant except `Summary` names the first metric of the set and the
/// metric that disagrees with it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CombineError {
    /// Summary points carry quantiles that cannot be re-aggregated
    #[error("Summary metrics cannot be combined: {name}")]
    Summary { name: String },

    #[error(
        "metrics cannot be combined as they are of different types: {first} ({first_shape}) and {other} ({other_shape})"
    )]
    DifferentTypes {
        first: String,
        first_shape: String,
        other: String,
        other_shape: String,
    },

    #[error(
        "metrics cannot be combined as they have different units: {first} ({first_unit}) and {other} ({other_unit})"
    )]
    DifferentUnits {
        first: String,
        first_unit: String,
        other: String,
        other_unit: String,
    },

    #[error(
        "metrics cannot be combined as they have different attributes: {first} ({first_keys:?}) and {other} ({other_keys:?})"
    )]
    DifferentAttributes {
        first: String,
        first_keys: Vec<String>,
        other: String,
        other_keys: Vec<String>,
    },

    #[error(
        "metrics cannot be combined as they have different aggregation temporalities: {first} ({first_temporality}) and {other} ({other_temporality})"
    )]
    DifferentTemporality {
        first: String,
        first_temporality: String,
        other: String,
        other_temporality: String,
    },

    #[error(
        "metrics cannot be combined as they have different monotonicity: {first} ({first_monotonic}) and {other} ({other_monotonic})"
    )]
    DifferentMonotonicity {
        first: String,
        first_monotonic: bool,
        other: String,
        other_monotonic: bool,
    },
}

impl CombineError {
    pub(crate) fn different_types(
        first: &str,
        first_shape: Option<MetricShape>,
        other: &str,
        other_shape: Option<MetricShape>,
    ) -> Self {
        let name = |shape: Option<MetricShape>| shape.map_or("Empty", |s| s.as_str()).to_string();
        Self::DifferentTypes {
            first: first.to_string(),
            first_shape: name(first_shape),
            other: other.to_string(),
            other_shape: name(other_shape),
        }
    }
}
