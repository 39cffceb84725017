//! Compiled transform rules
//!
//! Rules arrive from configuration already validated; everything here is
//! immutable and safe to share across threads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::matcher::MetricFilter;
use super::operations::LabelOperation;

/// What a rule does with the metrics its filter selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformAction {
    /// Modify matching metrics in place
    Update,
    /// Append transformed copies of matching metrics
    Insert,
    /// Merge matching metrics into one new metric
    Combine,
    /// Move matching metrics under a new resource
    Group,
}

impl fmt::Display for TransformAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformAction::Update => write!(f, "update"),
            TransformAction::Insert => write!(f, "insert"),
            TransformAction::Combine => write!(f, "combine"),
            TransformAction::Group => write!(f, "group"),
        }
    }
}

/// Reducer applied to number data points that collapse into one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Median,
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationType::Sum => write!(f, "sum"),
            AggregationType::Mean => write!(f, "mean"),
            AggregationType::Min => write!(f, "min"),
            AggregationType::Max => write!(f, "max"),
            AggregationType::Count => write!(f, "count"),
            AggregationType::Median => write!(f, "median"),
        }
    }
}

/// Case applied to regex captures injected as attribute values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmatchCase {
    #[default]
    #[serde(alias = "")]
    None,
    Lower,
    Upper,
}

impl SubmatchCase {
    pub fn apply(&self, value: &str) -> String {
        match self {
            SubmatchCase::None => value.to_string(),
            SubmatchCase::Lower => value.to_lowercase(),
            SubmatchCase::Upper => value.to_uppercase(),
        }
    }
}

/// One step of the metric transform pipeline
#[derive(Debug, Clone)]
pub struct TransformRule {
    pub action: TransformAction,
    pub filter: MetricFilter,
    /// Literal name or `$1` / `$name` template expanded against the filter
    pub new_name: Option<String>,
    pub submatch_case: SubmatchCase,
    /// Resource attributes upserted on the synthetic resource of a Group rule
    pub group_resource_labels: Vec<(String, String)>,
    pub aggregation: AggregationType,
    pub operations: Vec<LabelOperation>,
}

impl TransformRule {
    pub fn new(action: TransformAction, filter: MetricFilter) -> Self {
        Self {
            action,
            filter,
            new_name: None,
            submatch_case: SubmatchCase::None,
            group_resource_labels: Vec::new(),
            aggregation: AggregationType::Sum,
            operations: Vec::new(),
        }
    }

    pub fn with_new_name(mut self, new_name: &str) -> Self {
        self.new_name = Some(new_name.to_string());
        self
    }

    pub fn with_submatch_case(mut self, case: SubmatchCase) -> Self {
        self.submatch_case = case;
        self
    }

    pub fn with_group_resource_label(mut self, key: &str, value: &str) -> Self {
        self.group_resource_labels
            .push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationType) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_operation(mut self, operation: LabelOperation) -> Self {
        self.operations.push(operation);
        self
    }
}
