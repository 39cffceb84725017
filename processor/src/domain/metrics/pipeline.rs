//! Metric transform pipeline
//!
//! Runs every rule, in order, over every scope's metric list. Each rule sees
//! the list as the previous rule left it. Grouped metrics move to synthetic
//! resources appended after all original resources; scopes and resources left
//! without metrics are pruned.

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{Metric, ResourceMetrics, ScopeMetrics};
use opentelemetry_proto::tonic::resource::v1::Resource;

use super::combine::{combine, validate_combinable};
use super::error::CombineError;
use super::points;
use super::rule::{TransformAction, TransformRule};
use crate::data::{Consumer, ConsumerError};
use crate::utils::otlp::upsert_string;

/// Rename `metric` and run the rule's operations on it.
///
/// Structural edits (rename, label aggregation, add/delete, type toggle) only
/// run when the rule may change the whole metric: always for Insert, Combine
/// and Group, and for Update only when every data point matches.
///
/// Returns false when the metric had data points and has none left.
pub fn transform_metric(metric: &mut Metric, rule: &TransformRule) -> bool {
    let was_empty = points::count_points(metric) == 0;
    let can_change =
        rule.action != TransformAction::Update || points::match_all(metric, &rule.filter);

    if can_change && let Some(new_name) = rule.new_name.as_deref() {
        let expanded = rule.filter.expand(new_name, &metric.name);
        metric.name = if expanded.is_empty() {
            new_name.to_string()
        } else {
            expanded
        };
    }

    for operation in &rule.operations {
        if operation.requires_full_match() && !can_change {
            tracing::trace!(
                metric = %metric.name,
                operation = operation.name(),
                "Skipping operation on partially matching metric"
            );
            continue;
        }
        operation.apply(metric, &rule.filter);
    }

    was_empty || points::count_points(metric) > 0
}

/// Combine rules skipped during one `process` call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransformReport {
    pub skipped: Vec<CombineError>,
}

impl TransformReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Ordered list of compiled transform rules
#[derive(Debug, Clone)]
pub struct MetricsTransformProcessor {
    transforms: Vec<TransformRule>,
}

impl MetricsTransformProcessor {
    pub fn new(transforms: Vec<TransformRule>) -> Self {
        Self { transforms }
    }

    pub fn transforms(&self) -> &[TransformRule] {
        &self.transforms
    }

    /// Apply every rule to `request` in place
    pub fn process(&self, request: &mut ExportMetricsServiceRequest) -> TransformReport {
        let mut report = TransformReport::default();
        let mut grouped: Vec<ResourceMetrics> = Vec::new();

        request.resource_metrics.retain_mut(|rm| {
            let ResourceMetrics {
                resource,
                scope_metrics,
                schema_url,
            } = rm;

            scope_metrics.retain_mut(|sm| {
                for rule in &self.transforms {
                    match rule.action {
                        TransformAction::Group => {
                            let extracted = points::take_matched(&rule.filter, &mut sm.metrics);
                            if extracted.is_empty() {
                                continue;
                            }
                            tracing::debug!(
                                count = extracted.len(),
                                "Grouping metrics under new resource"
                            );
                            grouped.push(group_resource(
                                resource.as_ref(),
                                schema_url,
                                sm,
                                extracted,
                                rule,
                            ));
                        }
                        TransformAction::Combine => {
                            if let Err(err) = apply_combine(rule, &mut sm.metrics) {
                                tracing::warn!(
                                    new_name = rule.new_name.as_deref().unwrap_or_default(),
                                    error = %err,
                                    "Skipping combine rule"
                                );
                                report.skipped.push(err);
                            }
                        }
                        TransformAction::Insert => apply_insert(rule, &mut sm.metrics),
                        TransformAction::Update => sm
                            .metrics
                            .retain_mut(|m| !rule.filter.matches(m) || transform_metric(m, rule)),
                    }
                }
                !sm.metrics.is_empty()
            });

            !scope_metrics.is_empty()
        });

        request.resource_metrics.extend(grouped);
        report
    }
}

/// Synthetic resource holding `metrics` under a copy of the source scope
fn group_resource(
    resource: Option<&Resource>,
    schema_url: &str,
    scope: &ScopeMetrics,
    metrics: Vec<Metric>,
    rule: &TransformRule,
) -> ResourceMetrics {
    let mut resource = resource.cloned().unwrap_or_default();
    for (key, value) in &rule.group_resource_labels {
        upsert_string(&mut resource.attributes, key, value);
    }
    ResourceMetrics {
        resource: Some(resource),
        scope_metrics: vec![ScopeMetrics {
            scope: scope.scope.clone(),
            metrics,
            schema_url: scope.schema_url.clone(),
        }],
        schema_url: schema_url.to_string(),
    }
}

/// Validate, extract and merge the metrics matching `rule`.
/// On a compatibility error `metrics` is left untouched.
fn apply_combine(rule: &TransformRule, metrics: &mut Vec<Metric>) -> Result<(), CombineError> {
    let matched: Vec<&Metric> = metrics.iter().filter(|m| rule.filter.matches(m)).collect();
    if matched.is_empty() {
        return Ok(());
    }
    validate_combinable(&matched)?;

    let extracted = points::take_matched(&rule.filter, metrics);
    let mut combined = combine(rule, extracted);
    if transform_metric(&mut combined, rule) {
        metrics.push(combined);
    }
    Ok(())
}

/// Append transformed copies of the matching part of every metric.
/// Sources are never removed, even on a full match.
fn apply_insert(rule: &TransformRule, metrics: &mut Vec<Metric>) {
    let inserted: Vec<Metric> = metrics
        .iter()
        .filter_map(|m| rule.filter.extract(m))
        .map(|extracted| extracted.into_owned())
        .filter_map(|mut m| transform_metric(&mut m, rule).then_some(m))
        .collect();
    metrics.extend(inserted);
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Transforms each metrics batch, then forwards it to `next`
pub struct TransformConsumer<C> {
    processor: MetricsTransformProcessor,
    next: C,
}

impl<C> TransformConsumer<C> {
    pub fn new(processor: MetricsTransformProcessor, next: C) -> Self {
        Self { processor, next }
    }
}

impl<C: Consumer<ExportMetricsServiceRequest>> Consumer<ExportMetricsServiceRequest>
    for TransformConsumer<C>
{
    fn consume(&self, mut batch: ExportMetricsServiceRequest) -> Result<(), ConsumerError> {
        let report = self.processor.process(&mut batch);
        if !report.is_clean() {
            tracing::debug!(skipped = report.skipped.len(), "Combine rules skipped");
        }
        self.next.consume(batch)
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
