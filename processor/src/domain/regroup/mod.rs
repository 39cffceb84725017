//! Batch regrouping by resource attribute
//!
//! Splits a traces, metrics or logs batch into one batch per distinct value
//! of a resource attribute and forwards each batch downstream. Groups are
//! emitted in first-seen order and resources keep their relative order
//! within a group. A missing attribute groups under the empty string.

use opentelemetry_proto::tonic::collector::{
    logs::v1::ExportLogsServiceRequest, metrics::v1::ExportMetricsServiceRequest,
    trace::v1::ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use rustc_hash::FxHashMap;

use crate::data::{Consumer, ConsumerError};
use crate::utils::otlp::resource_attribute_string;

// ============================================================================
// RESOURCE BATCH TRAIT
// ============================================================================

/// A batch made of an ordered list of resource groups
pub trait ResourceBatch: Sized {
    type Group;

    fn groups(&self) -> &[Self::Group];
    fn into_groups(self) -> Vec<Self::Group>;
    fn from_groups(groups: Vec<Self::Group>) -> Self;
    fn resource_of(group: &Self::Group) -> Option<&Resource>;
}

macro_rules! impl_resource_batch {
    ($batch:ty, $group:ty, $field:ident) => {
        impl ResourceBatch for $batch {
            type Group = $group;

            fn groups(&self) -> &[$group] {
                &self.$field
            }

            fn into_groups(self) -> Vec<$group> {
                self.$field
            }

            fn from_groups(groups: Vec<$group>) -> Self {
                Self { $field: groups }
            }

            fn resource_of(group: &$group) -> Option<&Resource> {
                group.resource.as_ref()
            }
        }
    };
}

impl_resource_batch!(ExportTraceServiceRequest, ResourceSpans, resource_spans);
impl_resource_batch!(ExportMetricsServiceRequest, ResourceMetrics, resource_metrics);
impl_resource_batch!(ExportLogsServiceRequest, ResourceLogs, resource_logs);

// ============================================================================
// SPLIT
// ============================================================================

/// Group index of every resource group, plus the number of distinct groups
fn group_indexes<B: ResourceBatch>(batch: &B, attribute_key: &str) -> (Vec<usize>, usize) {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let assignments = batch
        .groups()
        .iter()
        .map(|group| {
            let value = resource_attribute_string(B::resource_of(group), attribute_key);
            let next = index.len();
            *index.entry(value).or_insert(next)
        })
        .collect();
    (assignments, index.len())
}

fn split_by_indexes<B: ResourceBatch>(batch: B, indexes: &[usize], count: usize) -> Vec<B> {
    let mut buckets: Vec<Vec<B::Group>> = (0..count).map(|_| Vec::new()).collect();
    for (group, &idx) in batch.into_groups().into_iter().zip(indexes) {
        buckets[idx].push(group);
    }
    buckets.into_iter().map(B::from_groups).collect()
}

/// Split `batch` into one batch per distinct value of `attribute_key`
pub fn split<B: ResourceBatch>(batch: B, attribute_key: &str) -> Vec<B> {
    let (indexes, count) = group_indexes(&batch, attribute_key);
    split_by_indexes(batch, &indexes, count)
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Splits every batch by a resource attribute and forwards each part to `next`
pub struct BatchPerResourceAttr<C> {
    attribute_key: String,
    next: C,
}

impl<C> BatchPerResourceAttr<C> {
    pub fn new(attribute_key: impl Into<String>, next: C) -> Self {
        Self {
            attribute_key: attribute_key.into(),
            next,
        }
    }

    pub fn attribute_key(&self) -> &str {
        &self.attribute_key
    }
}

impl<B, C> Consumer<B> for BatchPerResourceAttr<C>
where
    B: ResourceBatch,
    C: Consumer<B>,
{
    /// Deliver each part in first-seen order; the first delivery error stops
    /// delivery and is returned as is.
    fn consume(&self, batch: B) -> Result<(), ConsumerError> {
        let (indexes, count) = group_indexes(&batch, &self.attribute_key);
        if count <= 1 {
            return self.next.consume(batch);
        }

        tracing::trace!(
            attribute_key = %self.attribute_key,
            batches = count,
            "Splitting batch by resource attribute"
        );
        for part in split_by_indexes(batch, &indexes, count) {
            self.next.consume(part)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "regroup_tests.rs"]
mod tests;
