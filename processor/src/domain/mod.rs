//! Domain logic for OTLP batch reshaping
//!
//! - `metrics` - rule-driven metric transform pipeline
//! - `regroup` - batch splitting by resource attribute

pub mod metrics;
pub mod regroup;

pub use metrics::{MetricsTransformProcessor, TransformConsumer};
pub use regroup::{BatchPerResourceAttr, ResourceBatch};
