//! Metric transform pipeline
//!
//! Rule-driven rewriting of OTLP metrics: rename, relabel, insert copies,
//! combine several metrics into one and group metrics under new resources.
//! Supports all 5 OTLP metric types: Gauge, Sum, Histogram, ExponentialHistogram, Summary.

mod aggregate;
pub mod combine;
pub mod error;
pub mod matcher;
pub mod operations;
pub mod pipeline;
pub mod points;
pub mod rule;

pub use error::CombineError;
pub use matcher::{MetricFilter, StringMatcher};
pub use operations::LabelOperation;
pub use pipeline::{MetricsTransformProcessor, TransformConsumer, TransformReport};
pub use rule::{AggregationType, SubmatchCase, TransformAction, TransformRule};
