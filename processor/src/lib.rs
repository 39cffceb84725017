//! OTLP batch reshaping
//!
//! Splits telemetry batches per resource attribute value and rewrites
//! metrics through an ordered list of transform rules.

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
