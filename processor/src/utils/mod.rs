pub mod encoding;
pub mod otlp;
