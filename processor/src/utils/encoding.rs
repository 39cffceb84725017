//! OTLP file encoding and decoding
//!
//! Supports protobuf (`.pb`) and JSON exports. JSON input is either a single
//! export request or one request per line.

use std::fmt;
use std::path::Path;

use prost::Message;
use serde::Deserialize;

/// Encoding of an OTLP export file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpEncoding {
    Protobuf,
    Json,
}

impl OtlpEncoding {
    /// Protobuf for `.pb` files, JSON otherwise
    #[inline]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pb") => OtlpEncoding::Protobuf,
            _ => OtlpEncoding::Json,
        }
    }
}

/// Decode every export request contained in `body`
pub fn decode_batches<T>(body: &[u8], encoding: OtlpEncoding) -> Result<Vec<T>, DecodeError>
where
    T: Message + Default + for<'de> Deserialize<'de>,
{
    match encoding {
        OtlpEncoding::Protobuf => T::decode(body)
            .map(|batch| vec![batch])
            .map_err(|e| DecodeError::Protobuf(e.to_string())),
        OtlpEncoding::Json => {
            if let Ok(batch) = serde_json::from_slice::<T>(body) {
                return Ok(vec![batch]);
            }
            decode_json_lines(body)
        }
    }
}

fn decode_json_lines<T>(body: &[u8]) -> Result<Vec<T>, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    body.split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.trim_ascii().is_empty())
        .map(|(idx, line)| {
            serde_json::from_slice(line).map_err(|e| DecodeError::Json {
                line: idx + 1,
                error: e.to_string(),
            })
        })
        .collect()
}

/// Error returned when decoding fails
#[derive(Debug)]
pub enum DecodeError {
    Protobuf(String),
    Json { line: usize, error: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Protobuf(e) => write!(f, "protobuf decode error: {}", e),
            DecodeError::Json { line, error } => {
                write!(f, "JSON decode error on line {}: {}", line, error)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
