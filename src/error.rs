//! Error types.
//!
//! Configuration problems are returned to the caller. Measurement problems
//! never leave the item that hit them: the lifecycle turns them into a
//! fallback height and an [`ErrorInfo`](crate::types::ErrorInfo) message.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("column count must be at least 1")]
    ZeroColumns,
    #[error("{field} must be finite and >= 0, got {value}")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("invalid configuration patch: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Why a single load attempt did not produce a usable height.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MeasureError {
    #[error("asset failed to load")]
    Failure,
    #[error("no result within {0:?}")]
    Timeout(Duration),
    #[error("measured height {0} is not usable")]
    HeightAnomaly(f32),
}
