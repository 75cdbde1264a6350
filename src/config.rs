//! Waterfall configuration.
//!
//! Every [`Waterfall`](crate::Waterfall) owns its own [`WaterfallConfig`].
//! The library-wide defaults below are only a starting point for new
//! engines; changing them never touches an engine that already exists.
//!
//! # Example
//!
//! ```ignore
//! use spark_waterfall::config::{ConfigPatch, set_default_config};
//!
//! // Embedding layer: three columns everywhere unless overridden
//! set_default_config(&ConfigPatch { columns: Some(3), ..ConfigPatch::default() })?;
//!
//! // Per-instance override from JSON (unknown keys are ignored)
//! let patch = ConfigPatch::from_json(r#"{"rowGap": 8, "theme": "dark"}"#)?;
//! ```

use std::cell::RefCell;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_COLUMNS: usize = 2;
pub const DEFAULT_COLUMN_GAP: f32 = 16.0;
pub const DEFAULT_ROW_GAP: f32 = 16.0;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_FALLBACK_HEIGHT: f32 = 200.0;

// =============================================================================
// Config
// =============================================================================

/// Layout and recovery settings for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallConfig {
    /// Number of columns (>= 1).
    pub columns: usize,
    /// Horizontal space between columns.
    pub column_gap: f32,
    /// Vertical space between items in the same column.
    pub row_gap: f32,
    /// Retry budget for the `retry` and `fallback` error modes.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    /// Height used when an item could not be measured.
    pub fallback_height: f32,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            column_gap: DEFAULT_COLUMN_GAP,
            row_gap: DEFAULT_ROW_GAP,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            fallback_height: DEFAULT_FALLBACK_HEIGHT,
        }
    }
}

impl WaterfallConfig {
    /// Check the invariants: at least one column, no negative sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns == 0 {
            return Err(ConfigError::ZeroColumns);
        }
        for (field, value) in [
            ("columnGap", self.column_gap),
            ("rowGap", self.row_gap),
            ("fallbackHeight", self.fallback_height),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        Ok(())
    }

    /// Apply `patch` on top of this config and validate the result.
    ///
    /// Fields missing from the patch keep their current value.
    pub fn merged(&self, patch: &ConfigPatch) -> Result<WaterfallConfig, ConfigError> {
        let merged = WaterfallConfig {
            columns: patch.columns.unwrap_or(self.columns),
            column_gap: patch.column_gap.unwrap_or(self.column_gap),
            row_gap: patch.row_gap.unwrap_or(self.row_gap),
            max_retries: patch.max_retries.unwrap_or(self.max_retries),
            retry_delay: patch.retry_delay.unwrap_or(self.retry_delay),
            fallback_height: patch.fallback_height.unwrap_or(self.fallback_height),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Width of a single column inside a container of `container_width`.
    ///
    /// Never negative: a container narrower than its gaps yields 0.
    pub fn column_width(&self, container_width: f32) -> f32 {
        let columns = self.columns.max(1) as f32;
        let gaps = self.column_gap * (columns - 1.0);
        ((container_width - gaps) / columns).max(0.0)
    }
}

/// Partial configuration. `None` fields are left untouched by a merge.
///
/// Deserializes from camelCase JSON and ignores keys it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub columns: Option<usize>,
    pub column_gap: Option<f32>,
    pub row_gap: Option<f32>,
    pub max_retries: Option<u32>,
    #[serde(with = "millis::option")]
    pub retry_delay: Option<Duration>,
    pub fallback_height: Option<f32>,
}

impl ConfigPatch {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }
}

// =============================================================================
// Library-wide Defaults
// =============================================================================

thread_local! {
    /// Defaults handed to engines created on this thread.
    static DEFAULT_CONFIG: RefCell<WaterfallConfig> = RefCell::new(WaterfallConfig::default());
}

/// Get the current library-wide defaults.
pub fn default_config() -> WaterfallConfig {
    DEFAULT_CONFIG.with(|config| *config.borrow())
}

/// Merge `patch` into the library-wide defaults.
///
/// Only affects engines created afterwards. On error the defaults are
/// left unchanged.
pub fn set_default_config(patch: &ConfigPatch) -> Result<(), ConfigError> {
    DEFAULT_CONFIG.with(|config| {
        let merged = config.borrow().merged(patch)?;
        *config.borrow_mut() = merged;
        Ok(())
    })
}

/// Restore the built-in defaults.
pub fn reset_default_config() {
    DEFAULT_CONFIG.with(|config| *config.borrow_mut() = WaterfallConfig::default());
}

// =============================================================================
// Duration <-> milliseconds
// =============================================================================

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
