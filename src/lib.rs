//! # spark-waterfall
//!
//! Reactive waterfall (masonry) layout engine for items whose height is only
//! known once their asset has rendered.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! fine-grained reactivity and a single-threaded tokio `LocalSet` for timers.
//!
//! ## Architecture
//!
//! Items are placed one at a time into the currently shortest column, in
//! index order, as their heights become known:
//! ```text
//! renderer report → Item Lifecycle → Reflow Coordinator → Column Allocator → placement signal
//! ```
//!
//! Failed or slow items never block the wall: every item resolves to a
//! height, measured or assumed, within its max-wait time.
//!
//! ## Modules
//!
//! - [`types`] - Core types (NodeRect, Placement, ItemRecord, ErrorInfo, etc.)
//! - [`config`] - Per-engine configuration and library-wide defaults
//! - [`schedule`] - Debounce and throttle
//! - [`item`] - Item lifecycle state machine, measurement adapter, item handles
//! - [`layout`] - Shortest-column allocator
//! - [`engine`] - The [`Waterfall`] reflow coordinator

pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod layout;
pub mod schedule;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use types::*;

pub use config::{
    ConfigPatch, WaterfallConfig, default_config, reset_default_config, set_default_config,
};

pub use error::{ConfigError, MeasureError};

pub use engine::{EventHandler, LoadHandler, Waterfall};

pub use item::{
    DEFAULT_MAX_WAIT, ItemCore, ItemOptions, ItemRegistry, Measure, RenderProps, WaterfallItem,
};

pub use layout::{ColumnHeights, ColumnSpacing, allocate};

pub use schedule::{
    DebounceOptions, Debounced, FRAME_INTERVAL, ThrottleOptions, Wait, debounce, throttle,
};
