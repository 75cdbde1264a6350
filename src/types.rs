//! Core types shared by the engine, the items and the embedding layer.
//!
//! Everything here is plain data: geometry returned by the measurement
//! adapter, placements produced by the column allocator, the per-item record
//! and the error/status vocabulary exposed to the renderer.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Geometry
// =============================================================================

/// Bounding rectangle of a rendered node, as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeRect {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

impl NodeRect {
    /// Rect with the given size anchored at the origin.
    pub fn sized(width: f32, height: f32) -> Self {
        Self {
            left: 0.0,
            right: width,
            top: 0.0,
            bottom: height,
            width,
            height,
        }
    }
}

/// Opaque handle to a rendered element.
///
/// The engine never looks inside; it only hands it back to the
/// [`Measure`](crate::item::Measure) adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(Rc<str>);

impl ElementRef {
    pub fn new(selector: impl Into<Rc<str>>) -> Self {
        Self(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the column allocator put an item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Placement {
    /// Column index (0-based).
    pub column: usize,
    /// Offset from the top of the container.
    pub top: f32,
    /// Offset from the left of the container.
    pub left: f32,
}

// =============================================================================
// Item Record
// =============================================================================

bitflags::bitflags! {
    /// Per-item state bits.
    ///
    /// Combine with bitwise OR: `ItemFlags::LOADED | ItemFlags::LOAD_SUCCESS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ItemFlags: u8 {
        const NONE = 0;
        /// Loading finished, successfully or not.
        const LOADED = 1 << 0;
        /// Height came from a real measurement of the asset.
        const LOAD_SUCCESS = 1 << 1;
        /// Item has been shown at least once.
        const VISIBLE = 1 << 2;
        /// Placed in the current layout generation.
        const INSERTED = 1 << 3;
        /// Height is a substitute (fallback, timeout or placeholder).
        const HEIGHT_ERROR = 1 << 4;
    }
}

/// Snapshot of an item's layout state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ItemRecord {
    pub flags: ItemFlags,
    pub height: f32,
    pub top: f32,
    pub left: f32,
    pub index: usize,
    pub retry_count: u32,
}

impl ItemRecord {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn loaded(&self) -> bool {
        self.flags.contains(ItemFlags::LOADED)
    }

    pub fn load_success(&self) -> bool {
        self.flags.contains(ItemFlags::LOAD_SUCCESS)
    }

    pub fn visible(&self) -> bool {
        self.flags.contains(ItemFlags::VISIBLE)
    }

    pub fn is_inserted(&self) -> bool {
        self.flags.contains(ItemFlags::INSERTED)
    }

    pub fn height_error(&self) -> bool {
        self.flags.contains(ItemFlags::HEIGHT_ERROR)
    }
}

// =============================================================================
// Error Handling Vocabulary
// =============================================================================

/// How an item reacts to a failed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Give up on the first failure and use the fallback height.
    #[default]
    None,
    /// Show the placeholder asset on the first failure, never retry.
    Placeholder,
    /// Retry up to the retry budget, then use the fallback height.
    Retry,
    /// Retry, then placeholder, then fallback height.
    Fallback,
}

/// Status shown to the renderer for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStatus {
    #[default]
    None,
    /// The asset failed (a retry may be pending).
    Fail,
    /// The placeholder asset loaded.
    PlaceholderOk,
    /// The max-wait timer fired before the item resolved.
    Timeout,
    /// Every recovery option is exhausted.
    Final,
}

impl ErrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::None => "none",
            ErrorStatus::Fail => "fail",
            ErrorStatus::PlaceholderOk => "phok",
            ErrorStatus::Timeout => "timeout",
            ErrorStatus::Final => "final",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic state for the current attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorInfo {
    pub status: ErrorStatus,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(status: ErrorStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Cleanup function returned by handler registrations. Call to unsubscribe.
pub type Cleanup = Box<dyn FnOnce()>;

/// Signals emitted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaterfallEvent {
    /// A pass started working on a non-empty queue.
    LoadStart,
    /// The queue drained and the pass finished.
    LoadEnd,
    /// An item scheduled another load attempt.
    Retry { index: usize, retry_count: u32 },
    /// An item became visible or hidden.
    VisibilityChanged { index: usize, visible: bool },
}
