//! Layout Module
//!
//! Column assignment for the waterfall.
//!
//! # Architecture
//!
//! The layout itself is stateless: [`ColumnHeights`] is the only running
//! state, and it is owned by the reflow coordinator. A full pass zeroes it and
//! replays every item; an incremental pass keeps it and appends.
//!
//! # Example
//!
//! ```ignore
//! use spark_waterfall::layout::{ColumnHeights, ColumnSpacing};
//!
//! let mut heights = ColumnHeights::new(2);
//! let spacing = ColumnSpacing { column_width: 160.0, column_gap: 16.0, row_gap: 16.0 };
//! let placement = heights.place(100.0, &spacing);
//! ```

mod allocator;

pub use allocator::*;
