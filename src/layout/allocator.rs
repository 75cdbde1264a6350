//! Column Allocator
//!
//! Greedy shortest-column placement.
//!
//! # Algorithm
//!
//! 1. Pick the column with the smallest running height (lowest index on ties)
//! 2. `left = column * (column_width + column_gap)`
//! 3. `top = height[column]`, plus `row_gap` if the column already holds an item
//! 4. `height[column] = top + item_height`
//!
//! [`allocate`] is the pure form: snapshot in, placement and new snapshot
//! out. Passes use [`ColumnHeights::place`], which does the same in place.

use crate::types::Placement;

/// Horizontal and vertical spacing for one layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColumnSpacing {
    pub column_width: f32,
    pub column_gap: f32,
    pub row_gap: f32,
}

/// Running height and item count of every column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnHeights {
    heights: Vec<f32>,
    counts: Vec<usize>,
}

impl ColumnHeights {
    /// Zeroed heights for `columns` columns (at least one).
    pub fn new(columns: usize) -> Self {
        let columns = columns.max(1);
        Self {
            heights: vec![0.0; columns],
            counts: vec![0; columns],
        }
    }

    /// Zero every column, resizing to `columns` if needed.
    pub fn reset(&mut self, columns: usize) {
        *self = Self::new(columns);
    }

    pub fn columns(&self) -> usize {
        self.heights.len()
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn height(&self, column: usize) -> f32 {
        self.heights.get(column).copied().unwrap_or(0.0)
    }

    /// Number of items placed in `column`.
    pub fn count(&self, column: usize) -> usize {
        self.counts.get(column).copied().unwrap_or(0)
    }

    /// Total number of placed items.
    pub fn placed(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Height of the tallest column (the content height).
    pub fn max_height(&self) -> f32 {
        self.heights.iter().copied().fold(0.0, f32::max)
    }

    /// Index of the shortest column, lowest index on ties.
    pub fn shortest(&self) -> usize {
        let mut index = 0;
        let mut best = self.heights.first().copied().unwrap_or(0.0);
        for (i, height) in self.heights.iter().enumerate().skip(1) {
            if *height < best {
                best = *height;
                index = i;
            }
        }
        index
    }

    /// Record `placement` for an item of `item_height`.
    pub fn commit(&mut self, placement: Placement, item_height: f32) {
        let Some(height) = self.heights.get_mut(placement.column) else {
            return;
        };
        *height = placement.top + sanitize(item_height);
        self.counts[placement.column] += 1;
    }

    /// Where the next item goes (steps 1-3).
    pub fn next_placement(&self, spacing: &ColumnSpacing) -> Placement {
        let column = self.shortest();
        let gap = if self.count(column) > 0 {
            spacing.row_gap
        } else {
            0.0
        };

        Placement {
            column,
            top: self.height(column) + gap,
            left: column as f32 * (spacing.column_width + spacing.column_gap),
        }
    }

    /// Place an item of `item_height` and update the running heights.
    pub fn place(&mut self, item_height: f32, spacing: &ColumnSpacing) -> Placement {
        let placement = self.next_placement(spacing);
        self.commit(placement, item_height);
        placement
    }
}

/// Placement for an item of `item_height`, plus the heights after placing it.
pub fn allocate(
    heights: &ColumnHeights,
    item_height: f32,
    spacing: &ColumnSpacing,
) -> (Placement, ColumnHeights) {
    let mut next = heights.clone();
    let placement = next.place(item_height, spacing);
    (placement, next)
}

/// Negative and non-finite heights contribute nothing.
fn sanitize(height: f32) -> f32 {
    if height.is_finite() { height.max(0.0) } else { 0.0 }
}
