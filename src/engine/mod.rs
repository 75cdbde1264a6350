//! Waterfall Engine - item table, event handlers and the reflow coordinator.
//!
//! - Registry: live items keyed by index, weakly held
//! - Events: handler registry for [`WaterfallEvent`](crate::types::WaterfallEvent)s and load callbacks
//! - Coordinator: [`Waterfall`], the engine itself
//!
//! # Architecture
//!
//! ```text
//! renderer ──loaded()──▶ WaterfallItem ──on_item_load──▶ Waterfall ──debounce(frame)──▶ pass
//!                                                             │
//!                    placement signal ◀── ColumnHeights::place ◀┘ (index order)
//! ```
//!
//! At most one pass runs at a time. Incremental requests are absorbed by the
//! running pass; full requests interrupt it and run next.

mod coordinator;
mod events;
mod registry;

pub use coordinator::*;
pub use events::*;
