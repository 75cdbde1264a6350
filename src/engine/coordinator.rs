//! Reflow Coordinator - the waterfall engine.
//!
//! A [`Waterfall`] owns the configuration, the column heights and a weak
//! table of items. Items report in; the engine decides when and how much to
//! lay out.
//!
//! # Passes
//!
//! - **Incremental**: place every item not yet placed, lowest index first
//! - **Full**: re-measure, zero the columns, place every item again
//!
//! A pass places strictly in index order. When the next item has not
//! resolved yet, the pass waits for it; items that resolve early stay
//! buffered until their turn. Requests are coalesced on the next frame.
//! While a pass runs, incremental requests are absorbed by it and full
//! requests interrupt it and run next.
//!
//! # Example
//!
//! ```ignore
//! let waterfall = Waterfall::new(&ConfigPatch::default(), Rc::new(DomMeasure))?;
//! waterfall.mount(ElementRef::new("#wall")).await;
//!
//! let cleanup = waterfall.on_load(|| println!("all placed"));
//! let card = waterfall.add_item(ItemOptions::new(0, ElementRef::new("#card-0")));
//! card.loaded();
//! waterfall.settled().await;
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::future;
use log::{debug, trace, warn};
use spark_signals::{Signal, signal};
use tokio::sync::Notify;

use crate::config::{ConfigPatch, WaterfallConfig, default_config};
use crate::error::ConfigError;
use crate::item::{DEFAULT_MAX_WAIT, ItemCore, ItemOptions, ItemRegistry, Measure, WaterfallItem};
use crate::layout::{ColumnHeights, ColumnSpacing};
use crate::schedule::{DebounceOptions, Debounced, Wait, debounce};
use crate::types::{Cleanup, ElementRef, WaterfallEvent};

use super::events::EventHandlers;
use super::registry::ItemTable;

/// Kind of layout pass. A full request outranks an incremental one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PassKind {
    Incremental,
    Full,
}

enum PassOutcome {
    Drained,
    Interrupted,
}

// =============================================================================
// Engine State
// =============================================================================

struct WaterfallInner {
    self_ref: Weak<WaterfallInner>,
    config: Cell<WaterfallConfig>,
    container_width: Cell<f32>,
    measurer: Rc<dyn Measure>,
    heights: RefCell<ColumnHeights>,
    items: RefCell<ItemTable>,
    handlers: EventHandlers,

    column_width: Signal<f32>,
    is_reflowing: Signal<bool>,
    is_layout_interrupted: Signal<bool>,
    content_height: Signal<f32>,

    /// Woken when an item resolves, arrives or leaves, or on interruption.
    item_changed: Notify,
    /// Woken when a batch of passes ends.
    pass_done: Notify,
    requested: Cell<Option<PassKind>>,
    running: Cell<bool>,
    scheduler: Debounced<(), ()>,
    torn_down: Cell<bool>,
}

impl WaterfallInner {
    fn request(&self, kind: PassKind) {
        if self.torn_down.get() {
            return;
        }

        if self.running.get() {
            // The running pass re-scans for pending items on every wake-up
            if kind == PassKind::Full {
                self.requested.set(self.requested.get().max(Some(kind)));
                self.is_layout_interrupted.set(true);
            }
            self.item_changed.notify_waiters();
            return;
        }

        self.requested.set(self.requested.get().max(Some(kind)));
        self.scheduler.call(());
    }

    fn start_passes(&self) {
        if self.torn_down.get() {
            self.requested.set(None);
            return;
        }
        if self.running.get() || self.requested.get().is_none() {
            return;
        }
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };

        self.running.set(true);
        tokio::task::spawn_local(inner.run_passes());
    }

    async fn run_passes(self: Rc<Self>) {
        self.is_reflowing.set(true);
        let mut started = false;

        while let Some(kind) = self.requested.take() {
            if !started && self.has_work(kind) {
                started = true;
                self.handlers.emit(WaterfallEvent::LoadStart);
            }

            debug!("{kind:?} pass starting, {} items", self.items.borrow().len());
            match self.run_pass(kind).await {
                PassOutcome::Drained => {
                    debug!("{kind:?} pass drained, content height {}", self.content_height.get())
                }
                PassOutcome::Interrupted => debug!("{kind:?} pass interrupted"),
            }
        }

        self.running.set(false);
        self.is_layout_interrupted.set(false);
        self.is_reflowing.set(false);

        if !self.torn_down.get() {
            if started {
                self.handlers.emit(WaterfallEvent::LoadEnd);
            }
            self.handlers.fire_load();
        }
        self.pass_done.notify_waiters();
    }

    async fn run_pass(&self, kind: PassKind) -> PassOutcome {
        self.is_layout_interrupted.set(false);

        if kind == PassKind::Full {
            // Re-measured together; any interruption drops the whole batch
            let items = self.items.borrow_mut().live();
            let remeasure = future::join_all(items.iter().map(|item| item.update_height()));
            tokio::select! {
                _ = remeasure => {}
                _ = self.interruption() => return PassOutcome::Interrupted,
            }
            if self.interrupted() {
                return PassOutcome::Interrupted;
            }

            self.heights.borrow_mut().reset(self.config.get().columns);
            for item in &items {
                item.clear_inserted();
            }
            self.content_height.set(0.0);
        }

        loop {
            if self.interrupted() {
                return PassOutcome::Interrupted;
            }

            // Registered before the check so no wake-up is missed
            let changed = self.item_changed.notified();
            let next = self.items.borrow_mut().next_pending();
            let Some(item) = next else {
                return PassOutcome::Drained;
            };

            if item.is_resolved() {
                self.place(&item);
            } else {
                trace!("waiting for item {}", item.index());
                changed.await;
            }
        }
    }

    fn place(&self, item: &ItemCore) {
        let config = self.config.get();
        let column_width = self.column_width.get();
        let height = item
            .layout_height(column_width)
            .unwrap_or(config.fallback_height);
        let spacing = ColumnSpacing {
            column_width,
            column_gap: config.column_gap,
            row_gap: config.row_gap,
        };

        let placement = self.heights.borrow_mut().place(height, &spacing);
        trace!(
            "item {} -> column {} at ({}, {}), height {height}",
            item.index(),
            placement.column,
            placement.left,
            placement.top
        );

        let became_visible = item.set_placement(placement, height);
        let content_height = self.heights.borrow().max_height();
        self.content_height.set(content_height);

        if became_visible {
            self.handlers.emit(WaterfallEvent::VisibilityChanged {
                index: item.index(),
                visible: true,
            });
        }
    }

    fn has_work(&self, kind: PassKind) -> bool {
        let mut items = self.items.borrow_mut();
        match kind {
            PassKind::Full => !items.live().is_empty(),
            PassKind::Incremental => items.next_pending().is_some(),
        }
    }

    fn interrupted(&self) -> bool {
        self.torn_down.get() || self.is_layout_interrupted.get()
    }

    /// Resolves once the running pass is interrupted or the engine torn down.
    async fn interruption(&self) {
        loop {
            let changed = self.item_changed.notified();
            if self.interrupted() {
                return;
            }
            changed.await;
        }
    }

    fn is_idle(&self) -> bool {
        !self.running.get() && (self.requested.get().is_none() || self.torn_down.get())
    }

    /// Recompute the column width. Returns true if it changed.
    fn update_column_width(&self) -> bool {
        let width = self
            .config
            .get()
            .column_width(self.container_width.get());
        if width == self.column_width.get() {
            return false;
        }
        self.column_width.set(width);
        true
    }
}

impl ItemRegistry for WaterfallInner {
    fn add_item(&self, item: &Rc<ItemCore>) {
        let out_of_order = {
            let mut items = self.items.borrow_mut();
            items.insert(item);
            items.has_placed_after(item.index())
        };

        debug!("item {} registered", item.index());
        self.request(if out_of_order {
            PassKind::Full
        } else {
            PassKind::Incremental
        });
    }

    fn remove_item(&self, item: &ItemCore) {
        if !self.items.borrow_mut().remove(item) {
            return;
        }

        debug!("item {} removed", item.index());
        if item.record().is_inserted() {
            self.request(PassKind::Full);
        } else {
            self.item_changed.notify_waiters();
        }
    }

    fn on_item_load(&self, item: &ItemCore) {
        trace!("item {} resolved", item.index());
        self.request(PassKind::Incremental);
    }

    fn on_item_retry(&self, item: &ItemCore, retry_count: u32) {
        self.handlers.emit(WaterfallEvent::Retry {
            index: item.index(),
            retry_count,
        });
    }

    fn on_item_reset(&self, item: &ItemCore, was_visible: bool) {
        if was_visible {
            self.handlers.emit(WaterfallEvent::VisibilityChanged {
                index: item.index(),
                visible: false,
            });
        }
        self.request(PassKind::Full);
    }

    fn column_width(&self) -> f32 {
        self.column_width.get()
    }

    fn is_reflowing(&self) -> bool {
        self.is_reflowing.get()
    }

    fn is_layout_interrupted(&self) -> bool {
        self.is_layout_interrupted.get()
    }

    fn config(&self) -> WaterfallConfig {
        self.config.get()
    }

    fn measurer(&self) -> Rc<dyn Measure> {
        self.measurer.clone()
    }
}

// =============================================================================
// Waterfall
// =============================================================================

/// Handle to a waterfall engine. Clones share the same engine.
///
/// Must be used inside a `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct Waterfall {
    inner: Rc<WaterfallInner>,
}

impl Waterfall {
    /// Create an engine with `patch` applied over the library-wide defaults.
    pub fn new(patch: &ConfigPatch, measurer: Rc<dyn Measure>) -> Result<Self, ConfigError> {
        let config = default_config().merged(patch)?;

        let inner = Rc::new_cyclic(|weak: &Weak<WaterfallInner>| {
            let scheduled = weak.clone();
            let scheduler = debounce(
                move |()| {
                    if let Some(inner) = scheduled.upgrade() {
                        inner.start_passes();
                    }
                },
                Wait::Frame,
                DebounceOptions::default(),
            );

            WaterfallInner {
                self_ref: weak.clone(),
                config: Cell::new(config),
                container_width: Cell::new(0.0),
                measurer,
                heights: RefCell::new(ColumnHeights::new(config.columns)),
                items: RefCell::new(ItemTable::default()),
                handlers: EventHandlers::default(),
                column_width: signal(0.0),
                is_reflowing: signal(false),
                is_layout_interrupted: signal(false),
                content_height: signal(0.0),
                item_changed: Notify::new(),
                pass_done: Notify::new(),
                requested: Cell::new(None),
                running: Cell::new(false),
                scheduler,
                torn_down: Cell::new(false),
            }
        });

        debug!("waterfall created: {config:?}");
        Ok(Self { inner })
    }

    // -------------------------------------------------------------------------
    // Configuration & Container
    // -------------------------------------------------------------------------

    pub fn config(&self) -> WaterfallConfig {
        self.inner.config.get()
    }

    /// Merge `patch` into this engine's config.
    ///
    /// Any change interrupts the running pass and requests a full one. An
    /// invalid patch leaves the config untouched.
    pub fn set_config(&self, patch: &ConfigPatch) -> Result<(), ConfigError> {
        let current = self.inner.config.get();
        let next = current.merged(patch)?;
        if next == current {
            return Ok(());
        }

        debug!("config changed: {next:?}");
        self.inner.config.set(next);
        self.inner.update_column_width();
        self.inner.request(PassKind::Full);
        Ok(())
    }

    pub fn container_width(&self) -> f32 {
        self.inner.container_width.get()
    }

    /// Set the container width. A new column width requests a full pass.
    pub fn set_container_width(&self, width: f32) {
        let width = if width.is_finite() { width.max(0.0) } else { 0.0 };
        if width == self.inner.container_width.get() {
            return;
        }

        self.inner.container_width.set(width);
        if self.inner.update_column_width() {
            debug!("column width now {}", self.inner.column_width.get());
            self.inner.request(PassKind::Full);
        }
    }

    /// Measure `container` and size the columns to it.
    pub async fn mount(&self, container: ElementRef) {
        let measure = self.inner.measurer.measure(&container);
        match tokio::time::timeout(DEFAULT_MAX_WAIT, measure).await {
            Ok(rect) => self.set_container_width(rect.width),
            Err(_) => warn!("container {container} not measured within {DEFAULT_MAX_WAIT:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // Items & Passes
    // -------------------------------------------------------------------------

    pub fn add_item(&self, options: ItemOptions) -> WaterfallItem {
        WaterfallItem::new(self.inner.clone(), options)
    }

    /// Place items that are not placed yet.
    pub fn reflow(&self) {
        self.inner.request(PassKind::Incremental);
    }

    /// Re-measure and re-place every item.
    pub fn full_reflow(&self) {
        self.inner.request(PassKind::Full);
    }

    /// Replace every item with a new set and lay it out from scratch.
    ///
    /// The old items are detached: their timers stop and their reports are
    /// ignored.
    pub fn refresh_reflow(&self, items: impl IntoIterator<Item = ItemOptions>) -> Vec<WaterfallItem> {
        let old = self.inner.items.borrow_mut().drain();
        debug!("refresh: discarding {} items", old.len());
        for item in &old {
            item.detach();
        }

        let columns = self.inner.config.get().columns;
        self.inner.heights.borrow_mut().reset(columns);
        self.inner.content_height.set(0.0);

        let items = items.into_iter().map(|options| self.add_item(options)).collect();
        self.inner.request(PassKind::Full);
        items
    }

    /// Resolves once no pass is running or scheduled.
    pub async fn settled(&self) {
        loop {
            let done = self.inner.pass_done.notified();
            if self.inner.is_idle() {
                return;
            }
            done.await;
        }
    }

    /// Stop laying out: interrupt the running pass, drop scheduled ones and
    /// detach every item.
    pub fn teardown(&self) {
        let inner = &self.inner;
        if inner.torn_down.replace(true) {
            return;
        }

        debug!("teardown");
        inner.scheduler.cancel();
        inner.requested.set(None);
        if inner.running.get() {
            inner.is_layout_interrupted.set(true);
        }

        let items = inner.items.borrow_mut().drain();
        for item in &items {
            item.detach();
        }
        inner.handlers.clear();
        inner.item_changed.notify_waiters();
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn on_event<F>(&self, handler: F) -> Cleanup
    where
        F: Fn(&WaterfallEvent) + 'static,
    {
        self.inner.handlers.on_event(handler)
    }

    /// Run `handler` every time a pass drains its queue.
    pub fn on_load<F>(&self, handler: F) -> Cleanup
    where
        F: Fn() + 'static,
    {
        self.inner.handlers.on_load(handler)
    }

    /// Run `handler` once, the next time a pass drains its queue.
    pub fn load_done<F>(&self, handler: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.handlers.load_done(handler);
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn is_reflowing(&self) -> bool {
        self.inner.is_reflowing.get()
    }

    pub fn is_reflowing_signal(&self) -> Signal<bool> {
        self.inner.is_reflowing.clone()
    }

    pub fn is_layout_interrupted(&self) -> bool {
        self.inner.is_layout_interrupted.get()
    }

    pub fn is_layout_interrupted_signal(&self) -> Signal<bool> {
        self.inner.is_layout_interrupted.clone()
    }

    pub fn column_width(&self) -> f32 {
        self.inner.column_width.get()
    }

    pub fn column_width_signal(&self) -> Signal<f32> {
        self.inner.column_width.clone()
    }

    pub fn content_height(&self) -> f32 {
        self.inner.content_height.get()
    }

    pub fn content_height_signal(&self) -> Signal<f32> {
        self.inner.content_height.clone()
    }

    /// Running height of every column.
    pub fn column_heights(&self) -> Vec<f32> {
        self.inner.heights.borrow().heights().to_vec()
    }

    /// Number of live registered items.
    pub fn item_count(&self) -> usize {
        self.inner.items.borrow_mut().live().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeMeasure, run_local};
    use crate::types::{ErrorMode, ErrorStatus, NodeRect, Placement};
    use spark_signals::effect;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    fn engine(measure: &Rc<FakeMeasure>) -> Waterfall {
        let waterfall = Waterfall::new(&ConfigPatch::default(), measure.clone()).unwrap();
        waterfall.set_container_width(336.0);
        waterfall
    }

    fn options(index: usize) -> ItemOptions {
        ItemOptions::new(index, ElementRef::new(format!("#item-{index}")))
    }

    fn add(waterfall: &Waterfall, measure: &FakeMeasure, index: usize, height: f32) -> WaterfallItem {
        measure.set(&format!("#item-{index}"), height);
        waterfall.add_item(options(index))
    }

    fn add_all(waterfall: &Waterfall, measure: &FakeMeasure, heights: &[f32]) -> Vec<WaterfallItem> {
        heights
            .iter()
            .enumerate()
            .map(|(index, height)| add(waterfall, measure, index, *height))
            .collect()
    }

    fn positions(items: &[WaterfallItem]) -> Vec<(f32, f32)> {
        items
            .iter()
            .map(|item| {
                let record = item.record();
                (record.top, record.left)
            })
            .collect()
    }

    const SCENARIO: [(f32, f32); 4] = [(0.0, 0.0), (0.0, 176.0), (116.0, 0.0), (166.0, 176.0)];

    #[test]
    fn test_two_column_scenario() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            assert_eq!(waterfall.column_width(), 160.0);

            let items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;

            assert_eq!(positions(&items), SCENARIO);
            assert_eq!(waterfall.column_heights(), vec![196.0, 286.0]);
            assert_eq!(waterfall.content_height(), 286.0);
            assert!(items.iter().all(|item| item.record().visible()));
            assert_eq!(
                items[3].placement().get(),
                Some(Placement { column: 1, top: 166.0, left: 176.0 })
            );
            assert!(!waterfall.is_reflowing());
        });
    }

    #[test]
    fn test_out_of_order_resolution_places_in_index_order() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0]);

            for index in [3, 2, 1] {
                items[index].loaded();
            }
            sleep(Duration::from_millis(100)).await;

            // Resolved but buffered behind item 0
            assert!(waterfall.is_reflowing());
            assert!(items[1].is_resolved());
            assert!(items.iter().all(|item| !item.record().is_inserted()));

            items[0].loaded();
            waterfall.settled().await;
            assert_eq!(positions(&items), SCENARIO);
        });
    }

    #[test]
    fn test_incremental_matches_full() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let heights = [120.0, 40.0, 300.0, 75.0, 75.0, 10.0];

            let mut items = add_all(&waterfall, &measure, &heights[..4]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;

            for index in 4..6 {
                let item = add(&waterfall, &measure, index, heights[index]);
                item.loaded();
                items.push(item);
            }
            waterfall.settled().await;

            let incremental = positions(&items);
            let incremental_heights = waterfall.column_heights();

            waterfall.full_reflow();
            waterfall.settled().await;

            assert_eq!(positions(&items), incremental);
            assert_eq!(waterfall.column_heights(), incremental_heights);
        });
    }

    #[test]
    fn test_late_lower_index_triggers_full_pass() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let second = add(&waterfall, &measure, 1, 100.0);
            let third = add(&waterfall, &measure, 2, 50.0);
            second.loaded();
            third.loaded();
            waterfall.settled().await;
            assert_eq!((third.record().top, third.record().left), (0.0, 176.0));

            let first = add(&waterfall, &measure, 0, 30.0);
            first.loaded();
            waterfall.settled().await;

            assert_eq!((first.record().top, first.record().left), (0.0, 0.0));
            assert_eq!((second.record().top, second.record().left), (0.0, 176.0));
            assert_eq!((third.record().top, third.record().left), (46.0, 0.0));
            assert_eq!(waterfall.column_heights(), vec![96.0, 100.0]);
        });
    }

    #[test]
    fn test_refresh_reflow_discards_old_items() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let old = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0]);
            for item in &old {
                item.loaded();
            }
            waterfall.settled().await;

            measure.set("#new-0", 50.0);
            measure.set("#new-1", 60.0);
            let fresh = waterfall.refresh_reflow([
                ItemOptions::new(0, ElementRef::new("#new-0")),
                ItemOptions::new(1, ElementRef::new("#new-1")),
            ]);
            for item in &fresh {
                item.loaded();
            }
            waterfall.settled().await;

            assert_eq!(waterfall.item_count(), 2);
            assert_eq!(waterfall.column_heights(), vec![50.0, 60.0]);

            // Old handles no longer affect the layout
            old[0].refresh_image();
            drop(old);
            waterfall.settled().await;
            assert_eq!(waterfall.column_heights(), vec![50.0, 60.0]);
            assert_eq!(waterfall.content_height(), 60.0);
        });
    }

    #[test]
    fn test_removing_placed_item_reflows() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let mut items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;

            drop(items.remove(1));
            waterfall.settled().await;

            assert_eq!(positions(&items), vec![(0.0, 0.0), (0.0, 176.0), (96.0, 176.0)]);
            assert_eq!(waterfall.column_heights(), vec![100.0, 216.0]);
            assert_eq!(waterfall.item_count(), 3);
        });
    }

    #[test]
    fn test_set_config_interrupts_and_relayouts() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0]);
            items[0].loaded();
            items[2].loaded();
            sleep(Duration::from_millis(50)).await;

            // Item 0 placed, pass waiting on item 1
            assert!(items[0].record().is_inserted());
            assert!(waterfall.is_reflowing());

            waterfall
                .set_config(&ConfigPatch {
                    columns: Some(3),
                    ..ConfigPatch::default()
                })
                .unwrap();
            assert!(waterfall.is_layout_interrupted());

            items[1].loaded();
            waterfall.settled().await;

            assert!(!waterfall.is_layout_interrupted());
            assert_eq!(waterfall.column_heights(), vec![100.0, 150.0, 80.0]);
            let column_width = waterfall.column_width();
            assert_eq!(column_width, (336.0 - 32.0) / 3.0);
            assert_eq!(items[2].record().left, 2.0 * (column_width + 16.0));
        });
    }

    #[test]
    fn test_invalid_config() {
        run_local(async {
            let measure = FakeMeasure::new();
            let zero = ConfigPatch {
                columns: Some(0),
                ..ConfigPatch::default()
            };
            assert!(matches!(
                Waterfall::new(&zero, measure.clone()),
                Err(ConfigError::ZeroColumns)
            ));

            let waterfall = engine(&measure);
            assert_eq!(waterfall.set_config(&zero), Err(ConfigError::ZeroColumns));
            assert_eq!(waterfall.config().columns, 2);
        });
    }

    #[test]
    fn test_load_events_once_per_drain() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let events = Rc::new(RefCell::new(Vec::new()));
            let log = events.clone();
            let _cleanup = waterfall.on_event(move |event| log.borrow_mut().push(*event));

            let every = Rc::new(Cell::new(0));
            let count = every.clone();
            let _on_load = waterfall.on_load(move || count.set(count.get() + 1));
            let once = Rc::new(Cell::new(0));
            let count = once.clone();
            waterfall.load_done(move || count.set(count.get() + 1));

            let items = add_all(&waterfall, &measure, &[100.0, 150.0]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;

            assert_eq!(
                *events.borrow(),
                vec![
                    WaterfallEvent::LoadStart,
                    WaterfallEvent::VisibilityChanged { index: 0, visible: true },
                    WaterfallEvent::VisibilityChanged { index: 1, visible: true },
                    WaterfallEvent::LoadEnd,
                ]
            );
            assert_eq!((every.get(), once.get()), (1, 1));

            waterfall.full_reflow();
            waterfall.settled().await;

            assert_eq!(events.borrow().len(), 6);
            assert_eq!(events.borrow()[5], WaterfallEvent::LoadEnd);
            assert_eq!((every.get(), once.get()), (2, 1));
        });
    }

    #[test]
    fn test_retry_events_and_fallback_height() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let retries = Rc::new(RefCell::new(Vec::new()));
            let log = retries.clone();
            let _cleanup = waterfall.on_event(move |event| {
                if let WaterfallEvent::Retry { index, retry_count } = event {
                    log.borrow_mut().push((*index, *retry_count));
                }
            });

            let item = waterfall.add_item(options(0).mode(ErrorMode::Retry).retries(2));
            item.failed();
            sleep(Duration::from_millis(1100)).await;
            item.failed();
            sleep(Duration::from_millis(1100)).await;
            item.failed();
            waterfall.settled().await;

            assert_eq!(*retries.borrow(), vec![(0, 1), (0, 2)]);
            let record = item.record();
            assert_eq!(record.height, 200.0);
            assert!(record.height_error());
            assert_eq!(waterfall.column_heights(), vec![200.0, 0.0]);
        });
    }

    #[test]
    fn test_timed_out_item_gets_fallback_height() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let item = waterfall.add_item(options(0).max_wait(Duration::from_millis(500)));
            item.loaded();
            waterfall.settled().await;

            assert_eq!(item.record().height, 200.0);
            assert_eq!(item.error_info().get().status, ErrorStatus::Timeout);
            assert_eq!(waterfall.column_heights(), vec![200.0, 0.0]);
        });
    }

    #[test]
    fn test_intrinsic_items_skip_measurement() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let _wide = waterfall.add_item(options(0).intrinsic(320.0, 240.0));
            let _tall = waterfall.add_item(options(1).intrinsic(160.0, 320.0));
            waterfall.settled().await;

            assert_eq!(waterfall.column_heights(), vec![120.0, 320.0]);

            waterfall.full_reflow();
            waterfall.settled().await;
            assert_eq!(waterfall.column_heights(), vec![120.0, 320.0]);
            assert_eq!(measure.calls(), 0);
        });
    }

    #[test]
    fn test_is_reflowing_signal() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let seen = Rc::new(RefCell::new(Vec::new()));
            let log = seen.clone();
            let reflowing = waterfall.is_reflowing_signal();
            let _stop = effect(move || log.borrow_mut().push(reflowing.get()));

            let _item = waterfall.add_item(options(0).intrinsic(100.0, 100.0));
            waterfall.settled().await;

            assert_eq!(*seen.borrow(), vec![false, true, false]);
        });
    }

    #[test]
    fn test_mount_sizes_columns() {
        run_local(async {
            let measure = FakeMeasure::new();
            measure.set_rect("#wall", NodeRect::sized(500.0, 800.0));
            let waterfall = Waterfall::new(&ConfigPatch::default(), measure.clone()).unwrap();

            waterfall.mount(ElementRef::new("#wall")).await;
            assert_eq!(waterfall.container_width(), 500.0);
            assert_eq!(waterfall.column_width(), 242.0);

            // Never answers: width stays as it was
            waterfall.mount(ElementRef::new("#missing")).await;
            assert_eq!(waterfall.container_width(), 500.0);
        });
    }

    #[test]
    fn test_teardown_stops_passes() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let item = waterfall.add_item(options(0));
            sleep(Duration::from_millis(50)).await;
            assert!(waterfall.is_reflowing());

            waterfall.teardown();
            waterfall.settled().await;
            assert!(!waterfall.is_reflowing());
            assert_eq!(waterfall.item_count(), 0);

            waterfall.reflow();
            item.loaded();
            sleep(Duration::from_millis(100)).await;
            assert!(!waterfall.is_reflowing());
            assert!(!item.record().is_inserted());
        });
    }

    #[test]
    fn test_dropping_awaited_item_unblocks_pass() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let mut items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0]);
            items[1].loaded();
            items[2].loaded();
            sleep(Duration::from_millis(50)).await;

            // Waiting on item 0, which never reports
            assert!(waterfall.is_reflowing());
            assert!(items.iter().all(|item| !item.record().is_inserted()));

            let start = Instant::now();
            drop(items.remove(0));
            waterfall.settled().await;

            assert!(start.elapsed() < Duration::from_secs(1));
            assert_eq!(positions(&items), vec![(0.0, 0.0), (0.0, 176.0)]);
            assert_eq!(waterfall.column_heights(), vec![150.0, 80.0]);
        });
    }

    fn hang_measurements(measure: &FakeMeasure, count: usize) {
        for index in 0..count {
            measure.forget(&format!("#item-{index}"));
        }
    }

    #[test]
    fn test_hung_remeasures_run_together() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0, 60.0]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;
            let before = waterfall.column_heights();

            hang_measurements(&measure, items.len());
            let start = Instant::now();
            waterfall.full_reflow();
            waterfall.settled().await;

            // Bounded by one max wait, not one per item
            let elapsed = start.elapsed();
            assert!(elapsed >= DEFAULT_MAX_WAIT);
            assert!(elapsed < DEFAULT_MAX_WAIT + Duration::from_secs(1));
            assert_eq!(waterfall.column_heights(), before);
            assert!(items.iter().all(|item| item.record().is_inserted()));
        });
    }

    #[test]
    fn test_teardown_cancels_remeasure() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);
            let items = add_all(&waterfall, &measure, &[100.0, 150.0, 80.0, 120.0, 60.0]);
            for item in &items {
                item.loaded();
            }
            waterfall.settled().await;

            hang_measurements(&measure, items.len());
            waterfall.full_reflow();
            sleep(Duration::from_millis(100)).await;
            assert!(waterfall.is_reflowing());

            let start = Instant::now();
            waterfall.teardown();
            waterfall.settled().await;

            assert!(start.elapsed() < Duration::from_secs(1));
            assert!(!waterfall.is_reflowing());
        });
    }

    #[test]
    fn test_config_reaches_live_items() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let first = waterfall.add_item(options(0));
            first.failed();
            waterfall.settled().await;
            assert_eq!(waterfall.column_heights(), vec![200.0, 0.0]);

            let second = waterfall.add_item(options(1).mode(ErrorMode::Retry));
            waterfall
                .set_config(&ConfigPatch {
                    fallback_height: Some(300.0),
                    max_retries: Some(0),
                    ..ConfigPatch::default()
                })
                .unwrap();

            // Created before the change, fails after it
            second.failed();
            waterfall.settled().await;

            assert_eq!(second.retry_count(), 0);
            assert_eq!(second.error_info().get().status, ErrorStatus::Final);
            assert_eq!(first.record().height, 300.0);
            assert_eq!(second.record().height, 300.0);
            assert_eq!(waterfall.column_heights(), vec![300.0, 300.0]);
        });
    }

    #[test]
    fn test_load_end_only_after_load_start() {
        run_local(async {
            let measure = FakeMeasure::new();
            let waterfall = engine(&measure);

            let events = Rc::new(RefCell::new(Vec::new()));
            let log = events.clone();
            let _cleanup = waterfall.on_event(move |event| log.borrow_mut().push(*event));
            let loads = Rc::new(Cell::new(0));
            let count = loads.clone();
            let _on_load = waterfall.on_load(move || count.set(count.get() + 1));

            waterfall.settled().await;
            waterfall.set_container_width(500.0);
            waterfall.settled().await;

            // Passes with nothing to place
            assert!(events.borrow().is_empty());
            assert_eq!(loads.get(), 2);
        });
    }
}
