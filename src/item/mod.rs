//! Items - one asynchronously sized entry in the waterfall.
//!
//! A [`WaterfallItem`] is owned by whoever renders it. It registers with an
//! [`ItemRegistry`] (normally a [`Waterfall`](crate::Waterfall)) on creation,
//! drives its [`Lifecycle`] from renderer reports and unregisters when
//! dropped.
//!
//! # Renderer Contract
//!
//! - Render the asset described by [`WaterfallItem::render_props`]
//! - Re-render whenever `key` changes (a retry)
//! - Report `loaded()` / `failed()` for the asset, and
//!   `placeholder_loaded()` / `placeholder_failed()` once `show_placeholder`
//!   is set
//! - Position the element from the `placement` signal
//!
//! # Example
//!
//! ```ignore
//! let item = waterfall.add_item(
//!     ItemOptions::new(0, ElementRef::new("#card-0")).mode(ErrorMode::Retry),
//! );
//! // ... asset rendered
//! item.loaded();
//! ```

mod lifecycle;
mod measure;

pub use lifecycle::*;
pub use measure::*;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use spark_signals::{Signal, signal};
use tokio::task::JoinHandle;

use crate::config::WaterfallConfig;
use crate::types::{ElementRef, ErrorInfo, ErrorMode, ItemFlags, ItemRecord, Placement};

/// Max wait when an item does not set its own.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

thread_local! {
    static NEXT_ITEM_ID: Cell<u64> = const { Cell::new(0) };
}

fn next_item_id() -> u64 {
    NEXT_ITEM_ID.with(|id| {
        let next = id.get();
        id.set(next + 1);
        next
    })
}

// =============================================================================
// Registry Interface
// =============================================================================

/// What an item needs from the engine it belongs to.
///
/// Items hold the registry by reference and report state changes through
/// it; they never reach into the engine's internals.
pub trait ItemRegistry {
    /// A new item exists.
    fn add_item(&self, item: &Rc<ItemCore>);
    /// The item is gone. Must ignore items it does not hold.
    fn remove_item(&self, item: &ItemCore);
    /// The item resolved to a height and can be placed.
    fn on_item_load(&self, item: &ItemCore);
    /// The item scheduled another load attempt.
    fn on_item_retry(&self, item: &ItemCore, retry_count: u32);
    /// The item restarted loading and no longer has a height.
    fn on_item_reset(&self, item: &ItemCore, was_visible: bool);

    fn column_width(&self) -> f32;
    fn is_reflowing(&self) -> bool;
    fn is_layout_interrupted(&self) -> bool;
    fn config(&self) -> WaterfallConfig;
    fn measurer(&self) -> Rc<dyn Measure>;
}

// =============================================================================
// Options
// =============================================================================

/// Per-item settings. Anything left unset comes from the engine config.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOptions {
    pub index: usize,
    pub element: ElementRef,
    pub mode: ErrorMode,
    pub max_wait: Duration,
    /// Overrides `max_retries` from the config.
    pub retries: Option<u32>,
    /// Natural `(width, height)` of the asset. Skips measurement.
    pub intrinsic: Option<(f32, f32)>,
}

impl ItemOptions {
    pub fn new(index: usize, element: ElementRef) -> Self {
        Self {
            index,
            element,
            mode: ErrorMode::default(),
            max_wait: DEFAULT_MAX_WAIT,
            retries: None,
            intrinsic: None,
        }
    }

    pub fn mode(mut self, mode: ErrorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn intrinsic(mut self, width: f32, height: f32) -> Self {
        self.intrinsic = Some((width, height));
        self
    }
}

/// Everything the renderer needs to draw one item.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProps {
    pub column_width: f32,
    /// Fixed image height for items with intrinsic dimensions.
    pub image_height: Option<f32>,
    /// Changes on every reload; re-render the asset when it does.
    pub key: u64,
    pub error_info: ErrorInfo,
    pub show_placeholder: bool,
}

// =============================================================================
// Item Core
// =============================================================================

#[derive(Default)]
struct ItemTasks {
    max_wait: Option<JoinHandle<()>>,
    measure: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl ItemTasks {
    fn abort_all(&mut self) {
        for task in [self.max_wait.take(), self.measure.take(), self.retry.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Shared state of one item, as seen by the engine.
pub struct ItemCore {
    id: u64,
    index: usize,
    element: ElementRef,
    intrinsic: Option<(f32, f32)>,
    max_wait: Duration,
    mode: ErrorMode,
    retries: Option<u32>,
    registry: Rc<dyn ItemRegistry>,
    lifecycle: RefCell<Lifecycle>,
    record: RefCell<ItemRecord>,
    tasks: RefCell<ItemTasks>,
    detached: Cell<bool>,

    error_info: Signal<ErrorInfo>,
    placement: Signal<Option<Placement>>,
    render_key: Signal<u64>,
    show_placeholder: Signal<bool>,
}

impl ItemCore {
    /// Unique per thread. Two items may share an index, never an id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn element(&self) -> &ElementRef {
        &self.element
    }

    pub fn record(&self) -> ItemRecord {
        *self.record.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.lifecycle.borrow().is_resolved()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    /// Height to lay out with, once resolved.
    ///
    /// Intrinsic items scale to the column: `column_width * height / width`.
    /// Items that gave up take the registry's current fallback height.
    pub fn layout_height(&self, column_width: f32) -> Option<f32> {
        let resolution = self.lifecycle.borrow().resolution()?;
        match (self.intrinsic, resolution) {
            (Some((width, height)), _) => Some(column_width * height / width),
            (None, Resolution::Fallback | Resolution::TimedOut) => {
                Some(self.registry.config().fallback_height)
            }
            (None, _) => Some(self.record.borrow().height),
        }
    }

    /// Recovery settings from the registry's current config.
    fn policy(&self) -> RetryPolicy {
        retry_policy(&self.registry.config(), self.mode, self.retries)
    }

    /// Record where the allocator put this item.
    ///
    /// Returns true the first time the item becomes visible.
    pub(crate) fn set_placement(&self, placement: Placement, height: f32) -> bool {
        let became_visible = {
            let mut record = self.record.borrow_mut();
            let was_visible = record.visible();
            record.top = placement.top;
            record.left = placement.left;
            record.height = height;
            record.flags |= ItemFlags::INSERTED | ItemFlags::VISIBLE;
            !was_visible
        };
        self.placement.set(Some(placement));
        became_visible
    }

    /// Forget the placement for a new layout generation.
    pub(crate) fn clear_inserted(&self) {
        self.record.borrow_mut().flags.remove(ItemFlags::INSERTED);
    }

    /// Re-measure before a full pass.
    ///
    /// Only items whose height came from a measurement are re-measured; a
    /// failed or late re-measurement keeps the previous height.
    pub(crate) async fn update_height(&self) {
        let measurable = matches!(
            self.lifecycle.borrow().resolution(),
            Some(Resolution::Measured | Resolution::PlaceholderMeasured)
        );
        if !measurable || self.detached.get() {
            return;
        }

        let measure = self.registry.measurer().measure(&self.element);
        match tokio::time::timeout(self.max_wait, measure).await {
            Ok(rect) if is_usable_height(rect.height) => {
                self.record.borrow_mut().height = rect.height;
            }
            Ok(rect) => warn!(
                "item {}: re-measured height {} is not usable, keeping {}",
                self.index,
                rect.height,
                self.record.borrow().height
            ),
            Err(_) => warn!(
                "item {}: re-measure timed out after {:?}",
                self.index, self.max_wait
            ),
        }
    }

    /// Cut the item off from its registry and stop all of its tasks.
    pub(crate) fn detach(&self) {
        self.detached.set(true);
        self.tasks.borrow_mut().abort_all();
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    fn dispatch(self: &Rc<Self>, event: LifecycleEvent) {
        if self.detached.get() {
            return;
        }

        let effects = {
            let mut lifecycle = self.lifecycle.borrow_mut();
            lifecycle.set_policy(self.policy());
            lifecycle.handle(event)
        };
        let error_info = self.lifecycle.borrow().error_info().clone();
        if self.error_info.get() != error_info {
            self.error_info.set(error_info);
        }

        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(self: &Rc<Self>, effect: Effect) {
        match effect {
            Effect::Measure => self.start_measure(),
            Effect::ScheduleRetry(delay) => self.start_retry_timer(delay),
            Effect::Reload => {
                self.show_placeholder.set(false);
                self.render_key.set(self.render_key.get() + 1);
            }
            Effect::ShowPlaceholder => {
                self.show_placeholder.set(true);
            }
            Effect::Retried(retry_count) => {
                self.record.borrow_mut().retry_count = retry_count;
                info!("item {}: retry {retry_count}", self.index);
                self.registry.on_item_retry(self, retry_count);
            }
            Effect::Resolved { height, height_error } => self.resolve(height, height_error),
        }
    }

    fn resolve(&self, height: f32, height_error: bool) {
        self.tasks.borrow_mut().abort_all();
        {
            let mut record = self.record.borrow_mut();
            record.height = height;
            record.flags |= ItemFlags::LOADED;
            record.flags.set(ItemFlags::LOAD_SUCCESS, !height_error);
            record.flags.set(ItemFlags::HEIGHT_ERROR, height_error);
        }
        debug!(
            "item {}: resolved to {height} ({:?})",
            self.index,
            self.lifecycle.borrow().resolution()
        );
        self.registry.on_item_load(self);
    }

    fn start_measure(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let measure = self.registry.measurer().measure(&self.element);

        let task = tokio::task::spawn_local(async move {
            let rect = measure.await;
            if let Some(item) = weak.upgrade() {
                item.tasks.borrow_mut().measure = None;
                item.dispatch(LifecycleEvent::Measured(rect.height));
            }
        });
        replace_task(&mut self.tasks.borrow_mut().measure, task);
    }

    fn start_retry_timer(self: &Rc<Self>, delay: Duration) {
        let weak = Rc::downgrade(self);
        let task = spawn_after(delay, weak, |item| {
            item.tasks.borrow_mut().retry = None;
            item.dispatch(LifecycleEvent::RetryElapsed);
        });
        replace_task(&mut self.tasks.borrow_mut().retry, task);
    }

    fn start_max_wait(self: &Rc<Self>) {
        let max_wait = self.max_wait;
        let weak = Rc::downgrade(self);
        let task = spawn_after(max_wait, weak, move |item| {
            item.tasks.borrow_mut().max_wait = None;
            warn!("item {}: no height after {max_wait:?}", item.index);
            item.dispatch(LifecycleEvent::TimedOut(max_wait));
        });
        replace_task(&mut self.tasks.borrow_mut().max_wait, task);
    }
}

fn retry_policy(config: &WaterfallConfig, mode: ErrorMode, retries: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        mode,
        max_retries: retries.unwrap_or(config.max_retries),
        retry_delay: config.retry_delay,
        fallback_height: config.fallback_height,
    }
}

fn spawn_after<F>(delay: Duration, item: Weak<ItemCore>, then: F) -> JoinHandle<()>
where
    F: FnOnce(Rc<ItemCore>) + 'static,
{
    tokio::task::spawn_local(async move {
        tokio::time::sleep(delay).await;
        if let Some(item) = item.upgrade() {
            then(item);
        }
    })
}

fn replace_task(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
    if let Some(old) = slot.replace(task) {
        old.abort();
    }
}

// =============================================================================
// Waterfall Item
// =============================================================================

/// Owner handle for one item. Dropping it removes the item from the layout.
pub struct WaterfallItem {
    core: Rc<ItemCore>,
}

impl WaterfallItem {
    /// Create an item and register it with `registry`.
    ///
    /// Must be called inside a `tokio::task::LocalSet`: the max-wait timer
    /// starts right away.
    pub fn new(registry: Rc<dyn ItemRegistry>, options: ItemOptions) -> Self {
        let policy = retry_policy(&registry.config(), options.mode, options.retries);

        let intrinsic = options
            .intrinsic
            .filter(|(width, height)| is_usable_height(*width) && is_usable_height(*height));
        if options.intrinsic.is_some() && intrinsic.is_none() {
            warn!(
                "item {}: ignoring unusable intrinsic size {:?}",
                options.index, options.intrinsic
            );
        }

        let mut record = ItemRecord::new(options.index);
        let lifecycle = match intrinsic {
            Some(_) => {
                record.flags |= ItemFlags::LOADED | ItemFlags::LOAD_SUCCESS;
                Lifecycle::intrinsic(policy)
            }
            None => Lifecycle::new(policy),
        };

        let core = Rc::new(ItemCore {
            id: next_item_id(),
            index: options.index,
            element: options.element,
            intrinsic,
            max_wait: options.max_wait,
            mode: options.mode,
            retries: options.retries,
            registry: registry.clone(),
            lifecycle: RefCell::new(lifecycle),
            record: RefCell::new(record),
            tasks: RefCell::new(ItemTasks::default()),
            detached: Cell::new(false),
            error_info: signal(ErrorInfo::default()),
            placement: signal(None),
            render_key: signal(0),
            show_placeholder: signal(false),
        });

        if intrinsic.is_none() {
            core.start_max_wait();
        }
        registry.add_item(&core);

        Self { core }
    }

    pub fn core(&self) -> &Rc<ItemCore> {
        &self.core
    }

    pub fn index(&self) -> usize {
        self.core.index
    }

    pub fn record(&self) -> ItemRecord {
        self.core.record()
    }

    pub fn is_resolved(&self) -> bool {
        self.core.is_resolved()
    }

    pub fn retry_count(&self) -> u32 {
        self.core.lifecycle.borrow().retry_count()
    }

    pub fn error_info(&self) -> Signal<ErrorInfo> {
        self.core.error_info.clone()
    }

    pub fn placement(&self) -> Signal<Option<Placement>> {
        self.core.placement.clone()
    }

    pub fn render_props(&self) -> RenderProps {
        let column_width = self.core.registry.column_width();
        RenderProps {
            column_width,
            image_height: self
                .core
                .intrinsic
                .map(|(width, height)| column_width * height / width),
            key: self.core.render_key.get(),
            error_info: self.core.error_info.get(),
            show_placeholder: self.core.show_placeholder.get(),
        }
    }

    // -------------------------------------------------------------------------
    // Renderer Reports
    // -------------------------------------------------------------------------

    /// The asset rendered.
    pub fn loaded(&self) {
        self.core.dispatch(LifecycleEvent::AssetLoaded);
    }

    /// The asset failed to load.
    pub fn failed(&self) {
        self.core.dispatch(LifecycleEvent::AssetFailed);
    }

    pub fn placeholder_loaded(&self) {
        self.core.dispatch(LifecycleEvent::PlaceholderLoaded);
    }

    pub fn placeholder_failed(&self) {
        self.core.dispatch(LifecycleEvent::PlaceholderFailed);
    }

    /// Restart loading from scratch: new render key, fresh retry budget.
    pub fn refresh_image(&self) {
        let core = &self.core;
        if core.detached.get() {
            return;
        }

        core.tasks.borrow_mut().abort_all();
        core.lifecycle.borrow_mut().reset();
        let was_visible = {
            let mut record = core.record.borrow_mut();
            let was_visible = record.visible();
            record.flags = if core.intrinsic.is_some() {
                ItemFlags::LOADED | ItemFlags::LOAD_SUCCESS
            } else {
                ItemFlags::NONE
            };
            record.retry_count = 0;
            was_visible
        };

        core.error_info.set(ErrorInfo::default());
        core.show_placeholder.set(false);
        core.placement.set(None);
        core.render_key.set(core.render_key.get() + 1);

        if core.intrinsic.is_none() {
            core.start_max_wait();
        }
        core.registry.on_item_reset(core, was_visible);
    }
}

impl Drop for WaterfallItem {
    fn drop(&mut self) {
        let detached = self.core.detached.replace(true);
        self.core.tasks.borrow_mut().abort_all();
        if !detached {
            self.core.registry.remove_item(&self.core);
        }
    }
}
