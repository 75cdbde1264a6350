//! Test helpers: a paused-clock local runtime and a scriptable measurer.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::item::Measure;
use crate::types::{ElementRef, NodeRect};

/// Run `future` on a current-thread runtime with a paused clock, inside a `LocalSet`.
pub(crate) fn run_local<F: Future>(future: F) -> F::Output {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("test runtime");
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

/// Measurer answering from a table of rects. Unknown elements never resolve.
#[derive(Default)]
pub(crate) struct FakeMeasure {
    rects: RefCell<HashMap<String, NodeRect>>,
    calls: Cell<usize>,
}

impl FakeMeasure {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Answer `selector` with a 160-wide rect of `height`.
    pub(crate) fn set(&self, selector: &str, height: f32) {
        self.set_rect(selector, NodeRect::sized(160.0, height));
    }

    pub(crate) fn set_rect(&self, selector: &str, rect: NodeRect) {
        self.rects.borrow_mut().insert(selector.to_string(), rect);
    }

    /// Stop answering `selector`: later measurements never resolve.
    pub(crate) fn forget(&self, selector: &str) {
        self.rects.borrow_mut().remove(selector);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Measure for FakeMeasure {
    fn measure(&self, element: &ElementRef) -> LocalBoxFuture<'static, NodeRect> {
        self.calls.set(self.calls.get() + 1);
        match self.rects.borrow().get(element.as_str()) {
            Some(rect) => future::ready(*rect).boxed_local(),
            None => future::pending().boxed_local(),
        }
    }
}
