//! Event Handlers - per-engine handler registry.
//!
//! # API
//!
//! - `on_event(handler)` - every [`WaterfallEvent`]
//! - `on_load(handler)` - every time a pass drains its queue
//! - `load_done(handler)` - the next time a pass drains its queue, once
//!
//! Handlers are snapshotted before they run, so a handler may subscribe,
//! unsubscribe or trigger another reflow without deadlocking the registry.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::types::{Cleanup, WaterfallEvent};

/// Handler for coordinator events.
pub type EventHandler = Rc<dyn Fn(&WaterfallEvent)>;

/// Handler run when the queue drains.
pub type LoadHandler = Rc<dyn Fn()>;

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct HandlerRegistry {
    event_handlers: Vec<(usize, EventHandler)>,
    load_handlers: Vec<(usize, LoadHandler)>,
    load_once: Vec<Box<dyn FnOnce()>>,
    next_id: usize,
}

impl HandlerRegistry {
    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Default)]
pub(crate) struct EventHandlers {
    registry: Rc<RefCell<HandlerRegistry>>,
}

impl EventHandlers {
    pub(crate) fn on_event<F>(&self, handler: F) -> Cleanup
    where
        F: Fn(&WaterfallEvent) + 'static,
    {
        let id = {
            let mut reg = self.registry.borrow_mut();
            let id = reg.next_id();
            reg.event_handlers.push((id, Rc::new(handler)));
            id
        };

        let registry = Rc::downgrade(&self.registry);
        Box::new(move || {
            with_registry(&registry, |reg| {
                reg.event_handlers.retain(|(handler_id, _)| *handler_id != id);
            });
        })
    }

    pub(crate) fn on_load<F>(&self, handler: F) -> Cleanup
    where
        F: Fn() + 'static,
    {
        let id = {
            let mut reg = self.registry.borrow_mut();
            let id = reg.next_id();
            reg.load_handlers.push((id, Rc::new(handler)));
            id
        };

        let registry = Rc::downgrade(&self.registry);
        Box::new(move || {
            with_registry(&registry, |reg| {
                reg.load_handlers.retain(|(handler_id, _)| *handler_id != id);
            });
        })
    }

    pub(crate) fn load_done<F>(&self, handler: F)
    where
        F: FnOnce() + 'static,
    {
        self.registry.borrow_mut().load_once.push(Box::new(handler));
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    pub(crate) fn emit(&self, event: WaterfallEvent) {
        let handlers: Vec<EventHandler> = self
            .registry
            .borrow()
            .event_handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    /// Run the persistent load handlers, then the one-shot ones.
    pub(crate) fn fire_load(&self) {
        let (handlers, once) = {
            let mut reg = self.registry.borrow_mut();
            let handlers: Vec<LoadHandler> =
                reg.load_handlers.iter().map(|(_, handler)| handler.clone()).collect();
            (handlers, std::mem::take(&mut reg.load_once))
        };

        for handler in handlers {
            handler();
        }
        for handler in once {
            handler();
        }
    }

    pub(crate) fn clear(&self) {
        let mut reg = self.registry.borrow_mut();
        reg.event_handlers.clear();
        reg.load_handlers.clear();
        reg.load_once.clear();
    }
}

fn with_registry(registry: &Weak<RefCell<HandlerRegistry>>, f: impl FnOnce(&mut HandlerRegistry)) {
    if let Some(registry) = registry.upgrade() {
        f(&mut registry.borrow_mut());
    }
}
