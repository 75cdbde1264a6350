//! Item Table - the items an engine lays out.
//!
//! Items are keyed by `(index, id)`, so iteration is always in layout order
//! and two items that share an index never overwrite each other. Entries are
//! weak: the table never keeps an item alive, and dead entries are pruned
//! whenever they are seen.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::{Rc, Weak};

use crate::item::ItemCore;

#[derive(Default)]
pub(crate) struct ItemTable {
    items: BTreeMap<(usize, u64), Weak<ItemCore>>,
}

impl ItemTable {
    pub(crate) fn insert(&mut self, item: &Rc<ItemCore>) {
        self.items.insert((item.index(), item.id()), Rc::downgrade(item));
    }

    /// Remove `item`. Returns false if the table did not hold it.
    pub(crate) fn remove(&mut self, item: &ItemCore) -> bool {
        self.items.remove(&(item.index(), item.id())).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Live items in index order.
    pub(crate) fn live(&mut self) -> Vec<Rc<ItemCore>> {
        self.prune();
        self.items.values().filter_map(Weak::upgrade).collect()
    }

    /// Lowest-index item not placed in the current generation.
    pub(crate) fn next_pending(&mut self) -> Option<Rc<ItemCore>> {
        self.prune();
        self.items
            .values()
            .filter_map(Weak::upgrade)
            .find(|item| !item.record().is_inserted())
    }

    /// Whether an item after `index` is already placed.
    pub(crate) fn has_placed_after(&self, index: usize) -> bool {
        self.items
            .range((Bound::Excluded((index, u64::MAX)), Bound::Unbounded))
            .filter_map(|(_, item)| item.upgrade())
            .any(|item| item.record().is_inserted())
    }

    /// Empty the table, returning the items that were still alive.
    pub(crate) fn drain(&mut self) -> Vec<Rc<ItemCore>> {
        std::mem::take(&mut self.items)
            .into_values()
            .filter_map(|item| item.upgrade())
            .collect()
    }

    fn prune(&mut self) {
        self.items.retain(|_, item| item.strong_count() > 0);
    }
}
