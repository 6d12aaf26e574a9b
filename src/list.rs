use std::{
    collections::LinkedList,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A thread-safe doubly linked list.
///
/// Every operation takes a lock for its duration, including iteration.
#[derive(Debug, Default)]
pub struct List<T> {
    items: Mutex<LinkedList<T>>,
}

impl<T> List<T> {
    /// An empty list.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(LinkedList::new()),
        }
    }

    /// Add an item to the front.
    pub fn push_front(&self, value: T) {
        self.lock().push_front(value);
    }

    /// Add an item to the back.
    pub fn push_back(&self, value: T) {
        self.lock().push_back(value);
    }

    /// Remove the item at the front.
    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove the item at the back.
    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    /// Visit items from the front with their index. Return `false` from `f` to stop early.
    pub fn for_each_front(&self, mut f: impl FnMut(usize, &T) -> bool) {
        for (index, value) in self.lock().iter().enumerate() {
            if !f(index, value) {
                return;
            }
        }
    }

    /// Visit items from the back. Indexes still count from the front.
    pub fn for_each_back(&self, mut f: impl FnMut(usize, &T) -> bool) {
        for (index, value) in self.lock().iter().enumerate().rev() {
            if !f(index, value) {
                return;
            }
        }
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// The number of items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the list has no items.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LinkedList<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> List<T> {
    /// A copy of the item at `index`, or `None` if out of bounds.
    pub fn get(&self, index: usize) -> Option<T> {
        self.lock().iter().nth(index).cloned()
    }
}
