use std::sync::atomic::{AtomicI64, Ordering};

/// A shared counter.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicI64,
}

impl Counter {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one, returning the new count.
    pub fn inc(&self) -> i64 {
        self.inc_by(1)
    }

    /// Add `n`, returning the new count.
    pub fn inc_by(&self, n: i64) -> i64 {
        self.count.fetch_add(n, Ordering::SeqCst).wrapping_add(n)
    }

    /// Subtract one, returning the new count.
    pub fn dec(&self) -> i64 {
        self.dec_by(1)
    }

    /// Subtract `n`, returning the new count.
    pub fn dec_by(&self, n: i64) -> i64 {
        self.count.fetch_sub(n, Ordering::SeqCst).wrapping_sub(n)
    }

    /// Reset to zero, returning the previous count.
    pub fn zero(&self) -> i64 {
        self.set_to(0)
    }

    /// Set the count, returning the previous count.
    pub fn set_to(&self, n: i64) -> i64 {
        self.count.swap(n, Ordering::SeqCst)
    }

    /// The current count.
    pub fn get(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}
