use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    control::{Lifecycle, Replenish},
    BucketConfig, Error,
};

/// Counts events per key, allowing at most `max` per fixed time window.
///
/// All counts are reset at the end of every window.
///
/// Like the token buckets, the limiter owns a background task on the Tokio runtime it was created
/// in. Call [close()](Self::close) when it's no longer needed.
#[derive(Debug)]
pub struct Limiter {
    window: Arc<Window>,
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct Window {
    max: i64,
    counts: Mutex<HashMap<String, i64>>,
}

impl Limiter {
    /// Allow up to `max` per key in every `window`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(max: i64, window: Duration) -> Self {
        Self::try_new(max, window).expect("Limiter must be created within a Tokio runtime")
    }

    /// Create a limiter, failing if there is no Tokio runtime to run the reset task.
    pub fn try_new(max: i64, window: Duration) -> Result<Self, Error> {
        let state = Arc::new(Window {
            max,
            counts: Mutex::new(HashMap::new()),
        });
        let lifecycle =
            Lifecycle::start(state.clone(), window.max(BucketConfig::MIN_REFILL_INTERVAL))?;

        Ok(Self {
            window: state,
            lifecycle,
        })
    }

    /// Count one event for `key`.
    ///
    /// Returns `false`, counting nothing, if this would exceed the maximum.
    pub fn inc(&self, key: &str) -> bool {
        self.inc_by(key, 1)
    }

    /// Count `n` events for `key`.
    ///
    /// Returns `false`, counting nothing, if this would exceed the maximum.
    pub fn inc_by(&self, key: &str, n: i64) -> bool {
        let mut counts = self.window.lock();

        let count = counts.get(key).copied().unwrap_or(0).saturating_add(n);
        if count > self.window.max {
            return false;
        }
        counts.insert(key.to_owned(), count);
        true
    }

    /// Uncount one event for `key`.
    pub fn dec(&self, key: &str) -> bool {
        self.inc_by(key, -1)
    }

    /// Uncount `n` events for `key`, all or nothing.
    pub fn dec_by(&self, key: &str, n: i64) -> bool {
        self.inc_by(key, n.saturating_neg())
    }

    /// The count for `key` in the current window.
    pub fn count(&self, key: &str) -> i64 {
        self.window.lock().get(key).copied().unwrap_or(0)
    }

    /// Forget the count for `key`.
    pub fn clear(&self, key: &str) {
        self.window.lock().remove(key);
    }

    /// Forget every count.
    pub fn clear_all(&self) {
        self.window.clear_all();
    }

    /// Stop resetting counts, and clear them one last time.
    ///
    /// Returns `true` exactly once.
    pub fn close(&self) -> bool {
        if !self.lifecycle.close() {
            return false;
        }
        self.window.clear_all();
        true
    }

    /// Whether [close()](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}

impl Window {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_all(&self) {
        self.lock().clear();
    }
}

impl Replenish for Window {
    fn on_tick(&self) {
        self.clear_all();
    }
}
