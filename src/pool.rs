use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{sync::Notify, time::timeout};

/// A bounded pool of reusable values.
///
/// At most `max` values are ever created. Values handed back with [put()](Self::put) are reused
/// before new ones are created.
pub struct Pool<T> {
    max: usize,
    created: AtomicUsize,
    idle: Mutex<Vec<T>>,
    create: Box<dyn Fn() -> T + Send + Sync>,
    returned: Notify,
}

impl<T> Pool<T> {
    /// Create an empty pool which uses `create` to make up to `max` values.
    pub fn new(max: usize, create: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            max,
            created: AtomicUsize::new(0),
            idle: Mutex::new(Vec::with_capacity(max)),
            create: Box::new(create),
            returned: Notify::new(),
        }
    }

    /// Take a value from the pool, creating one if none are idle.
    ///
    /// Returns `None` if none are idle and `max` values have already been created.
    pub fn get(&self) -> Option<T> {
        if let Some(value) = self.lock_idle().pop() {
            return Some(value);
        }

        self.created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |created| {
                (created < self.max).then_some(created + 1)
            })
            .ok()
            .map(|_| (self.create)())
    }

    /// Like [get()](Self::get), but if the pool is exhausted, wait up to `duration` for a value to
    /// be [put()](Self::put) back.
    pub async fn get_timeout(&self, duration: Duration) -> Option<T> {
        timeout(duration, async {
            loop {
                let returned = self.returned.notified();
                if let Some(value) = self.get() {
                    return value;
                }
                returned.await;
            }
        })
        .await
        .ok()
    }

    /// Return a value to the pool. Dropped if the pool already holds `max` idle values.
    pub fn put(&self, value: T) {
        let mut idle = self.lock_idle();
        if idle.len() < self.max {
            idle.push(value);
            drop(idle);
            self.returned.notify_one();
        }
    }

    /// The number of values created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The number of values waiting to be reused.
    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max", &self.max)
            .field("created", &self.created())
            .field("idle", &self.idle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use crate::assert_elapsed;

    use super::*;

    #[test]
    fn creates_up_to_max() {
        let pool = Pool::new(5, Vec::<u8>::new);

        let taken: Vec<_> = (0..10).filter_map(|_| pool.get()).collect();

        assert_eq!(taken.len(), 5);
        assert_eq!(pool.created(), 5);

        for value in taken {
            pool.put(value);
        }
        assert_eq!(pool.idle(), 5);
    }

    #[test]
    fn reuses_idle_values() {
        let pool = Pool::new(1, || String::from("fresh"));

        let mut value = pool.get().unwrap();
        assert!(pool.get().is_none(), "exhausted");

        value.push_str(" and reused");
        pool.put(value);

        assert_eq!(pool.get().as_deref(), Some("fresh and reused"));
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn drops_values_beyond_capacity() {
        let pool = Pool::new(2, || 0);

        pool.put(1);
        pool.put(2);
        pool.put(3);

        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn get_timeout_waits_for_a_value_to_be_returned() {
        let pool = Pool::new(1, || 7);
        let value = pool.get().unwrap();

        let mut waiting = task::spawn(pool.get_timeout(Duration::from_secs(1)));
        assert_pending!(waiting.poll());

        pool.put(value);

        assert!(waiting.is_woken());
        assert_ready_eq!(waiting.poll(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn get_timeout_gives_up_when_exhausted() {
        let pool = Pool::new(1, || 7);
        let _value = pool.get().unwrap();

        let start = Instant::now();
        assert_eq!(pool.get_timeout(Duration::from_millis(50)).await, None);
        assert_elapsed!(start, Duration::from_millis(50), Duration::from_millis(10));

        let idle = Pool::new(1, || 7);
        assert_eq!(idle.get_timeout(Duration::ZERO).await, Some(7), "no wait when available");
    }
}
