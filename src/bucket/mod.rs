//! Lock-free token buckets.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::trace;

use crate::{
    control::{Lifecycle, Replenish},
    Admit, BucketConfig, Error,
};

pub use queue::TBucketQ;

mod queue;

/// A token bucket which never waits.
///
/// Holds up to `bucket_size` tokens, starting full. A background task adds `burst` tokens every
/// refill interval, never exceeding the bucket size. Taking a token either succeeds immediately
/// or fails immediately.
///
/// All operations are lock-free and safe to call concurrently.
///
/// The refill task runs on the Tokio runtime the bucket was created in. Call
/// [close()](Self::close) when the bucket is no longer needed. Dropping the bucket also closes it.
#[derive(Debug)]
pub struct TBucket {
    tokens: Arc<Tokens>,
    refill_interval: Duration,
    lifecycle: Lifecycle,
}

/// The available token count, shared between callers and the refill task.
#[derive(Debug)]
pub(crate) struct Tokens {
    available: AtomicUsize,
    bucket_size: usize,
    burst: usize,
}

impl TBucket {
    /// Create a full bucket which adds `burst` tokens every `refill_interval`.
    ///
    /// Zero for `bucket_size` or `burst` is treated as 1.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(bucket_size: usize, burst: usize, refill_interval: Duration) -> Self {
        Self::from_config(BucketConfig::new(bucket_size, refill_interval).burst(burst))
    }

    /// Create a full bucket which adds one token every `refill_interval`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_capacity(bucket_size: usize, refill_interval: Duration) -> Self {
        Self::from_config(BucketConfig::new(bucket_size, refill_interval))
    }

    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_config(config: BucketConfig) -> Self {
        Self::try_from_config(config).expect("TBucket must be created within a Tokio runtime")
    }

    /// Create a bucket, failing if there is no Tokio runtime to run the refill task.
    pub fn try_from_config(config: BucketConfig) -> Result<Self, Error> {
        let tokens = Arc::new(Tokens::full(&config));
        let lifecycle = Lifecycle::start(tokens.clone(), config.refill_interval)?;

        Ok(Self {
            tokens,
            refill_interval: config.refill_interval,
            lifecycle,
        })
    }

    /// Try to take a single token.
    ///
    /// Returns `false` if the bucket is empty.
    pub fn get_tok(&self) -> bool {
        self.tokens.take(1)
    }

    /// Try to take `n` tokens, all or nothing.
    ///
    /// Returns `false`, taking nothing, if fewer than `n` are available. Zero is treated as 1.
    pub fn get_toks(&self, n: usize) -> bool {
        self.tokens.take(n.max(1))
    }

    /// Remove all tokens. Doesn't affect refilling.
    pub fn empty(&self) {
        self.tokens.set(0);
    }

    /// Fill the bucket to its size.
    pub fn fill(&self) {
        self.tokens.set(self.tokens.bucket_size);
    }

    /// Set the number of available tokens to exactly `n`, which may exceed the bucket size.
    pub fn fill_to(&self, n: usize) {
        self.tokens.set(n);
    }

    /// Stop adding tokens until [resumed](Self::resume). Tokens already in the bucket can still be
    /// taken.
    ///
    /// Returns `false` if already paused or closed.
    pub fn pause(&self) -> bool {
        self.lifecycle.pause()
    }

    /// Start adding tokens again.
    ///
    /// Returns `false` if not paused, or closed.
    pub fn resume(&self) -> bool {
        self.lifecycle.resume()
    }

    /// Permanently stop adding tokens. The bucket can't be reopened.
    ///
    /// Returns `true` exactly once.
    pub fn close(&self) -> bool {
        self.lifecycle.close()
    }

    /// Whether [close()](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Whether refilling is paused.
    pub fn is_paused(&self) -> bool {
        self.lifecycle.is_paused()
    }

    /// The number of tokens currently available.
    pub fn available(&self) -> usize {
        self.tokens.available()
    }

    /// The maximum number of tokens added by refilling.
    pub fn bucket_size(&self) -> usize {
        self.tokens.bucket_size
    }

    /// Tokens added per refill tick.
    pub fn burst(&self) -> usize {
        self.tokens.burst
    }

    /// Time between refill ticks.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

#[async_trait]
impl Admit for TBucket {
    async fn try_admit(&self) -> bool {
        self.get_tok()
    }

    async fn admit(&self) -> bool {
        self.get_tok()
    }
}

impl Tokens {
    pub(crate) fn full(config: &BucketConfig) -> Self {
        Self {
            available: AtomicUsize::new(config.bucket_size),
            bucket_size: config.bucket_size,
            burst: config.burst,
        }
    }

    pub(crate) fn take(&self, n: usize) -> bool {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |available| {
                available.checked_sub(n)
            })
            .is_ok()
    }

    /// Add up to `n` tokens without going over the bucket size.
    ///
    /// Returns the number of tokens added. A bucket already at (or over) its size is left alone.
    pub(crate) fn refill(&self, n: usize) -> usize {
        let bucket_size = self.bucket_size;
        match self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |available| {
                (available < bucket_size).then(|| available.saturating_add(n).min(bucket_size))
            }) {
            Ok(previous) => previous.saturating_add(n).min(bucket_size) - previous,
            Err(_) => 0,
        }
    }

    pub(crate) fn set(&self, n: usize) {
        self.available.store(n, Ordering::SeqCst);
    }

    pub(crate) fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn burst(&self) -> usize {
        self.burst
    }
}

impl Replenish for Tokens {
    fn on_tick(&self) {
        let added = self.refill(self.burst);
        trace!(added, "refilled bucket");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time;

    use super::*;

    #[tokio::test]
    async fn clamps_size_and_burst() {
        let bucket = TBucket::new(0, 0, Duration::from_secs(1));

        assert_eq!(bucket.bucket_size(), 1);
        assert_eq!(bucket.burst(), 1);
        assert_eq!(bucket.available(), 1, "starts full");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_before_refill() {
        let bucket = TBucket::with_capacity(10, Duration::from_secs(1));

        let successes = (0..20).filter(|_| bucket.get_tok()).count();

        assert_eq!(successes, 10);
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_up_to_bucket_size() {
        let bucket = TBucket::with_capacity(10, Duration::from_millis(100));
        bucket.empty();

        time::sleep(Duration::from_millis(550)).await;
        assert_eq!(bucket.available(), 5, "one token per tick");

        time::sleep(Duration::from_millis(650)).await;
        assert_eq!(bucket.available(), 10, "saturates, doesn't overshoot");
    }

    #[tokio::test(start_paused = true)]
    async fn bursty_refill_is_clamped() {
        let bucket = TBucket::new(10, 4, Duration::from_millis(100));
        bucket.fill_to(7);

        time::sleep(Duration::from_millis(150)).await;

        assert_eq!(bucket.available(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn get_toks_is_all_or_nothing() {
        let bucket = TBucket::with_capacity(10, Duration::from_secs(1));
        bucket.pause();

        assert!(bucket.get_toks(0), "zero is treated as one");
        assert_eq!(bucket.available(), 9);

        assert!(!bucket.get_toks(10));
        assert_eq!(bucket.available(), 9, "nothing taken");

        assert!(bucket.get_toks(9));
        assert_eq!(bucket.available(), 0);
        assert!(!bucket.get_toks(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_fill_and_fill_to() {
        let bucket = TBucket::with_capacity(10, Duration::from_secs(1));
        assert!(bucket.pause());

        bucket.empty();
        assert_eq!(bucket.available(), 0);

        bucket.fill();
        assert_eq!(bucket.available(), 10);

        bucket.fill_to(5);
        assert_eq!(bucket.available(), 5);

        bucket.fill_to(25);
        assert_eq!(bucket.available(), 25, "no clamping");
    }

    #[tokio::test(start_paused = true)]
    async fn over_full_bucket_is_not_trimmed_by_refill() {
        let bucket = TBucket::with_capacity(10, Duration::from_millis(10));
        bucket.fill_to(25);

        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(bucket.available(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_refill() {
        let bucket = TBucket::with_capacity(10, Duration::from_millis(1));

        assert!(!bucket.resume(), "not paused");
        assert!(!bucket.is_paused());

        assert!(bucket.pause());
        assert!(bucket.is_paused());
        assert!(!bucket.pause(), "already paused");

        bucket.empty();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bucket.available(), 0, "no tokens added while paused");

        assert!(bucket.resume());
        time::sleep(Duration::from_millis(10)).await;
        assert!(bucket.available() > 0, "tokens added after resume");

        assert!(bucket.pause());
        let tokens = bucket.available();
        time::sleep(Duration::from_millis(5)).await;
        assert!(bucket.close(), "close while paused");
        time::sleep(Duration::from_millis(5)).await;
        assert_eq!(bucket.available(), tokens);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_permanent() {
        let bucket = TBucket::with_capacity(10, Duration::from_millis(1));

        assert!(!bucket.is_closed());
        assert!(bucket.close());
        assert!(bucket.is_closed());

        bucket.empty();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bucket.available(), 0, "no tokens added once closed");

        assert!(!bucket.close());
        assert!(!bucket.pause());
        assert!(!bucket.resume());
        assert!(!bucket.close());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_still_available_after_close() {
        let bucket = TBucket::with_capacity(3, Duration::from_millis(1));
        bucket.close();

        assert!(bucket.get_tok());
        assert!(bucket.get_toks(2));
        assert!(!bucket.get_tok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_never_overdraw() {
        let bucket = Arc::new(TBucket::with_capacity(1000, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bucket = bucket.clone();
                tokio::spawn(async move {
                    let n = i % 3 + 1;
                    let mut taken = 0;
                    for _ in 0..200 {
                        if bucket.get_toks(n) {
                            taken += n;
                        }
                    }
                    taken
                })
            })
            .collect();

        let mut taken = 0;
        for handle in handles {
            taken += handle.await.unwrap();
        }

        assert_eq!(taken + bucket.available(), 1000);
        assert!(taken >= 998, "only a remainder smaller than 3 can be left");
    }
}
