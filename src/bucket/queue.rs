use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Semaphore, time::timeout};
use tracing::trace;

use crate::{
    control::{Lifecycle, Replenish},
    Admit, BucketConfig, Error,
};

use super::Tokens;

/// A token bucket with a bounded queue of waiting callers.
///
/// Behaves like [TBucket](super::TBucket), except that a caller of [get_tok()](Self::get_tok)
/// who finds the bucket empty can wait for a token, as long as fewer than `max_queue` callers are
/// already waiting. Once the queue is full, callers are rejected immediately.
///
/// On each refill tick, tokens go to waiting callers first. Only the remainder of the burst is
/// added to the bucket.
///
/// Waiters are served roughly, but not strictly, in arrival order.
#[derive(Debug)]
pub struct TBucketQ {
    queue: Arc<Queue>,
    refill_interval: Duration,
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct Queue {
    tokens: Tokens,

    max_queue: usize,
    /// Waiters which haven't had a token routed to them yet.
    queued: AtomicUsize,
    /// Tokens routed to waiters which gave up before picking them up.
    forfeited: AtomicUsize,
    /// One permit per token routed to the queue.
    handoff: Semaphore,
}

/// A reserved place in the queue. Released on drop unless a token was received.
struct Slot<'q> {
    queue: &'q Queue,
    granted: bool,
}

impl TBucketQ {
    /// Create a full bucket which adds `burst` tokens every `refill_interval`, allowing up to
    /// `max_queue` callers to wait for a token.
    ///
    /// Zero for `bucket_size` or `burst` is treated as 1. A `max_queue` of zero disables
    /// queueing.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        bucket_size: usize,
        burst: usize,
        refill_interval: Duration,
        max_queue: usize,
    ) -> Self {
        Self::from_config(
            BucketConfig::new(bucket_size, refill_interval)
                .burst(burst)
                .max_queue(max_queue),
        )
    }

    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_config(config: BucketConfig) -> Self {
        Self::try_from_config(config).expect("TBucketQ must be created within a Tokio runtime")
    }

    /// Create a bucket, failing if there is no Tokio runtime to run the refill task.
    pub fn try_from_config(config: BucketConfig) -> Result<Self, Error> {
        let queue = Arc::new(Queue {
            tokens: Tokens::full(&config),
            max_queue: config.max_queue,
            queued: AtomicUsize::new(0),
            forfeited: AtomicUsize::new(0),
            handoff: Semaphore::new(0),
        });
        let lifecycle = Lifecycle::start(queue.clone(), config.refill_interval)?;

        Ok(Self {
            queue,
            refill_interval: config.refill_interval,
            lifecycle,
        })
    }

    /// Take a token, waiting in the queue if the bucket is empty.
    ///
    /// Returns `false` without waiting if the queue is full. Returns `false` if the bucket is
    /// closed while waiting.
    ///
    /// Cancel safe: dropping the future gives up the place in the queue.
    pub async fn get_tok(&self) -> bool {
        if self.get_tok_now() {
            return true;
        }

        match self.queue.reserve() {
            Some(slot) => slot.wait().await,
            None => {
                trace!(max_queue = self.queue.max_queue, "queue full, rejecting");
                false
            }
        }
    }

    /// Like [get_tok()](Self::get_tok), but gives up after `duration`.
    pub async fn get_tok_timeout(&self, duration: Duration) -> bool {
        timeout(duration, self.get_tok()).await.unwrap_or(false)
    }

    /// Try to take a single token without queueing.
    pub fn get_tok_now(&self) -> bool {
        self.queue.tokens.take(1)
    }

    /// Try to take `n` tokens without queueing, all or nothing. Zero is treated as 1.
    pub fn get_toks_now(&self, n: usize) -> bool {
        self.queue.tokens.take(n.max(1))
    }

    /// Remove all tokens from the bucket. Waiters are unaffected.
    pub fn empty(&self) {
        self.queue.tokens.set(0);
    }

    /// Fill the bucket to its size. Waiters are unaffected.
    pub fn fill(&self) {
        self.queue.tokens.set(self.queue.tokens.bucket_size);
    }

    /// Set the number of available tokens to exactly `n`, which may exceed the bucket size.
    pub fn fill_to(&self, n: usize) {
        self.queue.tokens.set(n);
    }

    /// Stop refilling the bucket and serving the queue. Waiters stay queued.
    ///
    /// Returns `false` if already paused or closed.
    pub fn pause(&self) -> bool {
        self.lifecycle.pause()
    }

    /// Returns `false` if not paused, or closed.
    pub fn resume(&self) -> bool {
        self.lifecycle.resume()
    }

    /// Permanently stop refilling. Every waiting caller is woken and fails.
    ///
    /// Returns `true` exactly once.
    pub fn close(&self) -> bool {
        if !self.lifecycle.close() {
            return false;
        }
        self.queue.handoff.close();
        true
    }

    /// Whether [close()](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Whether refilling is paused.
    pub fn is_paused(&self) -> bool {
        self.lifecycle.is_paused()
    }

    /// The number of tokens currently in the bucket.
    pub fn available(&self) -> usize {
        self.queue.tokens.available()
    }

    /// The number of callers waiting for a token to be routed to them.
    pub fn queued(&self) -> usize {
        self.queue.queued.load(Ordering::SeqCst)
    }

    /// The most callers which can wait at once.
    pub fn max_queue(&self) -> usize {
        self.queue.max_queue
    }

    /// The maximum number of tokens added by refilling.
    pub fn bucket_size(&self) -> usize {
        self.queue.tokens.bucket_size
    }

    /// Tokens routed or added per refill tick.
    pub fn burst(&self) -> usize {
        self.queue.tokens.burst()
    }

    /// Time between refill ticks.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

#[async_trait]
impl Admit for TBucketQ {
    async fn try_admit(&self) -> bool {
        self.get_tok_now()
    }

    async fn admit(&self) -> bool {
        self.get_tok().await
    }
}

impl Queue {
    fn reserve(&self) -> Option<Slot<'_>> {
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < self.max_queue).then_some(queued + 1)
            })
            .ok()
            .map(|_| Slot {
                queue: self,
                granted: false,
            })
    }

    /// Route up to `burst` tokens to waiters. Returns the number routed.
    fn route_to_waiters(&self, burst: usize) -> usize {
        let offered = self.offer_to_waiters(burst);
        self.settle(offered)
    }

    /// Release a permit for each of up to `burst` waiters, who stay counted until
    /// [settle()](Self::settle). A waiter leaving in between finds itself still counted, so it
    /// never forfeits a permit which a newcomer may have taken.
    fn offer_to_waiters(&self, burst: usize) -> usize {
        let offered = self.queued.load(Ordering::SeqCst).min(burst);
        if offered > 0 {
            self.handoff.add_permits(offered);
        }
        offered
    }

    /// Stop counting the waiters `offered` permits were released for. Permits for waiters who
    /// have left since are taken back. Returns the number routed.
    fn settle(&self, offered: usize) -> usize {
        let routed = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued > 0 && offered > 0).then(|| queued - queued.min(offered))
            })
            .map_or(0, |queued| queued.min(offered));

        for _ in routed..offered {
            self.take_back();
        }
        routed
    }

    /// Reclaim tokens routed to waiters who have since left.
    fn reclaim_forfeited(&self) {
        while self.forfeited.load(Ordering::SeqCst) > 0 {
            match self.handoff.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    self.forfeited.fetch_sub(1, Ordering::SeqCst);
                }
                Err(_) => break,
            }
        }
    }

    fn leave(&self) {
        if self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                queued.checked_sub(1)
            })
            .is_ok()
        {
            return;
        }

        // A token has already been routed for us. Take it back so it isn't handed to a caller
        // who never queued.
        self.take_back();
    }

    /// Remove one routed permit, now or on the next tick if it's still held by a waking waiter.
    fn take_back(&self) {
        match self.handoff.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => {
                self.forfeited.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl Replenish for Queue {
    fn on_tick(&self) {
        self.reclaim_forfeited();

        let burst = self.tokens.burst();
        let routed = self.route_to_waiters(burst);
        let added = if routed < burst {
            self.tokens.refill(burst - routed)
        } else {
            0
        };

        trace!(routed, added, "refilled bucket");
    }
}

impl Slot<'_> {
    async fn wait(mut self) -> bool {
        match self.queue.handoff.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.granted = true;
                true
            }
            // Closed
            Err(_) => false,
        }
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.granted {
            self.queue.leave();
        }
    }
}
