use std::time::Duration;

/// Construction parameters for [TBucket](crate::TBucket) and [TBucketQ](crate::TBucketQ).
///
/// Out of range values are clamped rather than rejected:
/// - a bucket size of 0 becomes 1
/// - a burst of 0 becomes 1
/// - a zero refill interval becomes [BucketConfig::MIN_REFILL_INTERVAL]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub(crate) bucket_size: usize,
    pub(crate) burst: usize,
    pub(crate) refill_interval: Duration,
    pub(crate) max_queue: usize,
}

impl BucketConfig {
    const DEFAULT_BURST: usize = 1;
    const DEFAULT_MAX_QUEUE: usize = 0;

    /// The shortest refill interval the timer will run at.
    pub const MIN_REFILL_INTERVAL: Duration = Duration::from_millis(1);

    /// A bucket holding at most `bucket_size` tokens, adding one token every `refill_interval`.
    pub fn new(bucket_size: usize, refill_interval: Duration) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            burst: Self::DEFAULT_BURST,
            refill_interval: refill_interval.max(Self::MIN_REFILL_INTERVAL),
            max_queue: Self::DEFAULT_MAX_QUEUE,
        }
    }

    /// Tokens added on each refill tick.
    pub fn burst(self, burst: usize) -> Self {
        Self {
            burst: burst.max(1),
            ..self
        }
    }

    /// Maximum number of callers allowed to wait for a token. Only used by
    /// [TBucketQ](crate::TBucketQ).
    ///
    /// Zero disables queueing, so an empty bucket rejects immediately.
    pub fn max_queue(self, max_queue: usize) -> Self {
        Self { max_queue, ..self }
    }

    /// The maximum number of tokens the bucket can hold.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// The refill interval after clamping.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}
