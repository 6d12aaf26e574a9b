use std::time::Duration;

use async_trait::async_trait;

use super::Admit;

/// A wrapper which adds rejection delay.
///
/// When work is rejected because there are no tokens (and no room in the queue), a delay is added
/// before returning.
///
/// This can help reduce the rate of retries, especially when they are too eager and lack
/// appropriate backoff.
#[derive(Debug)]
pub struct RejectionDelay {
    delay: Duration,
    inner: Box<dyn Admit>,
}

impl RejectionDelay {
    #[allow(missing_docs)]
    pub fn new(delay: Duration, bucket: impl Admit + 'static) -> Self {
        Self {
            delay,
            inner: Box::new(bucket),
        }
    }
}

#[async_trait]
impl Admit for RejectionDelay {
    async fn try_admit(&self) -> bool {
        let admitted = self.inner.try_admit().await;

        if !admitted {
            tokio::time::sleep(self.delay).await;
        }

        admitted
    }

    async fn admit(&self) -> bool {
        let admitted = self.inner.admit().await;

        if !admitted {
            tokio::time::sleep(self.delay).await;
        }

        admitted
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{self, Instant};

    use crate::assert_elapsed;
    use crate::{Admit, RejectionDelay, TBucket, TBucketQ};

    #[tokio::test]
    async fn on_rejection_delay_try_admit() {
        time::pause();

        let delay = Duration::from_millis(5000);

        let bucket = RejectionDelay::new(
            delay,
            TBucket::with_capacity(1, Duration::from_secs(60)),
        );

        assert!(bucket.try_admit().await);

        let before = Instant::now();
        let admitted = bucket.try_admit().await;

        assert!(!admitted);
        assert_elapsed!(before, delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn no_delay_when_admitted_from_the_queue() {
        time::pause();

        let delay = Duration::from_millis(5000);
        let interval = Duration::from_millis(100);

        let bucket = RejectionDelay::new(delay, TBucketQ::new(1, 1, interval, 1));

        assert!(bucket.admit().await);

        let before = Instant::now();
        assert!(bucket.admit().await, "queued until the next tick");
        assert_elapsed!(before, interval, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn on_rejection_delay_admit_with_full_queue() {
        time::pause();

        let delay = Duration::from_millis(5000);

        let bucket = RejectionDelay::new(
            delay,
            TBucketQ::new(1, 1, Duration::from_secs(60), 0),
        );

        assert!(bucket.admit().await);

        let before = Instant::now();
        assert!(!bucket.admit().await);
        assert_elapsed!(before, delay, Duration::from_millis(10));
    }

    /// Assert that a given duration has elapsed since `start`, within the given tolerance.
    #[macro_export]
    #[cfg(test)]
    macro_rules! assert_elapsed {
        ($start:expr, $dur:expr, $tolerance:expr) => {{
            let elapsed = $start.elapsed();
            let lower: std::time::Duration = $dur;

            // Handles ms rounding
            assert!(
                elapsed >= lower && elapsed <= lower + $tolerance,
                "actual = {:?}, expected = {:?}",
                elapsed,
                lower
            );
        }};
    }
}
