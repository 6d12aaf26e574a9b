//! A common interface over the token buckets.

use std::fmt::Debug;

use async_trait::async_trait;

pub use rejection_delay::RejectionDelay;

mod rejection_delay;

/// Decides whether a unit of work may proceed.
///
/// Implemented by [TBucket](crate::TBucket), which never waits, and [TBucketQ](crate::TBucketQ),
/// which can queue callers until a token is available.
#[async_trait]
pub trait Admit: Debug + Send + Sync {
    /// Try to take a token without waiting in a queue.
    ///
    /// Returns `false` if the work should be rejected.
    async fn try_admit(&self) -> bool;

    /// Take a token, waiting for one if the implementation supports queueing.
    ///
    /// Returns `false` if the work should be rejected.
    async fn admit(&self) -> bool;
}
