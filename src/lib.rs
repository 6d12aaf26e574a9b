//! Lock-free token buckets for admission control, with optional bounded waiting.
//!
//! - [TBucket] never waits: a token is either available right now, or the work is rejected.
//! - [TBucketQ] lets a bounded number of callers wait for the next refill, rejecting the rest.
//!
//! Both refill from a background task on the Tokio runtime they were created in, and can be
//! paused, resumed and closed.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod admit;
mod bucket;
mod config;
mod control;
mod counter;
mod error;
mod limiter;
mod list;
mod pool;

pub use admit::{Admit, RejectionDelay};
pub use bucket::{TBucket, TBucketQ};
pub use config::BucketConfig;
pub use counter::Counter;
pub use error::Error;
pub use limiter::Limiter;
pub use list::List;
pub use pool::Pool;
