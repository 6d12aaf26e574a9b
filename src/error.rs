use tokio::runtime::TryCurrentError;

/// Failure to construct a component which owns a background task.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Constructed outside of a Tokio runtime, so there is nowhere to run the background task.
    #[error("no Tokio runtime available to run the refill task: {0}")]
    NoRuntime(#[from] TryCurrentError),
}
