use thiserror::Error;

/// Errors raised across the promise API boundary.
///
/// Rejections and cancellations are *not* errors: they travel inside
/// [`Outcome`](crate::Outcome) values. This enum only covers misuse of the
/// API itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PromiseError {
    /// The handle refers to a recycled slot or to a promise that has
    /// already been settled.
    #[error("Promise handle is stale or already settled")]
    InvalidHandle,

    /// A combinator was called with no input promises.
    #[error("{operation} requires at least one input promise")]
    EmptyArgument {
        /// Name of the rejected combinator.
        operation: &'static str,
    },

    /// A progress report outside of `[0, 1]` (or NaN).
    #[error("Progress value {value} is outside of [0, 1]")]
    ProgressOutOfRange {
        /// The offending value.
        value: f32,
    },

    /// A scheduler entry point was called from a thread other than the one
    /// the scheduler is confined to.
    #[error("{operation} must be called on the thread that owns the scheduler")]
    WrongThread {
        /// Name of the entry point.
        operation: &'static str,
    },
}
