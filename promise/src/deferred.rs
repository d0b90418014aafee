use std::fmt;
use std::marker::PhantomData;

use crate::arena::WriteKey;
use crate::error::PromiseError;
use crate::outcome::{ErasedOutcome, Outcome, Reason};
use crate::progress::Fixed;
use crate::runtime::PromiseRuntime;

/// Untyped write capability shared by [`Deferred`] and the combinators.
///
/// Counted by the slot: clones add a writer and drops remove one.
pub(crate) struct RawDeferred {
    runtime: PromiseRuntime,
    key: WriteKey,
}

impl RawDeferred {
    pub fn new(runtime: PromiseRuntime, key: WriteKey) -> Self {
        Self { runtime, key }
    }

    pub fn key(&self) -> WriteKey {
        self.key
    }

    pub fn try_settle(&self, outcome: ErasedOutcome) -> bool {
        self.runtime.settle(self.key, outcome)
    }

    pub fn try_report(&self, progress: Fixed) -> bool {
        self.runtime.report_progress(self.key, progress)
    }

    pub fn is_valid_and_pending(&self) -> bool {
        self.runtime.is_writable(self.key)
    }
}

impl Clone for RawDeferred {
    fn clone(&self) -> Self {
        self.runtime.add_writer(self.key);
        Self {
            runtime: self.runtime.clone(),
            key: self.key,
        }
    }
}

impl Drop for RawDeferred {
    fn drop(&mut self) {
        self.runtime.release_writer(self.key);
    }
}

/// Write capability for one promise.
///
/// Any clone may settle the promise, from any thread, but only the first
/// settlement wins. After that every settling call fails:
/// the `try_*` methods return `false` and the others return
/// [`PromiseError::InvalidHandle`].
///
/// Dropping the last clone without settling cancels the promise, or frees
/// it right away if nothing reads it.
pub struct Deferred<T> {
    raw: RawDeferred,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Deferred<T> {
    pub(crate) fn from_raw(raw: RawDeferred) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns `true` while this deferred can still settle its promise.
    pub fn is_valid_and_pending(&self) -> bool {
        self.raw.is_valid_and_pending()
    }

    pub fn try_resolve(&self, value: T) -> bool {
        self.raw.try_settle(Outcome::Resolved(value).erase())
    }

    pub fn try_reject(&self, reason: impl Into<Reason>) -> bool {
        self.raw.try_settle(Outcome::Rejected(reason.into()))
    }

    /// Cancels with the default reason.
    pub fn try_cancel(&self) -> bool {
        self.try_cancel_with(Reason::canceled())
    }

    pub fn try_cancel_with(&self, reason: impl Into<Reason>) -> bool {
        self.raw.try_settle(Outcome::Canceled(reason.into()))
    }

    pub fn resolve(&self, value: T) -> Result<(), PromiseError> {
        checked(self.try_resolve(value))
    }

    pub fn reject(&self, reason: impl Into<Reason>) -> Result<(), PromiseError> {
        checked(self.try_reject(reason))
    }

    pub fn cancel(&self) -> Result<(), PromiseError> {
        checked(self.try_cancel())
    }

    pub fn cancel_with(&self, reason: impl Into<Reason>) -> Result<(), PromiseError> {
        checked(self.try_cancel_with(reason))
    }

    /// Reports progress in `[0, 1]`.
    ///
    /// Progress never decreases: a value lower than the last report is
    /// accepted and ignored. A pending promise reports at most just under
    /// `1.0`; the full value is reached on resolution.
    pub fn report_progress(&self, progress: f32) -> Result<(), PromiseError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(PromiseError::ProgressOutOfRange { value: progress });
        }
        checked(self.raw.try_report(Fixed::from_f32(progress)))
    }

    /// Like [`report_progress`](Self::report_progress), returning `false`
    /// for stale handles and out-of-range values.
    pub fn try_report_progress(&self, progress: f32) -> bool {
        self.report_progress(progress).is_ok()
    }
}

fn checked(settled: bool) -> Result<(), PromiseError> {
    if settled {
        Ok(())
    } else {
        Err(PromiseError::InvalidHandle)
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("index", &self.raw.key.index)
            .field("write_id", &self.raw.key.write_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::PromiseState;

    #[test]
    fn settle_variants_report_invalid_handle() {
        let runtime = PromiseRuntime::new();
        let (deferred, _promise) = runtime.deferred::<u8>();
        deferred.cancel_with("first").unwrap();

        assert_eq!(deferred.resolve(1), Err(PromiseError::InvalidHandle));
        assert_eq!(deferred.reject("x"), Err(PromiseError::InvalidHandle));
        assert_eq!(deferred.cancel(), Err(PromiseError::InvalidHandle));
        assert_eq!(deferred.report_progress(0.5), Err(PromiseError::InvalidHandle));
    }

    #[test]
    fn progress_validation() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<u8>();

        assert!(matches!(
            deferred.report_progress(1.5),
            Err(PromiseError::ProgressOutOfRange { .. })
        ));
        assert!(!deferred.try_report_progress(f32::NAN));
        assert!(!deferred.try_report_progress(-0.1));

        deferred.report_progress(0.5).unwrap();
        deferred.report_progress(0.25).unwrap();
        assert!((promise.progress() - 0.5).abs() < 1e-3);

        deferred.report_progress(1.0).unwrap();
        assert!(promise.progress() < 1.0);
        assert_eq!(promise.state(), PromiseState::Pending);

        deferred.resolve(1).unwrap();
        assert_eq!(promise.progress(), 1.0);
    }

    #[test]
    fn dropping_last_clone_cancels_read_promise() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<u8>();
        let other = deferred.clone();
        drop(deferred);
        assert_eq!(promise.state(), PromiseState::Pending);

        drop(other);
        let outcome = promise.into_outcome().ok().unwrap();
        assert_eq!(outcome.state(), PromiseState::Canceled);
        assert_eq!(
            outcome.reason().and_then(crate::Reason::message),
            Some(crate::runtime::ABANDONED)
        );
        assert_eq!(runtime.report_unhandled_rejections(), 0);
        assert_eq!(runtime.live_promise_count(), 0);
    }

    #[test]
    fn unread_abandoned_promise_is_freed() {
        let runtime = PromiseRuntime::new();
        for _ in 0..10 {
            let (deferred, promise) = runtime.deferred::<u32>();
            drop(promise);
            drop(deferred);
        }
        assert_eq!(runtime.live_promise_count(), 0);
    }

    #[test]
    fn clones_share_the_write_capability() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<&'static str>();
        let other = deferred.clone();
        assert!(other.try_resolve("clone"));
        assert!(!deferred.is_valid_and_pending());
        assert_eq!(promise.into_outcome().ok().unwrap().value(), Some("clone"));
    }
}
