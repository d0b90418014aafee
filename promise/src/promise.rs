use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::arena::{Cloner, Dispatch, ProgressListener, SlotKey, Waiter};
use crate::outcome::{downcast_payload, ErasedOutcome, Outcome, Payload, PromiseState};
use crate::progress::Fixed;
use crate::runtime::PromiseRuntime;

enum RawRepr {
    /// Resolved at creation; the value lives in the handle.
    Inline(Payload),
    Slot(SlotKey),
    /// Moved out by a consuming method.
    Consumed,
}

/// Untyped read capability. Owns one reader of its slot and releases it on
/// drop.
pub(crate) struct RawPromise {
    runtime: PromiseRuntime,
    repr: RawRepr,
}

impl RawPromise {
    pub fn inline(runtime: PromiseRuntime, payload: Payload) -> Self {
        Self {
            runtime,
            repr: RawRepr::Inline(payload),
        }
    }

    pub fn slot(runtime: PromiseRuntime, key: SlotKey) -> Self {
        Self {
            runtime,
            repr: RawRepr::Slot(key),
        }
    }

    /// A promise already settled with `outcome`. Only failures take a slot,
    /// so that unobserved rejections can still be reported.
    pub fn settled(runtime: &PromiseRuntime, outcome: ErasedOutcome) -> Self {
        match outcome {
            Outcome::Resolved(payload) => Self::inline(runtime.clone(), payload),
            failure => {
                let (deferred, promise) = runtime.raw_deferred();
                deferred.try_settle(failure);
                promise
            }
        }
    }

    pub fn runtime(&self) -> &PromiseRuntime {
        &self.runtime
    }

    fn take_repr(&mut self) -> RawRepr {
        std::mem::replace(&mut self.repr, RawRepr::Consumed)
    }

    /// Takes the outcome if settled, otherwise hands the promise back.
    pub fn poll(mut self) -> Result<ErasedOutcome, RawPromise> {
        match self.take_repr() {
            RawRepr::Inline(payload) => Ok(Outcome::Resolved(payload)),
            RawRepr::Slot(key) => match self.runtime.take_settled(key) {
                Some(outcome) => Ok(outcome),
                None => {
                    self.repr = RawRepr::Slot(key);
                    Err(self)
                }
            },
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        }
    }

    /// Hands the outcome to `callback` once settled.
    pub fn subscribe(
        mut self,
        dispatch: Dispatch,
        callback: Box<dyn FnOnce(ErasedOutcome) + Send>,
    ) {
        let waiter = Waiter { dispatch, callback };
        match self.take_repr() {
            RawRepr::Inline(payload) => self
                .runtime
                .dispatch(waiter, Outcome::Resolved(payload)),
            RawRepr::Slot(key) => self.runtime.subscribe(key, waiter),
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        }
    }

    /// Drops the reader and marks a rejection of this promise as handled.
    pub fn suppress(mut self) {
        if let RawRepr::Slot(key) = self.take_repr() {
            self.runtime.release_reader(key, true);
        }
    }

    pub fn duplicate(&self, cloner: Cloner) -> RawPromise {
        let repr = match &self.repr {
            RawRepr::Inline(payload) => RawRepr::Inline(cloner(&**payload)),
            RawRepr::Slot(key) => {
                self.runtime.add_reader(*key, cloner);
                RawRepr::Slot(*key)
            }
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        };
        Self {
            runtime: self.runtime.clone(),
            repr,
        }
    }

    pub fn state(&self) -> PromiseState {
        match &self.repr {
            RawRepr::Inline(_) => PromiseState::Resolved,
            RawRepr::Slot(key) => self.runtime.state(*key),
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        }
    }

    pub fn progress(&self) -> Fixed {
        match &self.repr {
            RawRepr::Inline(_) => Fixed::ONE,
            RawRepr::Slot(key) => self.runtime.progress(*key),
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        }
    }

    pub fn add_progress_listener(&self, listener: ProgressListener) {
        match &self.repr {
            RawRepr::Inline(_) => listener(Fixed::ONE),
            RawRepr::Slot(key) => self.runtime.add_progress_listener(*key, listener),
            RawRepr::Consumed => unreachable!("Promise reader used after being consumed"),
        }
    }
}

impl Drop for RawPromise {
    fn drop(&mut self) {
        if let RawRepr::Slot(key) = self.repr {
            self.runtime.release_reader(key, false);
        }
    }
}

fn clone_payload<T: Clone + Send + 'static>(payload: &(dyn Any + Send)) -> Payload {
    match payload.downcast_ref::<T>() {
        Some(value) => Box::new(value.clone()),
        None => unreachable!("Duplicated promise payload changed type"),
    }
}

/// Read capability for an asynchronously produced `T`.
///
/// A promise is consumed by the method that observes it
/// ([`on_settled`](Self::on_settled), [`then`](Self::then),
/// [`into_outcome`](Self::into_outcome) or a combinator). Dropping an
/// unobserved promise releases it; if it ends up rejected, the rejection
/// is reported as unhandled on the next
/// [`report_unhandled_rejections`](PromiseRuntime::report_unhandled_rejections).
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use redlilium_promise::PromiseRuntime;
///
/// let runtime = PromiseRuntime::new();
/// let (deferred, promise) = runtime.deferred::<u32>();
///
/// let seen = Arc::new(Mutex::new(None));
/// let sink = seen.clone();
/// promise
///     .then(|value| value * 2)
///     .on_settled(move |outcome| *sink.lock().unwrap() = outcome.value());
///
/// deferred.resolve(21).unwrap();
/// assert_eq!(*seen.lock().unwrap(), Some(42));
/// ```
pub struct Promise<T> {
    raw: RawPromise,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn from_raw(raw: RawPromise) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_raw(self) -> RawPromise {
        self.raw
    }

    /// The runtime this promise belongs to.
    pub fn runtime(&self) -> &PromiseRuntime {
        self.raw.runtime()
    }

    pub fn state(&self) -> PromiseState {
        self.raw.state()
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    /// Current progress in `[0, 1]`. Only a resolved promise reports `1.0`.
    pub fn progress(&self) -> f32 {
        self.raw.progress().to_f32()
    }

    /// Takes the outcome if the promise is settled, or returns the promise.
    pub fn into_outcome(self) -> Result<Outcome<T>, Promise<T>> {
        match self.raw.poll() {
            Ok(outcome) => Ok(outcome.downcast()),
            Err(raw) => Err(Self::from_raw(raw)),
        }
    }

    /// Runs `callback` with the outcome on the thread that settles the
    /// promise, or immediately if it is already settled.
    pub fn on_settled(self, callback: impl FnOnce(Outcome<T>) + Send + 'static) {
        self.raw.subscribe(
            Dispatch::Inline,
            Box::new(move |outcome| callback(outcome.downcast())),
        );
    }

    /// Runs `callback` on the foreground context once the promise settles.
    pub fn on_settled_foreground(self, callback: impl FnOnce(Outcome<T>) + Send + 'static) {
        self.raw.subscribe(
            Dispatch::Foreground,
            Box::new(move |outcome| callback(outcome.downcast())),
        );
    }

    /// Maps the resolved value. Failures pass through, and progress is
    /// forwarded to the returned promise.
    pub fn then<U, F>(self, map: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let runtime = self.raw.runtime().clone();
        let map = move |payload: Payload| Box::new(map(downcast_payload::<T>(payload))) as Payload;

        match self.raw.poll() {
            Ok(outcome) => Promise::from_raw(RawPromise::settled(&runtime, outcome.map(map))),
            Err(pending) => {
                let (deferred, promise) = runtime.raw_deferred();
                let progress = deferred.clone();
                pending.add_progress_listener(Arc::new(move |value| {
                    progress.try_report(value);
                }));
                pending.subscribe(
                    Dispatch::Inline,
                    Box::new(move |outcome| {
                        deferred.try_settle(outcome.map(map));
                    }),
                );
                Promise::from_raw(promise)
            }
        }
    }

    /// Calls `listener` whenever the progress increases.
    pub fn on_progress(&self, listener: impl Fn(f32) + Send + Sync + 'static) {
        self.raw
            .add_progress_listener(Arc::new(move |value: Fixed| listener(value.to_f32())));
    }

    /// Releases this reader. Same as dropping the promise.
    pub fn forget(self) {
        drop(self);
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a second independent reader of the same result.
    pub fn duplicate(&self) -> Promise<T> {
        Promise::from_raw(self.raw.duplicate(clone_payload::<T>))
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Promise");
        match &self.raw.repr {
            RawRepr::Inline(_) => debug.field("inline", &true),
            RawRepr::Slot(key) => debug.field("index", &key.index).field("read_id", &key.read_id),
            RawRepr::Consumed => debug.field("consumed", &true),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Reason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolved_promise_is_inline() {
        let runtime = PromiseRuntime::new();
        let promise = runtime.resolved(5u32);
        assert_eq!(runtime.live_promise_count(), 0);
        assert_eq!(promise.state(), PromiseState::Resolved);
        assert_eq!(promise.progress(), 1.0);
        assert_eq!(promise.into_outcome().ok().unwrap().value(), Some(5));
    }

    #[test]
    fn pending_into_outcome_returns_promise() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<u32>();
        let promise = promise.into_outcome().err().unwrap();
        deferred.resolve(2).unwrap();
        assert_eq!(promise.into_outcome().ok().unwrap().value(), Some(2));
        assert_eq!(runtime.live_promise_count(), 0);
    }

    #[test]
    fn duplicate_gives_each_reader_a_value() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<String>();
        let copy = promise.duplicate();

        let total = Arc::new(AtomicUsize::new(0));
        for reader in [promise, copy] {
            let total = total.clone();
            reader.on_settled(move |outcome| {
                total.fetch_add(outcome.value().unwrap().len(), Ordering::SeqCst);
            });
        }
        deferred.resolve("abc".to_string()).unwrap();

        assert_eq!(total.load(Ordering::SeqCst), 6);
        assert_eq!(runtime.live_promise_count(), 0);
    }

    #[test]
    fn duplicate_inline_clones_value() {
        let runtime = PromiseRuntime::new();
        let promise = runtime.resolved(vec![1, 2]);
        let copy = promise.duplicate();
        assert_eq!(promise.into_outcome().ok().unwrap().value(), Some(vec![1, 2]));
        assert_eq!(copy.into_outcome().ok().unwrap().value(), Some(vec![1, 2]));
    }

    #[test]
    fn then_maps_and_forwards_failures() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<u32>();
        let mapped = promise.then(|value| value.to_string());
        deferred.reject("broken").unwrap();

        let outcome = mapped.into_outcome().ok().unwrap();
        assert_eq!(outcome.state(), PromiseState::Rejected);
        assert_eq!(outcome.reason().and_then(Reason::message), Some("broken"));
        assert_eq!(runtime.report_unhandled_rejections(), 0);
    }

    #[test]
    fn then_forwards_progress() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<u32>();
        let mapped = promise.then(|value| value + 1);

        deferred.report_progress(0.5).unwrap();
        assert!((mapped.progress() - 0.5).abs() < 1e-3);

        deferred.resolve(1).unwrap();
        assert_eq!(mapped.progress(), 1.0);
    }

    #[test]
    fn on_progress_reports_increases() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<()>();
        let reports = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = reports.clone();
        promise.on_progress(move |value| sink.lock().push(value));

        deferred.report_progress(0.25).unwrap();
        deferred.report_progress(0.1).unwrap();
        deferred.report_progress(0.75).unwrap();
        deferred.resolve(()).unwrap();

        let reports = reports.lock();
        assert_eq!(reports.len(), 3);
        assert!(reports.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(*reports.last().unwrap(), 1.0);
    }

    #[test]
    fn forget_pending_rejection_surfaces_unhandled() {
        let runtime = PromiseRuntime::new();
        let (deferred, promise) = runtime.deferred::<()>();
        promise.forget();
        deferred.reject("forgotten").unwrap();
        assert_eq!(runtime.pending_unhandled_rejections(), 1);
    }

    #[test]
    fn rejected_constructor_reports_if_dropped() {
        let runtime = PromiseRuntime::new();
        drop(runtime.rejected::<u8>("dropped"));
        drop(runtime.canceled::<u8>());
        assert_eq!(runtime.report_unhandled_rejections(), 1);
    }
}
