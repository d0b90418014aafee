use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::arena::{
    Cloner, Dispatch, ProgressListener, Released, SlotKey, StateArena, Waiter, WriteKey,
};
use crate::cancel::{CancelationRegistration, CancelationToken};
use crate::config::RuntimeConfig;
use crate::deferred::{Deferred, RawDeferred};
use crate::foreground::ForegroundContext;
use crate::outcome::{ErasedOutcome, Outcome, PromiseState, Reason};
use crate::pass_through::PassThrough;
use crate::pool::{ObjectPool, PoolStats};
use crate::progress::Fixed;
use crate::promise::{Promise, RawPromise};

/// Cancel reason for a promise whose every deferred was dropped unsettled.
pub(crate) const ABANDONED: &str = "deferred dropped before settling";

type UnhandledRejectionHandler = Arc<dyn Fn(&Reason) + Send + Sync>;

pub(crate) struct RuntimeInner {
    arena: Mutex<StateArena>,
    pass_throughs: ObjectPool<PassThrough>,
    foreground: ForegroundContext,
    unhandled: Mutex<Vec<Reason>>,
    unhandled_handler: Mutex<UnhandledRejectionHandler>,
    config: RuntimeConfig,
}

/// Owner of every promise slot, the pass-through pool and the foreground
/// queue.
///
/// Cheap to clone; clones share the same state. Promises and deferreds
/// keep the runtime alive.
///
/// # Example
///
/// ```
/// use redlilium_promise::{Outcome, PromiseRuntime};
///
/// let runtime = PromiseRuntime::new();
/// let (deferred, promise) = runtime.deferred::<u32>();
///
/// deferred.resolve(7).unwrap();
/// // A second settlement is refused.
/// assert!(!deferred.try_resolve(8));
///
/// match promise.into_outcome() {
///     Ok(Outcome::Resolved(value)) => assert_eq!(value, 7),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Clone)]
pub struct PromiseRuntime {
    inner: Arc<RuntimeInner>,
}

impl PromiseRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                arena: Mutex::new(StateArena::with_capacity(config.slot_capacity_hint)),
                pass_throughs: ObjectPool::new(config.pass_through_pool_capacity),
                foreground: ForegroundContext::new(),
                unhandled: Mutex::new(Vec::new()),
                unhandled_handler: Mutex::new(Arc::new(|reason: &Reason| {
                    log::error!("Unhandled promise rejection: {reason}");
                })),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Creates a pending promise and the deferred that settles it.
    pub fn deferred<T: Send + 'static>(&self) -> (Deferred<T>, Promise<T>) {
        let (deferred, promise) = self.raw_deferred();
        (Deferred::from_raw(deferred), Promise::from_raw(promise))
    }

    /// Like [`deferred`](Self::deferred), but cancels the promise when
    /// `token` fires first.
    ///
    /// A token that is already canceled cancels the promise immediately.
    /// The token registration is disposed when the promise settles.
    pub fn deferred_with_token<T: Send + 'static>(
        &self,
        token: &CancelationToken,
    ) -> (Deferred<T>, Promise<T>) {
        let (deferred, promise) = self.raw_deferred_with_token(token);
        (Deferred::from_raw(deferred), Promise::from_raw(promise))
    }

    /// An already resolved promise. Does not allocate a slot.
    pub fn resolved<T: Send + 'static>(&self, value: T) -> Promise<T> {
        Promise::from_raw(RawPromise::inline(self.clone(), Box::new(value)))
    }

    /// An already rejected promise.
    pub fn rejected<T: Send + 'static>(&self, reason: impl Into<Reason>) -> Promise<T> {
        Promise::from_raw(RawPromise::settled(self, Outcome::Rejected(reason.into())))
    }

    /// An already canceled promise with the default reason.
    pub fn canceled<T: Send + 'static>(&self) -> Promise<T> {
        self.canceled_with(Reason::canceled())
    }

    /// An already canceled promise.
    pub fn canceled_with<T: Send + 'static>(&self, reason: impl Into<Reason>) -> Promise<T> {
        Promise::from_raw(RawPromise::settled(self, Outcome::Canceled(reason.into())))
    }

    pub(crate) fn raw_deferred(&self) -> (RawDeferred, RawPromise) {
        let (read, write) = self.inner.arena.lock().allocate();
        (
            RawDeferred::new(self.clone(), write),
            RawPromise::slot(self.clone(), read),
        )
    }

    pub(crate) fn raw_deferred_with_token(
        &self,
        token: &CancelationToken,
    ) -> (RawDeferred, RawPromise) {
        let (deferred, promise) = self.raw_deferred();
        if let Some(reason) = token.reason() {
            deferred.try_settle(Outcome::Canceled(reason));
            return (deferred, promise);
        }

        let weak = Arc::downgrade(&self.inner);
        let key = deferred.key();
        match token.try_register(move |reason| cancel_slot(&weak, key, reason)) {
            Some(registration) => self.attach_registration(key, registration),
            None => {
                // Lost a race with the source.
                if let Some(reason) = token.reason() {
                    deferred.try_settle(Outcome::Canceled(reason));
                }
            }
        }
        (deferred, promise)
    }

    // -----------------------------------------------------------------------
    // Foreground and diagnostics
    // -----------------------------------------------------------------------

    /// The queue drained on the confined thread.
    pub fn foreground(&self) -> &ForegroundContext {
        &self.inner.foreground
    }

    /// Drains the foreground queue. Returns the number of closures run.
    pub fn execute_foreground(&self) -> usize {
        self.inner.foreground.execute()
    }

    /// Replaces the handler called for unobserved rejections. The default
    /// handler logs at error level.
    pub fn set_unhandled_rejection_handler(
        &self,
        handler: impl Fn(&Reason) + Send + Sync + 'static,
    ) {
        *self.inner.unhandled_handler.lock() = Arc::new(handler);
    }

    /// Reports every queued unhandled rejection through the handler, once
    /// each. Returns how many were reported.
    pub fn report_unhandled_rejections(&self) -> usize {
        let reasons = std::mem::take(&mut *self.inner.unhandled.lock());
        if reasons.is_empty() {
            return 0;
        }
        let handler = self.inner.unhandled_handler.lock().clone();
        for reason in &reasons {
            handler(reason);
        }
        reasons.len()
    }

    /// Number of unhandled rejections waiting for the next report.
    pub fn pending_unhandled_rejections(&self) -> usize {
        self.inner.unhandled.lock().len()
    }

    /// Number of promise slots currently in use.
    pub fn live_promise_count(&self) -> usize {
        self.inner.arena.lock().live_count()
    }

    pub fn pass_through_pool_stats(&self) -> PoolStats {
        self.inner.pass_throughs.stats()
    }

    pub(crate) fn pass_throughs(&self) -> &ObjectPool<PassThrough> {
        &self.inner.pass_throughs
    }

    // -----------------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------------

    /// Settles the slot behind `key`. Returns `false` if another settlement
    /// already won or the key is stale.
    pub(crate) fn settle(&self, key: WriteKey, outcome: ErasedOutcome) -> bool {
        let resolved = outcome.is_resolved();
        let (read, waiters, listeners, registration, released) = {
            let mut arena = self.inner.arena.lock();
            let Some(slot) = arena.writable(key) else {
                return false;
            };
            slot.write_id = slot.write_id.wrapping_add(1);
            slot.state = outcome.state();
            slot.result = Some(outcome);
            if resolved {
                slot.progress = Fixed::ONE;
            }
            let listeners = std::mem::take(&mut slot.progress_listeners);
            let waiters = std::mem::take(&mut slot.waiters);
            let registration = slot.registration.take();
            let read = slot.read_key(key.index);
            let released = (slot.readers == 0).then(|| arena.release(key.index));
            (read, waiters, listeners, registration, released)
        };

        drop(registration);
        if resolved {
            for listener in &listeners {
                listener(Fixed::ONE);
            }
        }
        drop(listeners);
        if let Some(released) = released {
            self.finish_release(released);
        }
        for waiter in waiters {
            self.deliver(read, waiter);
        }
        true
    }

    pub(crate) fn is_writable(&self, key: WriteKey) -> bool {
        self.inner.arena.lock().is_writable(key)
    }

    /// Raises the progress of a pending slot. Values are capped below 1.0
    /// and lower values than the current one are ignored.
    pub(crate) fn report_progress(&self, key: WriteKey, value: Fixed) -> bool {
        let value = value.pending();
        let listeners = {
            let mut arena = self.inner.arena.lock();
            let Some(slot) = arena.writable(key) else {
                return false;
            };
            if value <= slot.progress {
                return true;
            }
            slot.progress = value;
            slot.progress_listeners.clone()
        };
        for listener in &listeners {
            listener(value);
        }
        true
    }

    pub(crate) fn add_writer(&self, key: WriteKey) {
        if let Some(slot) = self.inner.arena.lock().writable(key) {
            slot.writers += 1;
        }
    }

    /// Drops one write capability. A pending slot whose last writer is gone
    /// can never settle normally: it is released if nobody reads it, and
    /// canceled otherwise so its continuations still run.
    pub(crate) fn release_writer(&self, key: WriteKey) {
        let released = {
            let mut arena = self.inner.arena.lock();
            let Some(slot) = arena.writable(key) else {
                return;
            };
            slot.writers -= 1;
            if slot.writers > 0 {
                return;
            }
            if slot.readers > 0 {
                None
            } else {
                Some(arena.release(key.index))
            }
        };
        match released {
            Some(released) => self.finish_release(released),
            None => {
                self.settle(key, Outcome::Canceled(Reason::new(ABANDONED)));
            }
        }
    }

    fn attach_registration(&self, key: WriteKey, registration: CancelationRegistration) {
        let rejected = {
            let mut arena = self.inner.arena.lock();
            match arena.writable(key) {
                Some(slot) => {
                    slot.registration = Some(registration);
                    None
                }
                None => Some(registration),
            }
        };
        drop(rejected);
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub(crate) fn state(&self, key: SlotKey) -> PromiseState {
        self.inner
            .arena
            .lock()
            .get(key)
            .map(|slot| slot.state)
            .expect("Promise reader outlived its slot")
    }

    pub(crate) fn progress(&self, key: SlotKey) -> Fixed {
        self.inner
            .arena
            .lock()
            .get(key)
            .map(|slot| slot.progress)
            .expect("Promise reader outlived its slot")
    }

    /// Registers a continuation, or runs it now if the slot is settled.
    /// The reader held by the caller moves into the waiter.
    pub(crate) fn subscribe(&self, key: SlotKey, waiter: Waiter) {
        {
            let mut arena = self.inner.arena.lock();
            let slot = arena
                .get_mut(key)
                .expect("Promise reader outlived its slot");
            if slot.state == PromiseState::Pending {
                slot.waiters.push(waiter);
                return;
            }
        }
        self.deliver(key, waiter);
    }

    /// Consumes one reader of a settled slot and returns its outcome.
    /// Returns `None`, keeping the reader, while the slot is pending.
    pub(crate) fn take_settled(&self, key: SlotKey) -> Option<ErasedOutcome> {
        let (outcome, released) = {
            let mut arena = self.inner.arena.lock();
            let slot = arena
                .get_mut(key)
                .expect("Promise reader outlived its slot");
            if slot.state == PromiseState::Pending {
                return None;
            }
            slot.readers -= 1;
            if slot.state == PromiseState::Rejected {
                slot.observed = true;
            }
            if slot.readers > 0 {
                (slot.clone_result(), None)
            } else {
                let mut released = arena.release(key.index);
                (released.leftover.take(), Some(released))
            }
        };
        if let Some(released) = released {
            self.finish_release(released);
        }
        outcome
    }

    /// Drops one reader. `suppress` marks a rejection as handled.
    pub(crate) fn release_reader(&self, key: SlotKey, suppress: bool) {
        let released = {
            let mut arena = self.inner.arena.lock();
            let Some(slot) = arena.get_mut(key) else {
                return;
            };
            slot.suppressed |= suppress;
            slot.readers -= 1;
            let abandoned = slot.state == PromiseState::Pending && slot.writers == 0;
            if slot.readers > 0 || (slot.state == PromiseState::Pending && !abandoned) {
                return;
            }
            arena.release(key.index)
        };
        self.finish_release(released);
    }

    pub(crate) fn add_reader(&self, key: SlotKey, cloner: Cloner) {
        let mut arena = self.inner.arena.lock();
        let slot = arena
            .get_mut(key)
            .expect("Promise reader outlived its slot");
        slot.readers += 1;
        slot.cloner = Some(cloner);
    }

    /// Calls `listener` on every progress increase of the slot. A slot
    /// that already made progress reports its current value right away.
    pub(crate) fn add_progress_listener(&self, key: SlotKey, listener: ProgressListener) {
        let current = {
            let mut arena = self.inner.arena.lock();
            let slot = arena
                .get_mut(key)
                .expect("Promise reader outlived its slot");
            match slot.state {
                PromiseState::Pending => {
                    slot.progress_listeners.push(listener.clone());
                    slot.progress
                }
                PromiseState::Resolved => Fixed::ONE,
                PromiseState::Rejected | PromiseState::Canceled => Fixed::ZERO,
            }
        };
        if current > Fixed::ZERO {
            listener(current);
        }
    }

    fn deliver(&self, key: SlotKey, waiter: Waiter) {
        let outcome = self
            .take_settled(key)
            .expect("Delivered a continuation for a pending slot");
        self.dispatch(waiter, outcome);
    }

    pub(crate) fn dispatch(&self, waiter: Waiter, outcome: ErasedOutcome) {
        let Waiter { dispatch, callback } = waiter;
        match dispatch {
            Dispatch::Inline => callback(outcome),
            Dispatch::Foreground => self
                .inner
                .foreground
                .post(Box::new(move || callback(outcome))),
        }
    }

    fn finish_release(&self, released: Released) {
        let Released {
            leftover,
            listeners,
            registration,
            unhandled,
        } = released;
        if let Some(reason) = unhandled {
            self.inner.unhandled.lock().push(reason);
        }
        drop(registration);
        drop(listeners);
        drop(leftover);
    }
}

impl Default for PromiseRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PromiseRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseRuntime")
            .field("live_promises", &self.live_promise_count())
            .field("pending_foreground", &self.inner.foreground.pending_count())
            .finish()
    }
}

/// Token callback for `deferred_with_token`. Holds the runtime weakly so a
/// registration left in a long-lived token does not keep it alive.
fn cancel_slot(runtime: &Weak<RuntimeInner>, key: WriteKey, reason: Reason) {
    if let Some(inner) = runtime.upgrade() {
        PromiseRuntime { inner }.settle(key, Outcome::Canceled(reason));
    }
}
