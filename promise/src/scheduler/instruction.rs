/// A wait condition evaluated once per tick by the [`FrameScheduler`](crate::FrameScheduler).
///
/// Instructions are stored by value in a queue dedicated to their concrete
/// type, so implementors should be small. `evaluate` returns `true` when the
/// wait is over; the instruction is then dropped. Returning `false` keeps it
/// queued for the next tick of the same phase.
pub trait WaitInstruction: Send + 'static {
    fn evaluate(&mut self) -> bool;
}

/// Finishes on its first evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOneTick;

impl WaitInstruction for WaitOneTick {
    fn evaluate(&mut self) -> bool {
        true
    }
}

/// Finishes on its `n`-th evaluation. `WaitTicks(0)` behaves like
/// [`WaitOneTick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTicks(pub u32);

impl WaitInstruction for WaitTicks {
    fn evaluate(&mut self) -> bool {
        if self.0 <= 1 {
            return true;
        }
        self.0 -= 1;
        false
    }
}

/// Finishes on the first evaluation where `predicate` returns `true`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use redlilium_promise::{FramePhase, FrameScheduler, PromiseRuntime, WaitUntil};
///
/// let mut scheduler = FrameScheduler::new(PromiseRuntime::new());
/// let loaded = Arc::new(AtomicBool::new(false));
/// let flag = loaded.clone();
/// scheduler
///     .wait_for(FramePhase::Update, WaitUntil::new(move || flag.load(Ordering::Acquire)))
///     .unwrap();
///
/// assert_eq!(scheduler.on_update_tick().unwrap().completed, 0);
/// loaded.store(true, Ordering::Release);
/// assert_eq!(scheduler.on_update_tick().unwrap().completed, 1);
/// ```
pub struct WaitUntil<F> {
    predicate: F,
}

impl<F: FnMut() -> bool + Send + 'static> WaitUntil<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F: FnMut() -> bool + Send + 'static> WaitInstruction for WaitUntil<F> {
    fn evaluate(&mut self) -> bool {
        (self.predicate)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_ticks_counts_evaluations() {
        let mut wait = WaitTicks(3);
        assert!(!wait.evaluate());
        assert!(!wait.evaluate());
        assert!(wait.evaluate());
        assert!(WaitTicks(0).evaluate());
    }

    #[test]
    fn wait_until_polls_predicate() {
        let mut calls = 0;
        let mut wait = WaitUntil::new(move || {
            calls += 1;
            calls == 2
        });
        assert!(!wait.evaluate());
        assert!(wait.evaluate());
    }
}
