use std::collections::VecDeque;
use std::sync::Arc;

use crate::arena::Dispatch;
use crate::cancel::CancelationToken;
use crate::deferred::RawDeferred;
use crate::outcome::{Outcome, Payload};
use crate::progress::Fixed;
use crate::promise::{Promise, RawPromise};
use crate::runtime::PromiseRuntime;

struct SequenceRun<F> {
    deferred: RawDeferred,
    token: CancelationToken,
    steps: VecDeque<F>,
    completed: usize,
    total: usize,
}

impl<T, F> SequenceRun<F>
where
    T: Send + 'static,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    /// Runs steps until one is still pending or the chain ends.
    fn run(mut self) {
        loop {
            // Canceled through the token registration, or settled elsewhere.
            if !self.deferred.is_valid_and_pending() {
                return;
            }
            if let Some(reason) = self.token.reason() {
                self.deferred.try_settle(Outcome::Canceled(reason));
                return;
            }
            let Some(step) = self.steps.pop_front() else {
                self.deferred
                    .try_settle(Outcome::Resolved(Box::new(()) as Payload));
                return;
            };

            match step().into_raw().poll() {
                Ok(Outcome::Resolved(_)) => self.step_finished(),
                Ok(failure) => {
                    self.deferred.try_settle(failure);
                    return;
                }
                Err(pending) => {
                    self.wait_for(pending);
                    return;
                }
            }
        }
    }

    fn step_finished(&mut self) {
        self.completed += 1;
        self.deferred
            .try_report(Fixed::ZERO.within_chain(self.completed, self.total));
    }

    fn wait_for(self, pending: RawPromise) {
        let progress = self.deferred.clone();
        let (step, total) = (self.completed, self.total);
        pending.add_progress_listener(Arc::new(move |value: Fixed| {
            progress.try_report(value.within_chain(step, total));
        }));

        let mut run = self;
        pending.subscribe(
            Dispatch::Foreground,
            Box::new(move |outcome| match outcome {
                Outcome::Resolved(_) => {
                    run.step_finished();
                    run.run();
                }
                failure => {
                    run.deferred.try_settle(failure);
                }
            }),
        );
    }
}

pub(super) fn sequence<T, F>(
    runtime: &PromiseRuntime,
    token: &CancelationToken,
    steps: impl IntoIterator<Item = F>,
) -> RawPromise
where
    T: Send + 'static,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    let steps: VecDeque<F> = steps.into_iter().collect();
    let (deferred, promise) = runtime.raw_deferred_with_token(token);
    SequenceRun {
        deferred,
        token: token.clone(),
        total: steps.len(),
        steps,
        completed: 0,
    }
    .run();
    promise
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cancel::{CancelationSource, CancelationToken};
    use crate::outcome::{PromiseState, Reason};
    use crate::promise::Promise;
    use crate::runtime::PromiseRuntime;

    type Step = Box<dyn FnOnce() -> Promise<()> + Send>;

    #[test]
    fn runs_steps_in_order_on_foreground() {
        let runtime = PromiseRuntime::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (d1, p1) = runtime.deferred::<()>();
        let mut p1 = Some(p1);

        let steps: Vec<Step> = (0..3)
            .map(|i| {
                let order = order.clone();
                let runtime = runtime.clone();
                let first = if i == 0 { p1.take() } else { None };
                Box::new(move || {
                    order.lock().push(i);
                    first.unwrap_or_else(|| runtime.resolved(()))
                }) as Step
            })
            .collect();

        let sequence = runtime.sequence(&CancelationToken::none(), steps);
        assert_eq!(*order.lock(), vec![0]);

        d1.resolve(()).unwrap();
        // Continuation waits for the foreground drain.
        assert_eq!(*order.lock(), vec![0]);
        runtime.execute_foreground();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(sequence.state(), PromiseState::Resolved);
    }

    #[test]
    fn failing_step_skips_the_rest() {
        let runtime = PromiseRuntime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let rt = runtime.clone();
        let counter = calls.clone();
        let steps: Vec<Step> = vec![
            Box::new(move || rt.rejected::<()>("step failed")),
            Box::new(move || -> Promise<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                unreachable!()
            }),
        ];

        let sequence = runtime.sequence(&CancelationToken::none(), steps);
        let outcome = sequence.into_outcome().ok().unwrap();
        assert_eq!(outcome.reason().and_then(Reason::message), Some("step failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_sequence_resolves() {
        let runtime = PromiseRuntime::new();
        let sequence = runtime.sequence(&CancelationToken::none(), Vec::<Step>::new());
        assert_eq!(sequence.state(), PromiseState::Resolved);
    }

    #[test]
    fn already_canceled_token_runs_nothing() {
        let runtime = PromiseRuntime::new();
        let source = CancelationSource::new();
        source.cancel_with("early");
        let steps: Vec<Step> = vec![Box::new(|| -> Promise<()> { unreachable!() })];

        let sequence = runtime.sequence(&source.token(), steps);
        let outcome = sequence.into_outcome().ok().unwrap();
        assert_eq!(outcome.state(), PromiseState::Canceled);
        assert_eq!(outcome.reason().and_then(Reason::message), Some("early"));
    }

    #[test]
    fn progress_counts_finished_steps() {
        let runtime = PromiseRuntime::new();
        let (d1, p1) = runtime.deferred::<()>();
        let (d2, p2) = runtime.deferred::<()>();
        let steps: Vec<Step> = vec![Box::new(move || p1), Box::new(move || p2)];
        let sequence = runtime.sequence(&CancelationToken::none(), steps);

        d1.report_progress(0.5).unwrap();
        assert!((sequence.progress() - 0.25).abs() < 1e-3);
        d1.resolve(()).unwrap();
        runtime.execute_foreground();
        assert!((sequence.progress() - 0.5).abs() < 1e-3);
        d2.resolve(()).unwrap();
        runtime.execute_foreground();
        assert_eq!(sequence.progress(), 1.0);
    }
}
