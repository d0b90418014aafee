use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{Bridges, empty_argument, short_circuit};
use crate::deferred::RawDeferred;
use crate::error::PromiseError;
use crate::outcome::ErasedOutcome;
use crate::pass_through::{PassThrough, PassThroughTarget};
use crate::progress::Fixed;
use crate::promise::RawPromise;
use crate::runtime::PromiseRuntime;

struct FirstTarget {
    deferred: RawDeferred,
    /// Inputs that have not failed yet.
    remaining: AtomicUsize,
    progress: AtomicU32,
}

impl PassThroughTarget for FirstTarget {
    fn on_settled(&self, _index: usize, outcome: ErasedOutcome) {
        if outcome.is_resolved() {
            self.deferred.try_settle(outcome);
        } else if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // The decrement that reaches zero carries the last failure.
            self.deferred.try_settle(outcome);
        }
    }

    fn on_progress(&self, _index: usize, progress: Fixed) {
        let previous = self.progress.fetch_max(progress.raw(), Ordering::AcqRel);
        if progress.raw() > previous {
            self.deferred.try_report(progress);
        }
    }
}

pub(super) fn first(
    runtime: &PromiseRuntime,
    inputs: impl Iterator<Item = RawPromise>,
) -> Result<RawPromise, PromiseError> {
    let mut inputs = inputs.peekable();
    if inputs.peek().is_none() {
        return Err(empty_argument("first"));
    }

    let mut bridges: Bridges = Vec::new();
    let mut last_failure = None;
    let mut index = 0;
    while let Some(input) = inputs.next() {
        match input.poll() {
            Ok(outcome) if outcome.is_resolved() => {
                short_circuit(runtime, bridges, inputs);
                return Ok(RawPromise::settled(runtime, outcome));
            }
            Ok(failure) => last_failure = Some(failure),
            Err(pending) => bridges.push((PassThrough::take(runtime, index), pending)),
        }
        index += 1;
    }

    if bridges.is_empty() {
        if let Some(failure) = last_failure {
            return Ok(RawPromise::settled(runtime, failure));
        }
    }

    let (deferred, promise) = runtime.raw_deferred();
    let target = Arc::new(FirstTarget {
        deferred,
        remaining: AtomicUsize::new(bridges.len()),
        progress: AtomicU32::new(0),
    });
    for (bridge, input) in bridges {
        bridge.bind(input, target.clone());
    }
    Ok(promise)
}

#[cfg(test)]
mod tests {
    use crate::error::PromiseError;
    use crate::outcome::{PromiseState, Reason};
    use crate::promise::Promise;
    use crate::runtime::PromiseRuntime;

    #[test]
    fn resolves_on_first_resolution() {
        let runtime = PromiseRuntime::new();
        let (a, pa) = runtime.deferred::<u32>();
        let (b, pb) = runtime.deferred::<u32>();
        let first = runtime.first([pa, pb]).unwrap();

        a.reject("a failed").unwrap();
        assert_eq!(first.state(), PromiseState::Pending);
        b.resolve(2).unwrap();

        assert_eq!(first.into_outcome().ok().unwrap().value(), Some(2));
        assert_eq!(runtime.report_unhandled_rejections(), 0);
    }

    #[test]
    fn all_failed_surfaces_last_failure() {
        let runtime = PromiseRuntime::new();
        let deferreds: Vec<_> = (0..3).map(|_| runtime.deferred::<u32>()).collect();
        let (deferreds, promises): (Vec<_>, Vec<_>) = deferreds.into_iter().unzip();
        let first = runtime.first(promises).unwrap();

        deferreds[0].reject("a").unwrap();
        deferreds[1].cancel_with("b").unwrap();
        deferreds[2].reject("c").unwrap();

        let outcome = first.into_outcome().ok().unwrap();
        assert_eq!(outcome.state(), PromiseState::Rejected);
        assert_eq!(outcome.reason().and_then(Reason::message), Some("c"));
        assert_eq!(runtime.report_unhandled_rejections(), 0);
    }

    #[test]
    fn already_failed_inputs_use_enumeration_order() {
        let runtime = PromiseRuntime::new();
        let first = runtime
            .first([
                runtime.rejected::<u8>("a"),
                runtime.canceled_with("b"),
                runtime.rejected("c"),
            ])
            .unwrap();

        let outcome = first.into_outcome().ok().unwrap();
        assert_eq!(outcome.reason().and_then(Reason::message), Some("c"));
        assert_eq!(runtime.pass_through_pool_stats().taken, 0);
        assert_eq!(runtime.report_unhandled_rejections(), 0);
    }

    #[test]
    fn resolved_input_short_circuits() {
        let runtime = PromiseRuntime::new();
        let (_a, pa) = runtime.deferred::<u8>();
        let first = runtime.first([pa, runtime.resolved(4)]).unwrap();
        assert_eq!(first.into_outcome().ok().unwrap().value(), Some(4));
        assert_eq!(runtime.pass_through_pool_stats().outstanding(), 0);
    }

    #[test]
    fn empty_input_is_rejected_before_pooling() {
        let runtime = PromiseRuntime::new();
        let before = runtime.pass_through_pool_stats();
        let result = runtime.first(Vec::<Promise<u8>>::new());
        assert_eq!(
            result.err(),
            Some(PromiseError::EmptyArgument { operation: "first" })
        );
        assert_eq!(runtime.pass_through_pool_stats(), before);
    }
}
